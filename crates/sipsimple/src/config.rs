//! Account and engine configuration
//!
//! Configuration is read from TOML:
//!
//! ```rust
//! use sipsimple::config::SimpleConfig;
//!
//! let config = SimpleConfig::from_toml_str(r#"
//!     [account]
//!     uri = "sip:alice@192.0.2.1"
//!     password = "secret"
//!
//!     [registrar]
//!     route = { address = "192.0.2.1", port = 5060 }
//!
//!     [sip]
//!     register_duration = 600
//! "#).unwrap();
//!
//! assert_eq!(config.sip.register_duration, 600);
//! assert_eq!(config.credentials().unwrap().username, "alice");
//! ```
//!
//! Builder-style setters cover the same settings:
//!
//! ```rust
//! use sipsimple::config::SimpleConfig;
//! use std::time::Duration;
//!
//! let config = SimpleConfig::new()
//!     .with_account_uri("sip:bob@192.0.2.7".parse().unwrap())
//!     .with_user_agent("Pager/1.0")
//!     .with_request_timeout(Duration::from_secs(10));
//! assert!(config.validate().is_ok());
//! assert_eq!(config.route().unwrap().to_string(), "sip:192.0.2.7:5060;transport=udp");
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::auth::Credentials;
use crate::core::engine::CoreSettings;
use crate::core::route::Route;
use crate::core::uri::SipUri;
use crate::error::{Error, Result};
use crate::primitives::publication::DEFAULT_PUBLICATION_DURATION;
use crate::primitives::registration::DEFAULT_REGISTRATION_DURATION;

/// Top level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleConfig {
    pub account: AccountConfig,
    pub registrar: RegistrarConfig,
    pub sip: SipConfig,
    pub logging: LoggingSection,
}

/// `[account]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Address of record
    pub uri: Option<SipUri>,
    /// Authentication user; defaults to the user part of `uri`
    pub username: Option<String>,
    pub password: Option<String>,
    pub realm: Option<String>,
}

/// `[registrar]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Next hop for every request; derived from the account domain when unset
    pub route: Option<Route>,
}

/// `[sip]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    pub local_address: SocketAddr,
    pub user_agent: String,
    pub register_duration: u32,
    pub publish_duration: u32,
    /// Transaction timeout in seconds
    pub request_timeout: u64,
}

impl Default for SipConfig {
    fn default() -> Self {
        let settings = CoreSettings::default();
        Self {
            local_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            user_agent: settings.user_agent,
            register_duration: DEFAULT_REGISTRATION_DURATION,
            publish_duration: DEFAULT_PUBLICATION_DURATION,
            request_timeout: settings.request_timeout.as_secs(),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
    /// Log span enter and exit events
    pub log_spans: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            log_spans: false,
        }
    }
}

impl SimpleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn with_account_uri(mut self, uri: SipUri) -> Self {
        self.account.uri = Some(uri);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.account.username = Some(username.into());
        self.account.password = Some(password.into());
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.registrar.route = Some(route);
        self
    }

    pub fn with_local_address(mut self, addr: SocketAddr) -> Self {
        self.sip.local_address = addr;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.sip.user_agent = user_agent.into();
        self
    }

    pub fn with_register_duration(mut self, seconds: u32) -> Self {
        self.sip.register_duration = seconds;
        self
    }

    pub fn with_publish_duration(mut self, seconds: u32) -> Self {
        self.sip.publish_duration = seconds;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.sip.request_timeout = timeout.as_secs();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    /// Check the settings needed to talk to a registrar
    pub fn validate(&self) -> Result<()> {
        let uri = self
            .account
            .uri
            .as_ref()
            .ok_or_else(|| Error::config("account.uri is required"))?;
        if self.account.password.is_some() && self.account.username.is_none() && uri.user.is_none() {
            return Err(Error::config("account.username is required when the URI has no user part"));
        }
        if self.sip.user_agent.trim().is_empty() {
            return Err(Error::config("sip.user_agent must not be empty"));
        }
        if self.sip.register_duration == 0 || self.sip.publish_duration == 0 {
            return Err(Error::config("durations must be greater than zero"));
        }
        if self.sip.request_timeout == 0 {
            return Err(Error::config("sip.request_timeout must be greater than zero"));
        }
        self.route().map(|_| ())
    }

    /// Credentials, when a password is configured
    pub fn credentials(&self) -> Option<Credentials> {
        let password = self.account.password.as_ref()?;
        let username = self
            .account
            .username
            .clone()
            .or_else(|| self.account.uri.as_ref().and_then(|uri| uri.user.clone()))?;
        let credentials = Credentials::new(username, password.clone());
        Some(match &self.account.realm {
            Some(realm) => credentials.with_realm(realm.clone()),
            None => credentials,
        })
    }

    /// Configured route, or one to the account domain when it is an IPv4 address
    pub fn route(&self) -> Result<Route> {
        if let Some(route) = &self.registrar.route {
            return Ok(route.clone());
        }
        let uri = self
            .account
            .uri
            .as_ref()
            .ok_or_else(|| Error::config("no route configured and no account URI"))?;
        let route = Route::new(&uri.host)
            .map_err(|_| Error::config(format!("no route configured and {} is not an IPv4 address", uri.host)))?;
        match uri.port {
            Some(port) => route.with_port(port),
            None => Ok(route),
        }
    }

    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings::default()
            .with_user_agent(self.sip.user_agent.clone())
            .with_request_timeout(Duration::from_secs(self.sip.request_timeout))
    }
}
