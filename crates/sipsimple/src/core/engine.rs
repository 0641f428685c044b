//! Shared SIP context handed to every request and primitive

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::core::notification::NotificationCenter;
use crate::core::transport::{DEFAULT_TRANSACTION_TIMEOUT, Transport, UdpTransport};
use crate::error::Result;

/// Tunables of a [`SipCore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSettings {
    /// Value of the `User-Agent` header of every request
    pub user_agent: String,
    /// Transaction timeout used when a caller does not give one
    pub request_timeout: Duration,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("sipsimple-rs/{}", crate::VERSION),
            request_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }
}

impl CoreSettings {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Transport, notification center and settings shared by requests.
/// Cloning is cheap.
#[derive(Clone)]
pub struct SipCore {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    transport: Arc<dyn Transport>,
    notification_center: Arc<NotificationCenter>,
    settings: CoreSettings,
}

impl SipCore {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(transport, Arc::new(NotificationCenter::new()), CoreSettings::default())
    }

    pub fn with_settings(
        transport: Arc<dyn Transport>,
        notification_center: Arc<NotificationCenter>,
        settings: CoreSettings,
    ) -> Self {
        Self {
            inner: Arc::new(CoreInner {
                transport,
                notification_center,
                settings,
            }),
        }
    }

    /// Bind a UDP transport on `addr` and build a core around it
    pub async fn bind_udp(addr: SocketAddr) -> Result<Self> {
        let transport = UdpTransport::bind(addr).await?;
        Ok(Self::new(Arc::new(transport)))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn notification_center(&self) -> &Arc<NotificationCenter> {
        &self.inner.notification_center
    }

    pub fn user_agent(&self) -> &str {
        &self.inner.settings.user_agent
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.settings.request_timeout
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.inner.settings
    }
}

impl fmt::Debug for SipCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SipCore")
            .field("transport", &self.inner.transport)
            .field("user_agent", &self.inner.settings.user_agent)
            .finish()
    }
}
