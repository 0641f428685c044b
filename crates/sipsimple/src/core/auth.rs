//! Digest authentication (RFC 2617) for outgoing requests

use std::fmt;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::core::message::Method;
use crate::core::uri::split_header_list;
use crate::error::{Error, Result};

/// Username and password used to answer digest challenges
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Restrict the credentials to one realm; `None` answers any realm
    #[serde(default)]
    pub realm: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("realm", &self.realm)
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Whether these credentials may answer a challenge for `realm`
    pub fn accepts_realm(&self, realm: &str) -> bool {
        self.realm.as_deref().map_or(true, |own| own == realm)
    }

    /// Build an `Authorization` / `Proxy-Authorization` header value
    pub fn authorize(&self, challenge: &DigestChallenge, method: &Method, uri: &str, nc: u32) -> Result<String> {
        let cnonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        self.authorize_with_cnonce(challenge, method, uri, nc, &cnonce)
    }

    fn authorize_with_cnonce(
        &self,
        challenge: &DigestChallenge,
        method: &Method,
        uri: &str,
        nc: u32,
        cnonce: &str,
    ) -> Result<String> {
        if let Some(algorithm) = &challenge.algorithm {
            if !algorithm.eq_ignore_ascii_case("MD5") {
                return Err(Error::Authentication(format!("unsupported digest algorithm {}", algorithm)));
            }
        }
        let use_qop = if challenge.qop.is_empty() {
            false
        } else if challenge.qop.iter().any(|q| q.eq_ignore_ascii_case("auth")) {
            true
        } else {
            return Err(Error::Authentication(format!(
                "unsupported qop options {}",
                challenge.qop.join(",")
            )));
        };

        let ha1 = md5_hex(&format!("{}:{}:{}", self.username, challenge.realm, self.password));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));
        let nc = format!("{:08x}", nc);
        let response = if use_qop {
            md5_hex(&format!("{}:{}:{}:{}:auth:{}", ha1, challenge.nonce, nc, cnonce, ha2))
        } else {
            md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm=MD5",
            self.username, challenge.realm, challenge.nonce, uri, response
        );
        if use_qop {
            header.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
        }
        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        Ok(header)
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// A parsed `WWW-Authenticate` / `Proxy-Authenticate` digest challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    pub qop: Vec<String>,
    pub stale: bool,
}

impl DigestChallenge {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let params = match value.split_once(char::is_whitespace) {
            Some((scheme, params)) if scheme.eq_ignore_ascii_case("Digest") => params,
            _ => return Err(Error::Authentication(format!("not a digest challenge: {}", value))),
        };

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        let mut qop = Vec::new();
        let mut stale = false;

        for param in split_header_list(params) {
            let Some((name, raw)) = param.split_once('=') else {
                continue;
            };
            let value = raw.trim().trim_matches('"').to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                "qop" => {
                    qop = value
                        .split(',')
                        .map(|q| q.trim().to_string())
                        .filter(|q| !q.is_empty())
                        .collect()
                }
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(|| Error::Authentication("challenge without realm".into()))?,
            nonce: nonce.ok_or_else(|| Error::Authentication("challenge without nonce".into()))?,
            opaque,
            algorithm,
            qop,
            stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_challenge_with_quoted_commas() {
        let challenge = DigestChallenge::parse(
            "Digest realm=\"example.com\", nonce=\"abc,def\", qop=\"auth,auth-int\", opaque=\"xyz\", algorithm=MD5, stale=TRUE",
        )
        .unwrap();
        assert_eq!(challenge.realm, "example.com");
        assert_eq!(challenge.nonce, "abc,def");
        assert_eq!(challenge.qop, vec!["auth", "auth-int"]);
        assert_eq!(challenge.opaque.as_deref(), Some("xyz"));
        assert!(challenge.stale);
    }

    #[test]
    fn rejects_non_digest_challenges() {
        assert!(DigestChallenge::parse("Basic realm=\"x\"").is_err());
        assert!(DigestChallenge::parse("Digest nonce=\"n\"").is_err());
    }

    #[test]
    fn computes_rfc2617_response_without_qop() {
        // HA1 = md5("alice:example.com:secret"), HA2 = md5("REGISTER:sip:example.com")
        let challenge = DigestChallenge::parse("Digest realm=\"example.com\", nonce=\"n1\"").unwrap();
        let credentials = Credentials::new("alice", "secret");
        let header = credentials
            .authorize_with_cnonce(&challenge, &Method::Register, "sip:example.com", 1, "c")
            .unwrap();

        let ha1 = md5_hex("alice:example.com:secret");
        let ha2 = md5_hex("REGISTER:sip:example.com");
        let expected = md5_hex(&format!("{}:n1:{}", ha1, ha2));
        assert!(header.contains(&format!("response=\"{}\"", expected)));
        assert!(!header.contains("qop="));
    }

    #[test]
    fn computes_response_with_qop_auth() {
        let challenge =
            DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", qop=\"auth\", opaque=\"o\"").unwrap();
        let header = Credentials::new("bob", "pw")
            .authorize_with_cnonce(&challenge, &Method::Publish, "sip:bob@r", 2, "cn")
            .unwrap();

        let ha1 = md5_hex("bob:r:pw");
        let ha2 = md5_hex("PUBLISH:sip:bob@r");
        let expected = md5_hex(&format!("{}:n:00000002:cn:auth:{}", ha1, ha2));
        assert!(header.contains(&format!("response=\"{}\"", expected)));
        assert!(header.contains("nc=00000002"));
        assert!(header.ends_with("opaque=\"o\""));
    }

    #[test]
    fn refuses_unsupported_options() {
        let credentials = Credentials::new("a", "b");
        let sha = DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", algorithm=SHA-256").unwrap();
        assert!(credentials.authorize(&sha, &Method::Register, "sip:r", 1).is_err());
        let auth_int = DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", qop=\"auth-int\"").unwrap();
        assert!(credentials.authorize(&auth_int, &Method::Register, "sip:r", 1).is_err());
    }

    #[test]
    fn realm_restriction() {
        let credentials = Credentials::new("a", "b").with_realm("home");
        assert!(credentials.accepts_realm("home"));
        assert!(!credentials.accepts_realm("work"));
        assert!(Credentials::new("a", "b").accepts_realm("anything"));
        assert!(!format!("{:?}", credentials).contains("\"b\""));
    }
}
