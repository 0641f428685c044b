//! SIP message types exchanged with a transport

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::core::headers::Headers;
use crate::core::uri::SipUri;
use crate::error::{Error, Result};

/// Request methods used by the client primitives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Method {
    Register,
    Message,
    Publish,
    /// Any other method seen on the wire
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Register => "REGISTER",
            Method::Message => "MESSAGE",
            Method::Publish => "PUBLISH",
            Method::Other(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_alphanumeric() || b"-.!%*_+`'~".contains(&b)) {
            return Err(Error::parse(format!("invalid method '{}'", s)));
        }
        Ok(match s {
            "REGISTER" => Method::Register,
            "MESSAGE" => Method::Message,
            "PUBLISH" => Method::Publish,
            other => Method::Other(other.to_string()),
        })
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

impl TryFrom<String> for Method {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// A request ready to be handed to a transport
///
/// The transport owns the top `Via` header since only it knows the local
/// address and the transaction branch.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub request_uri: SipUri,
    pub headers: Headers,
    pub body: Bytes,
}

impl OutgoingRequest {
    pub fn new(method: Method, request_uri: SipUri) -> Self {
        Self {
            method,
            request_uri,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Serialise the request with `via` as its top `Via` header value.
    /// `Content-Length` is always written from the actual body.
    pub fn encode(&self, via: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(512 + self.body.len());
        buf.put_slice(format!("{} {} SIP/2.0\r\n", self.method, self.request_uri).as_bytes());
        buf.put_slice(format!("Via: {}\r\n", via).as_bytes());
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        buf.put_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get("Call-ID")
    }
}

/// A response received from the network (or synthesised by a transport)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipResponse {
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl SipResponse {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_provisional(&self) -> bool {
        self.code < 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// `branch` parameter of the top `Via` header
    pub fn via_branch(&self) -> Option<&str> {
        via_branch(self.headers.get("Via")?)
    }

    /// Body as text, if any
    pub fn body_text(&self) -> Option<String> {
        (!self.body.is_empty()).then(|| String::from_utf8_lossy(&self.body).into_owned())
    }

    /// Serialise the response; used by loopback peers in tests and tools
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        buf.put_slice(format!("SIP/2.0 {} {}\r\n", self.code, self.reason).as_bytes());
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        buf.put_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

/// A request received from the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipRequestMessage {
    pub method: Method,
    pub uri: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl SipRequestMessage {
    pub fn via_branch(&self) -> Option<&str> {
        via_branch(self.headers.get("Via")?)
    }
}

/// Either kind of SIP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(SipRequestMessage),
    Response(SipResponse),
}

fn via_branch(via: &str) -> Option<&str> {
    // Only the first Via value of a comma separated line is ours
    let first = via.split(',').next()?;
    first.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim().eq_ignore_ascii_case("branch").then(|| value.trim())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_writes_via_and_content_length() {
        let mut request = OutgoingRequest::new(Method::Message, "sip:bob@example.com".parse().unwrap());
        request.headers.push("Call-ID", "abc");
        request.headers.push("Content-Length", "999");
        request.headers.push("Content-Type", "text/plain");
        request.body = Bytes::from_static(b"hello");

        let wire = request.encode("SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bK1");
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("MESSAGE sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bK1\r\n"));
        assert!(text.contains("Content-Length: 5\r\n\r\nhello"));
        assert!(!text.contains("999"));
    }

    #[test]
    fn method_round_trips_through_strings() {
        assert_eq!("PUBLISH".parse::<Method>().unwrap(), Method::Publish);
        assert_eq!("OPTIONS".parse::<Method>().unwrap(), Method::Other("OPTIONS".into()));
        assert!("BAD METHOD".parse::<Method>().is_err());
    }

    #[test]
    fn via_branch_reads_top_value() {
        let response = SipResponse::new(200, "OK")
            .with_header("Via", "SIP/2.0/UDP 10.0.0.1:5060;rport=5060;branch=z9hG4bKabc, SIP/2.0/UDP proxy;branch=z9hG4bKdef");
        assert_eq!(response.via_branch(), Some("z9hG4bKabc"));
    }
}
