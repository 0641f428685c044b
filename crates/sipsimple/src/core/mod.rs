//! Minimal SIP core: URIs, routes, messages, authentication, transports
//! and the request engine used by the high level primitives.

pub mod auth;
pub mod codec;
pub mod engine;
pub mod headers;
pub mod message;
pub mod notification;
pub mod request;
pub mod route;
pub mod transport;
pub mod uri;

pub use auth::{Credentials, DigestChallenge};
pub use engine::{CoreSettings, SipCore};
pub use headers::Headers;
pub use message::{Method, OutgoingRequest, SipMessage, SipResponse};
pub use notification::{Notification, NotificationCenter, NotificationKind, Observer, ObserverFn, SenderId};
pub use request::{Request, RequestBuilder, RequestState};
pub use route::{Route, TransportKind};
pub use transport::{Transport, UdpTransport};
pub use uri::{ContactHeader, SipUri};
