//! # SIP SIMPLE - client primitives
//!
//! High level building blocks of a SIP SIMPLE client:
//! - **Registration**: keeps a contact registered with a registrar (REGISTER)
//! - **Message**: pager-mode instant messages (MESSAGE)
//! - **Publication**: event state publication (PUBLISH)
//! - **Audio helpers**: periodic tones and wave files over an abstract media engine
//! - **Utilities**: RFC 3339 timestamps, routes, small filesystem helpers
//!
//! Every primitive reports its progress through a [`NotificationCenter`]
//! using the SIP SIMPLE notification names (`SIPRegistrationDidSucceed`,
//! `SIPPublicationWillExpire`, ...).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sipsimple::{Registration, Route, SipCore, SipUri};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let core = SipCore::bind_udp("0.0.0.0:0".parse()?).await?;
//!     let mut events = core.notification_center().subscribe();
//!
//!     let aor: SipUri = "sip:alice@example.com".parse()?;
//!     let registration = Registration::new(&core, aor, None, 600);
//!     registration.register("sip:alice@192.0.2.10:5060".parse()?, Route::new("192.0.2.1")?, None)?;
//!
//!     while let Ok(notification) = events.recv().await {
//!         println!("{}", notification.name());
//!     }
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod config;
pub mod core;
pub mod error;
pub mod primitives;
pub mod util;

pub use crate::config::SimpleConfig;
pub use crate::core::{
    Credentials, Notification, NotificationCenter, NotificationKind, Observer, ObserverFn, Route, SenderId, SipCore,
    SipUri, TransportKind,
};
pub use error::{Error, Result};
pub use primitives::{Message, Publication, Registration};
pub use util::{Timestamp, limit, makedirs};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
