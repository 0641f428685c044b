//! Transports carry requests to the next hop and bring back final responses

pub mod udp;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::message::{OutgoingRequest, SipResponse};
use crate::core::route::Route;
use crate::error::Result;

pub use udp::UdpTransport;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ScriptedReply, ScriptedTransport};

/// RTT estimate (RFC 3261 timer T1)
pub const T1: Duration = Duration::from_millis(500);
/// Maximum retransmit interval for non-INVITE requests (timer T2)
pub const T2: Duration = Duration::from_secs(4);
/// Non-INVITE transaction timeout (timer F = 64 * T1)
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(32);

/// Retransmission timers of a client transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    pub t1: Duration,
    pub t2: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self { t1: T1, t2: T2 }
    }
}

/// A transport able to run non-INVITE client transactions
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Local address the transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Send `request` towards `route` and wait for its final response.
    /// Provisional responses are absorbed; `timeout` bounds the whole
    /// transaction.
    async fn send_request(&self, request: &OutgoingRequest, route: &Route, timeout: Duration) -> Result<SipResponse>;

    /// Close the transport; pending and later transactions fail
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
