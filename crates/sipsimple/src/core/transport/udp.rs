//! Non-INVITE client transactions over a single UDP socket

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::core::codec::parse_message;
use crate::core::message::{OutgoingRequest, SipMessage, SipResponse};
use crate::core::route::{Route, TransportKind};
use crate::core::transport::{TimerSettings, Transport};
use crate::error::{Error, Result};

// Large enough for any UDP datagram
const RECEIVE_BUFFER_SIZE: usize = 65_535;

/// UDP transport running non-INVITE client transactions
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    timers: TimerSettings,
    closed: AtomicBool,
    /// Pending transactions by Via branch
    pending: DashMap<String, mpsc::UnboundedSender<SipResponse>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

/// Removes a transaction from the pending table however the send ends
struct PendingGuard<'a> {
    pending: &'a DashMap<String, mpsc::UnboundedSender<SipResponse>>,
    branch: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.branch);
    }
}

impl UdpTransport {
    /// Bind a UDP transport to `addr` with the standard RFC 3261 timers
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_timers(addr, TimerSettings::default()).await
    }

    pub async fn bind_with_timers(addr: SocketAddr, timers: TimerSettings) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket: Arc::new(socket),
                local_addr,
                timers,
                closed: AtomicBool::new(false),
                pending: DashMap::new(),
                receive_task: Mutex::new(None),
            }),
        };
        transport.spawn_receive_loop();
        Ok(transport)
    }

    // The loop holds a weak reference; the last dropped handle aborts it
    fn spawn_receive_loop(&self) {
        let socket = self.inner.socket.clone();
        let weak: Weak<UdpTransportInner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
            loop {
                let result = socket.recv_from(&mut buf).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.closed.load(Ordering::Relaxed) {
                    break;
                }
                match result {
                    Ok((len, source)) => inner.handle_datagram(&buf[..len], source),
                    Err(e) => warn!("Error receiving UDP packet: {}", e),
                }
            }
            debug!("UDP receive loop terminated");
        });
        *self.inner.receive_task.lock() = Some(handle);
    }
}

impl UdpTransportInner {
    fn handle_datagram(&self, data: &[u8], source: SocketAddr) {
        trace!("Received {} bytes from {}", data.len(), source);
        match parse_message(data) {
            Ok(SipMessage::Response(response)) => {
                let Some(branch) = response.via_branch().map(str::to_string) else {
                    debug!("Dropping response without Via branch from {}", source);
                    return;
                };
                match self.pending.get(&branch) {
                    Some(tx) => {
                        debug!("Received {} {} from {}", response.code, response.reason, source);
                        let _ = tx.send(response);
                    }
                    None => debug!("Dropping stray response for branch {} from {}", branch, source),
                }
            }
            Ok(SipMessage::Request(request)) => {
                debug!("Ignoring incoming {} request from {}", request.method, source);
            }
            Err(e) => warn!("Error parsing SIP message from {}: {}", source, e),
        }
    }
}

impl Drop for UdpTransportInner {
    fn drop(&mut self) {
        if let Some(task) = self.receive_task.get_mut().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send_request(&self, request: &OutgoingRequest, route: &Route, timeout: Duration) -> Result<SipResponse> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        if route.transport() != TransportKind::Udp {
            return Err(Error::UnsupportedTransport(route.transport().to_string()));
        }

        let inner = &self.inner;
        let branch = format!("z9hG4bK{}", Uuid::new_v4().simple());
        let via = format!("SIP/2.0/UDP {};rport;branch={}", inner.local_addr, branch);
        let data = request.encode(&via);
        let destination = route.socket_addr();

        let (tx, mut rx) = mpsc::unbounded_channel();
        inner.pending.insert(branch.clone(), tx);
        let _guard = PendingGuard {
            pending: &inner.pending,
            branch,
        };

        info!("Sending {} request to {}", request.method, destination);
        inner.socket.send_to(&data, destination).await?;

        let deadline = sleep(timeout);
        tokio::pin!(deadline);
        let mut interval = inner.timers.t1;
        let retransmit = sleep(interval);
        tokio::pin!(retransmit);
        let mut proceeding = false;

        loop {
            tokio::select! {
                response = rx.recv() => match response {
                    Some(response) if response.is_provisional() => {
                        debug!("{} provisional response {} {}", request.method, response.code, response.reason);
                        proceeding = true;
                        interval = inner.timers.t2;
                        retransmit.as_mut().reset(Instant::now() + interval);
                    }
                    Some(response) => return Ok(response),
                    None => return Err(Error::TransportClosed),
                },
                _ = &mut retransmit => {
                    if self.is_closed() {
                        return Err(Error::TransportClosed);
                    }
                    trace!("Retransmitting {} to {}", request.method, destination);
                    inner.socket.send_to(&data, destination).await?;
                    interval = if proceeding {
                        inner.timers.t2
                    } else {
                        (interval * 2).min(inner.timers.t2)
                    };
                    retransmit.as_mut().reset(Instant::now() + interval);
                },
                _ = &mut deadline => {
                    warn!("Timeout waiting for response to {} sent to {}", request.method, destination);
                    return Err(Error::Timeout { millis: timeout.as_millis() as u64 });
                },
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        if let Some(task) = self.inner.receive_task.lock().take() {
            task.abort();
        }
        // Dropping the senders wakes every pending transaction
        self.inner.pending.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn rebind(addr: SocketAddr) -> bool {
        for _ in 0..50 {
            if UdpSocket::bind(addr).await.is_ok() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn dropping_the_last_handle_releases_the_socket() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = transport.local_addr().unwrap();
        let clone = transport.clone();

        drop(transport);
        assert!(UdpSocket::bind(addr).await.is_err());
        assert!(!clone.is_closed());

        drop(clone);
        assert!(rebind(addr).await);
    }

    #[tokio::test]
    async fn close_releases_the_socket_for_new_transports() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = transport.local_addr().unwrap();
        transport.close().await.unwrap();
        assert!(transport.is_closed());
        drop(transport);
        assert!(rebind(addr).await);
    }
}
