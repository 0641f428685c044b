//! In-memory transport that answers from a script, for tests

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::message::{OutgoingRequest, SipResponse};
use crate::core::route::Route;
use crate::core::transport::Transport;
use crate::error::{Error, Result};

/// What the scripted transport does with the next request
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Answer with this final response
    Respond(SipResponse),
    /// Answer after a delay
    Delayed(Duration, SipResponse),
    /// Never answer; the transaction runs into its timeout
    Silence,
    /// Fail with a transport error carrying this text
    Fail(String),
}

/// A transport answering requests from a queue and recording them
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<(OutgoingRequest, Route)>>,
    closed: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.script.lock().push_back(reply);
    }

    pub fn push_response(&self, response: SipResponse) {
        self.push(ScriptedReply::Respond(response));
    }

    /// Every request handed to the transport, in order
    pub fn requests(&self) -> Vec<OutgoingRequest> {
        self.requests.lock().iter().map(|(request, _)| request.clone()).collect()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.requests.lock().iter().map(|(_, route)| route.clone()).collect()
    }

    pub fn last_request(&self) -> Option<OutgoingRequest> {
        self.requests.lock().last().map(|(request, _)| request.clone())
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 5060)))
    }

    async fn send_request(&self, request: &OutgoingRequest, route: &Route, timeout: Duration) -> Result<SipResponse> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        debug!("Scripted transport got {} for {}", request.method, route);
        self.requests.lock().push((request.clone(), route.clone()));

        let reply = self.script.lock().pop_front();
        match reply {
            Some(ScriptedReply::Respond(response)) => Ok(response),
            Some(ScriptedReply::Delayed(delay, response)) => {
                if delay >= timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(Error::Timeout {
                        millis: timeout.as_millis() as u64,
                    });
                }
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(ScriptedReply::Silence) => {
                tokio::time::sleep(timeout).await;
                Err(Error::Timeout {
                    millis: timeout.as_millis() as u64,
                })
            }
            Some(ScriptedReply::Fail(reason)) => Err(Error::Io(std::io::Error::other(reason))),
            None => {
                warn!("Scripted transport has no reply left for {}", request.method);
                Ok(SipResponse::new(500, "Server Internal Error"))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}
