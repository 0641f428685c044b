#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sipsimple::core::transport::ScriptedTransport;
use sipsimple::core::SipResponse;
use sipsimple::{Notification, Route, SipCore, SipUri};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn scripted_core() -> (SipCore, Arc<ScriptedTransport>) {
    init_tracing();
    let transport = ScriptedTransport::new();
    (SipCore::new(transport.clone()), transport)
}

pub fn uri(value: &str) -> SipUri {
    value.parse().unwrap()
}

pub fn route() -> Route {
    Route::new("127.0.0.1").unwrap()
}

pub fn ok() -> SipResponse {
    SipResponse::new(200, "OK")
}

/// Records every notification of a center, in posting order
pub struct Events {
    rx: broadcast::Receiver<Notification>,
    pub seen: Vec<Notification>,
}

impl Events {
    pub fn new(core: &SipCore) -> Self {
        Self {
            rx: core.notification_center().subscribe(),
            seen: Vec::new(),
        }
    }

    /// Wait for the next notification called `name`
    pub async fn next_named(&mut self, name: &str) -> Notification {
        loop {
            let notification = tokio::time::timeout(Duration::from_secs(3600), self.rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {}", name))
                .expect("notification channel closed");
            self.seen.push(notification.clone());
            if notification.name() == name {
                return notification;
            }
        }
    }

    /// Collect everything already posted
    pub fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(notification) => self.seen.push(notification),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.seen.iter().filter(|n| n.name() == name).count()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.seen.iter().map(|n| n.name()).collect()
    }
}
