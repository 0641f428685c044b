//! One-shot MESSAGE delivery

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::auth::Credentials;
use crate::core::engine::SipCore;
use crate::core::message::Method;
use crate::core::notification::{Notification, NotificationKind, Observer, SenderId};
use crate::core::request::{Request, RequestState};
use crate::core::route::Route;
use crate::core::uri::SipUri;
use crate::error::{Error, Result};

/// A pager-mode instant message (one MESSAGE request)
pub struct Message {
    id: SenderId,
    core: SipCore,
    request: Arc<Request>,
    send_lock: Mutex<()>,
    weak_self: Weak<Message>,
}

impl Message {
    pub fn new(
        core: &SipCore,
        from_uri: SipUri,
        to_uri: SipUri,
        route: Route,
        content_type: impl Into<String>,
        body: impl Into<Bytes>,
        credentials: Option<Credentials>,
    ) -> Arc<Self> {
        let request = Request::builder(Method::Message, from_uri, to_uri.clone(), to_uri, route)
            .credentials(credentials)
            .content(content_type, body)
            .build(core);
        Arc::new_cyclic(|weak_self| Message {
            id: SenderId::next(),
            core: core.clone(),
            request,
            send_lock: Mutex::new(()),
            weak_self: weak_self.clone(),
        })
    }

    /// Send the message; a message can only be sent once
    pub fn send(&self, timeout: Option<Duration>) -> Result<()> {
        let _guard = self.send_lock.lock();
        if self.is_sent() {
            return Err(Error::AlreadySent);
        }
        let center = self.core.notification_center();
        let observer: Weak<dyn Observer> = self.weak_self.clone();
        center.add_observer(observer, None, Some(self.request.id()));
        if let Err(e) = self.request.send(timeout) {
            center.remove_observer(self, None, Some(self.request.id()));
            return Err(e);
        }
        debug!("MESSAGE from {} to {} sent", self.request.from_uri(), self.request.to_uri());
        Ok(())
    }

    pub fn end(&self) {
        self.request.end();
    }

    pub fn id(&self) -> SenderId {
        self.id
    }

    pub fn from_uri(&self) -> &SipUri {
        self.request.from_uri()
    }

    pub fn to_uri(&self) -> &SipUri {
        self.request.to_uri()
    }

    pub fn route(&self) -> &Route {
        self.request.route()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.request.content_type()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.request.body()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.request.credentials()
    }

    pub fn is_sent(&self) -> bool {
        self.request.state() != RequestState::Init
    }

    pub fn in_progress(&self) -> bool {
        self.request.state() == RequestState::InProgress
    }

    fn post(&self, kind: NotificationKind) {
        self.core.notification_center().post_notification(self.id, kind);
    }
}

impl Observer for Message {
    fn handle_notification(&self, notification: &Notification) {
        if notification.sender != self.request.id() {
            return;
        }
        match &notification.kind {
            NotificationKind::RequestDidSucceed { expires, .. } => {
                // A MESSAGE has no lifetime to refresh
                if *expires > 0 {
                    self.request.end();
                }
                self.post(NotificationKind::MessageDidSucceed {});
            }
            NotificationKind::RequestDidFail { code, reason, .. } => {
                self.post(NotificationKind::MessageDidFail {
                    code: *code,
                    reason: reason.clone(),
                });
            }
            NotificationKind::RequestDidEnd {} => {
                self.core
                    .notification_center()
                    .remove_observer(self, None, Some(self.request.id()));
            }
            _ => {}
        }
    }
}
