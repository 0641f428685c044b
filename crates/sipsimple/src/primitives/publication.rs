//! PUBLISH state tracked by entity tag, with automatic refresh

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::core::auth::Credentials;
use crate::core::engine::SipCore;
use crate::core::headers::Headers;
use crate::core::message::Method;
use crate::core::notification::{Notification, NotificationKind, Observer, SenderId};
use crate::core::request::Request;
use crate::core::route::Route;
use crate::core::uri::SipUri;
use crate::error::{Error, Result};
use crate::primitives::Effects;

/// Default publication lifetime in seconds
pub const DEFAULT_PUBLICATION_DURATION: u32 = 300;

/// Publishes event state (RFC 3903) for `uri`.
///
/// Refreshes without a body reuse the entity tag returned by the last
/// successful PUBLISH.
pub struct Publication {
    id: SenderId,
    core: SipCore,
    uri: SipUri,
    event: String,
    content_type: String,
    credentials: Option<Credentials>,
    duration: u32,
    state: Mutex<PublicationState>,
    weak_self: Weak<Publication>,
}

#[derive(Default)]
struct PublicationState {
    current: Option<Arc<Request>>,
    last: Option<Arc<Request>>,
    last_etag: Option<String>,
    unpublishing: bool,
}

impl Publication {
    pub fn new(
        core: &SipCore,
        uri: SipUri,
        event: impl Into<String>,
        content_type: impl Into<String>,
        credentials: Option<Credentials>,
        duration: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Publication {
            id: SenderId::next(),
            core: core.clone(),
            uri,
            event: event.into(),
            content_type: content_type.into(),
            credentials,
            duration,
            state: Mutex::new(PublicationState::default()),
            weak_self: weak_self.clone(),
        })
    }

    /// Publish `body`, or refresh the current publication when `body` is `None`
    pub fn publish(&self, body: Option<Bytes>, route: Route, timeout: Option<Duration>) -> Result<()> {
        let (replaced, sent) = {
            let mut state = self.state.lock();
            if body.is_none() {
                if state.last.is_none() {
                    return Err(Error::MissingBody);
                }
                if state.last_etag.is_none() {
                    return Err(Error::Publication("Cannot refresh, last ETag was invalid".into()));
                }
            }
            self.make_and_send_request(&mut state, body, route, timeout, true)
        };
        if let Some(replaced) = replaced {
            replaced.end();
        }
        sent
    }

    /// Remove the published state
    pub fn end(&self, timeout: Option<Duration>) -> Result<()> {
        let (replaced, sent) = {
            let mut state = self.state.lock();
            let Some(route) = state.last.as_ref().map(|r| r.route().clone()) else {
                return Err(Error::Publication("Nothing is currently published".into()));
            };
            self.make_and_send_request(&mut state, None, route, timeout, false)
        };
        if let Some(replaced) = replaced {
            replaced.end();
        }
        sent?;
        self.post(NotificationKind::PublicationWillEnd {});
        Ok(())
    }

    fn make_and_send_request(
        &self,
        state: &mut PublicationState,
        body: Option<Bytes>,
        route: Route,
        timeout: Option<Duration>,
        do_publish: bool,
    ) -> (Option<Arc<Request>>, Result<()>) {
        let expires = if do_publish { self.duration } else { 0 };
        let mut builder = Request::builder(
            Method::Publish,
            self.uri.clone(),
            self.uri.clone(),
            self.uri.clone(),
            route,
        )
        .credentials(self.credentials.clone())
        .cseq(1)
        .extra_header("Event", self.event.as_str())
        .extra_header("Expires", expires.to_string());
        if let Some(etag) = &state.last_etag {
            builder = builder.extra_header("SIP-If-Match", etag.as_str());
        }
        if let Some(body) = body {
            builder = builder.content(self.content_type.as_str(), body);
        }
        let request = builder.build(&self.core);

        let center = self.core.notification_center();
        let observer: Weak<dyn Observer> = self.weak_self.clone();
        center.add_observer(observer, None, Some(request.id()));

        let replaced = state.current.take();
        let sent = request.send(timeout);
        match &sent {
            Ok(()) => {
                debug!("PUBLISH for {} sent (Event {}, Expires {})", self.uri, self.event, expires);
                state.unpublishing = !do_publish;
                state.current = Some(request);
            }
            Err(_) => {
                center.remove_observer(self, None, Some(request.id()));
            }
        }
        (replaced, sent)
    }

    fn on_success(&self, sender: SenderId, code: u16, reason: &str, headers: &Headers, expires: u32) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            if state.current.as_ref().map(|r| r.id()) != Some(sender) {
                return;
            }
            let Some(request) = state.current.take() else {
                return;
            };
            if state.unpublishing {
                effects.end_all(state.last.take());
                state.last_etag = None;
                info!("Publication of {} for {} ended", self.event, self.uri);
                effects.post(NotificationKind::PublicationDidEnd { expired: false });
            } else {
                let route = request.route().clone();
                effects.end_all(state.last.replace(request));
                state.last_etag = headers.get("SIP-ETag").map(str::to_string);
                info!("Published {} for {} for {} seconds", self.event, self.uri, expires);
                effects.post(NotificationKind::PublicationDidSucceed {
                    code,
                    reason: reason.to_string(),
                    expires_in: expires,
                    route,
                });
            }
        }
        effects.apply(self.core.notification_center(), self.id);
    }

    fn on_failure(&self, sender: SenderId, code: u16, reason: &str) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            if state.current.as_ref().map(|r| r.id()) != Some(sender) {
                return;
            }
            let Some(request) = state.current.take() else {
                return;
            };
            // Conditional request failed: the entity tag is stale
            if code == 412 {
                state.last_etag = None;
            }
            let reason = reason.to_string();
            if state.unpublishing {
                effects.post(NotificationKind::PublicationDidNotEnd { code, reason });
            } else {
                effects.post(NotificationKind::PublicationDidFail {
                    code,
                    reason,
                    route: request.route().clone(),
                });
            }
        }
        effects.apply(self.core.notification_center(), self.id);
    }

    fn on_will_expire(&self, sender: SenderId, expires: u32) {
        let is_last = self.state.lock().last.as_ref().map(|r| r.id()) == Some(sender);
        if is_last {
            self.post(NotificationKind::PublicationWillExpire { expires });
        }
    }

    fn on_end(&self, sender: SenderId) {
        self.core
            .notification_center()
            .remove_observer(self, None, Some(sender));

        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            if state.last.as_ref().map(|r| r.id()) != Some(sender) {
                return;
            }
            state.last = None;
            state.last_etag = None;
            effects.end_all(state.current.take());
            info!("Publication of {} for {} expired", self.event, self.uri);
            effects.post(NotificationKind::PublicationDidEnd { expired: true });
        }
        effects.apply(self.core.notification_center(), self.id);
    }

    fn post(&self, kind: NotificationKind) {
        self.core.notification_center().post_notification(self.id, kind);
    }

    pub fn id(&self) -> SenderId {
        self.id
    }

    pub fn uri(&self) -> &SipUri {
        &self.uri
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn is_published(&self) -> bool {
        self.state.lock().last.is_some()
    }

    /// Entity tag of the current publication, if the server returned one
    pub fn etag(&self) -> Option<String> {
        self.state.lock().last_etag.clone()
    }

    pub fn expires_in(&self) -> u32 {
        self.state.lock().last.as_ref().map_or(0, |r| r.expires_in())
    }
}

impl Observer for Publication {
    fn handle_notification(&self, notification: &Notification) {
        let sender = notification.sender;
        match &notification.kind {
            NotificationKind::RequestDidSucceed {
                code,
                reason,
                headers,
                expires,
                ..
            } => self.on_success(sender, *code, reason, headers, *expires),
            NotificationKind::RequestDidFail { code, reason, .. } => self.on_failure(sender, *code, reason),
            NotificationKind::RequestWillExpire { expires } => self.on_will_expire(sender, *expires),
            NotificationKind::RequestDidEnd {} => self.on_end(sender),
            _ => {}
        }
    }
}
