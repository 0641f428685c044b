//! REGISTER bindings kept alive by automatic refresh

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::core::auth::Credentials;
use crate::core::engine::SipCore;
use crate::core::message::Method;
use crate::core::notification::{Notification, NotificationKind, Observer, SenderId};
use crate::core::request::Request;
use crate::core::route::Route;
use crate::core::uri::{ContactHeader, SipUri};
use crate::error::Result;
use crate::primitives::Effects;

/// Default registration lifetime in seconds
pub const DEFAULT_REGISTRATION_DURATION: u32 = 300;

/// Keeps a contact registered for an address of record.
///
/// `current` is the REGISTER in flight; `last` is the request whose
/// binding is active.
pub struct Registration {
    id: SenderId,
    core: SipCore,
    uri: SipUri,
    credentials: Option<Credentials>,
    duration: u32,
    state: Mutex<RegistrationState>,
    weak_self: Weak<Registration>,
}

#[derive(Default)]
struct RegistrationState {
    current: Option<Arc<Request>>,
    last: Option<Arc<Request>>,
    unregistering: bool,
}

impl Registration {
    pub fn new(core: &SipCore, uri: SipUri, credentials: Option<Credentials>, duration: u32) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Registration {
            id: SenderId::next(),
            core: core.clone(),
            uri,
            credentials,
            duration,
            state: Mutex::new(RegistrationState::default()),
            weak_self: weak_self.clone(),
        })
    }

    /// Send a REGISTER binding `contact_uri`, replacing any request in flight
    pub fn register(&self, contact_uri: SipUri, route: Route, timeout: Option<Duration>) -> Result<()> {
        let (replaced, sent) = {
            let mut state = self.state.lock();
            self.make_and_send_request(&mut state, contact_uri, route, timeout, true)
        };
        if let Some(replaced) = replaced {
            replaced.end();
        }
        sent
    }

    /// Remove the active binding. Does nothing when not registered.
    pub fn end(&self, timeout: Option<Duration>) -> Result<()> {
        let (replaced, sent) = {
            let mut state = self.state.lock();
            let Some(last) = state.last.clone() else {
                return Ok(());
            };
            let contact_uri = last.contact_uri().cloned().unwrap_or_else(|| self.uri.clone());
            let route = last.route().clone();
            self.make_and_send_request(&mut state, contact_uri, route, timeout, false)
        };
        if let Some(replaced) = replaced {
            replaced.end();
        }
        sent?;
        self.post(NotificationKind::RegistrationWillEnd {});
        Ok(())
    }

    /// Returns the replaced in-flight request, to be ended once unlocked
    fn make_and_send_request(
        &self,
        state: &mut RegistrationState,
        contact_uri: SipUri,
        route: Route,
        timeout: Option<Duration>,
        do_register: bool,
    ) -> (Option<Arc<Request>>, Result<()>) {
        let previous = state.current.as_ref().or(state.last.as_ref());
        let (call_id, cseq) = match previous {
            Some(previous) => (Some(previous.call_id().to_string()), previous.cseq() + 1),
            None => (None, 1),
        };
        let expires = if do_register { self.duration } else { 0 };

        let mut builder = Request::builder(
            Method::Register,
            self.uri.clone(),
            self.uri.clone(),
            SipUri::new(self.uri.host.clone()),
            route,
        )
        .credentials(self.credentials.clone())
        .contact_uri(contact_uri)
        .cseq(cseq)
        .extra_header("Expires", expires.to_string());
        if let Some(call_id) = call_id {
            builder = builder.call_id(call_id);
        }
        let request = builder.build(&self.core);

        let center = self.core.notification_center();
        let observer: Weak<dyn Observer> = self.weak_self.clone();
        center.add_observer(observer, None, Some(request.id()));

        let replaced = state.current.take();
        let sent = request.send(timeout);
        match &sent {
            Ok(()) => {
                debug!(
                    "{} {} sent for {} (Expires {})",
                    if do_register { "REGISTER" } else { "Un-REGISTER" },
                    request.call_id(),
                    self.uri,
                    expires
                );
                state.unregistering = !do_register;
                state.current = Some(request);
            }
            Err(_) => {
                center.remove_observer(self, None, Some(request.id()));
            }
        }
        (replaced, sent)
    }

    fn on_success(&self, sender: SenderId, code: u16, reason: &str, contacts: Vec<ContactHeader>, expires: u32) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            if state.current.as_ref().map(|r| r.id()) != Some(sender) {
                return;
            }
            let Some(request) = state.current.take() else {
                return;
            };
            if state.unregistering {
                effects.end_all(state.last.take());
                info!("Registration of {} ended", self.uri);
                effects.post(NotificationKind::RegistrationDidEnd { expired: false });
            } else {
                let contact_uri = request.contact_uri().cloned().unwrap_or_else(|| self.uri.clone());
                let route = request.route().clone();
                effects.end_all(state.last.replace(request));
                info!("Registered {} at {} for {} seconds", contact_uri, self.uri, expires);
                effects.post(NotificationKind::RegistrationDidSucceed {
                    code,
                    reason: reason.to_string(),
                    contact_uri,
                    contact_uri_list: contacts,
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
            let reason = reason.to_string();
            if state.unregistering {
                effects.post(NotificationKind::RegistrationDidNotEnd { code, reason });
            } else {
                effects.post(NotificationKind::RegistrationDidFail {
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
            self.post(NotificationKind::RegistrationWillExpire { expires });
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
            effects.end_all(state.current.take());
            info!("Registration of {} expired", self.uri);
            effects.post(NotificationKind::RegistrationDidEnd { expired: true });
        }
        effects.apply(self.core.notification_center(), self.id);
    }

    fn post(&self, kind: NotificationKind) {
        self.core.notification_center().post_notification(self.id, kind);
    }

    /// Sender of this registration's notifications
    pub fn id(&self) -> SenderId {
        self.id
    }

    pub fn uri(&self) -> &SipUri {
        &self.uri
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().last.is_some()
    }

    /// Contact of the active binding
    pub fn contact_uri(&self) -> Option<SipUri> {
        self.state.lock().last.as_ref().and_then(|r| r.contact_uri().cloned())
    }

    pub fn expires_in(&self) -> u32 {
        self.state.lock().last.as_ref().map_or(0, |r| r.expires_in())
    }
}

impl Observer for Registration {
    fn handle_notification(&self, notification: &Notification) {
        let sender = notification.sender;
        match &notification.kind {
            NotificationKind::RequestDidSucceed {
                code,
                reason,
                headers,
                expires,
                ..
            } => {
                let contacts = headers
                    .get_list("Contact")
                    .into_iter()
                    .filter_map(|value| ContactHeader::parse(value).ok())
                    .collect();
                self.on_success(sender, *code, reason, contacts, *expires);
            }
            NotificationKind::RequestDidFail { code, reason, .. } => self.on_failure(sender, *code, reason),
            NotificationKind::RequestWillExpire { expires } => self.on_will_expire(sender, *expires),
            NotificationKind::RequestDidEnd {} => self.on_end(sender),
            _ => {}
        }
    }
}
