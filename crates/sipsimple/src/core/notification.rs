//! Notification center
//!
//! Every component of the library reports what happens to it by posting a
//! [`Notification`]: requests post `SIPRequest*` notifications, the
//! primitives built on them observe those and post their own
//! (`SIPRegistration*`, `SIPMessage*`, `SIPPublication*`).
//!
//! Observers are registered with optional name and sender filters and are
//! called synchronously, in registration order, from the task that posts.
//! No lock is held while an observer runs, so observers may post, add or
//! remove observers themselves. Every notification is also published on a
//! broadcast channel for consumers that prefer a stream.
//!
//! ```rust
//! use std::sync::Arc;
//! use sipsimple::core::notification::{NotificationCenter, NotificationKind, Observer, ObserverFn, SenderId};
//!
//! let center = NotificationCenter::new();
//! let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let observer: Arc<dyn Observer> = Arc::new(ObserverFn::new(move |n: &sipsimple::core::notification::Notification| {
//!     sink.lock().push(n.name());
//! }));
//! center.add_observer(Arc::downgrade(&observer), Some("SIPMessageDidSucceed"), None);
//!
//! center.post_notification(SenderId::next(), NotificationKind::MessageDidSucceed {});
//! center.post_notification(SenderId::next(), NotificationKind::RequestDidEnd {});
//! assert_eq!(*seen.lock(), vec!["SIPMessageDidSucceed"]);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::core::headers::Headers;
use crate::core::route::Route;
use crate::core::uri::{ContactHeader, SipUri};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Identity of an object that posts notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SenderId(u64);

impl SenderId {
    /// Allocate a process-wide unique sender id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SenderId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload of a notification; the variant determines the notification name
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", content = "data")]
pub enum NotificationKind {
    #[serde(rename = "SIPRequestDidSucceed")]
    RequestDidSucceed {
        code: u16,
        reason: String,
        headers: Headers,
        body: Option<String>,
        expires: u32,
    },
    #[serde(rename = "SIPRequestDidFail")]
    RequestDidFail {
        code: u16,
        reason: String,
        headers: Option<Headers>,
        body: Option<String>,
    },
    #[serde(rename = "SIPRequestWillExpire")]
    RequestWillExpire { expires: u32 },
    #[serde(rename = "SIPRequestDidEnd")]
    RequestDidEnd {},

    #[serde(rename = "SIPRegistrationDidSucceed")]
    RegistrationDidSucceed {
        code: u16,
        reason: String,
        contact_uri: SipUri,
        contact_uri_list: Vec<ContactHeader>,
        expires_in: u32,
        route: Route,
    },
    #[serde(rename = "SIPRegistrationDidFail")]
    RegistrationDidFail { code: u16, reason: String, route: Route },
    #[serde(rename = "SIPRegistrationWillExpire")]
    RegistrationWillExpire { expires: u32 },
    #[serde(rename = "SIPRegistrationWillEnd")]
    RegistrationWillEnd {},
    #[serde(rename = "SIPRegistrationDidEnd")]
    RegistrationDidEnd { expired: bool },
    #[serde(rename = "SIPRegistrationDidNotEnd")]
    RegistrationDidNotEnd { code: u16, reason: String },

    #[serde(rename = "SIPMessageDidSucceed")]
    MessageDidSucceed {},
    #[serde(rename = "SIPMessageDidFail")]
    MessageDidFail { code: u16, reason: String },

    #[serde(rename = "SIPPublicationDidSucceed")]
    PublicationDidSucceed {
        code: u16,
        reason: String,
        expires_in: u32,
        route: Route,
    },
    #[serde(rename = "SIPPublicationDidFail")]
    PublicationDidFail { code: u16, reason: String, route: Route },
    #[serde(rename = "SIPPublicationWillExpire")]
    PublicationWillExpire { expires: u32 },
    #[serde(rename = "SIPPublicationWillEnd")]
    PublicationWillEnd {},
    #[serde(rename = "SIPPublicationDidEnd")]
    PublicationDidEnd { expired: bool },
    #[serde(rename = "SIPPublicationDidNotEnd")]
    PublicationDidNotEnd { code: u16, reason: String },

    #[serde(rename = "WaveFileDidFinishPlaying")]
    WaveFileDidFinishPlaying {},
}

impl NotificationKind {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationKind::RequestDidSucceed { .. } => "SIPRequestDidSucceed",
            NotificationKind::RequestDidFail { .. } => "SIPRequestDidFail",
            NotificationKind::RequestWillExpire { .. } => "SIPRequestWillExpire",
            NotificationKind::RequestDidEnd {} => "SIPRequestDidEnd",
            NotificationKind::RegistrationDidSucceed { .. } => "SIPRegistrationDidSucceed",
            NotificationKind::RegistrationDidFail { .. } => "SIPRegistrationDidFail",
            NotificationKind::RegistrationWillExpire { .. } => "SIPRegistrationWillExpire",
            NotificationKind::RegistrationWillEnd {} => "SIPRegistrationWillEnd",
            NotificationKind::RegistrationDidEnd { .. } => "SIPRegistrationDidEnd",
            NotificationKind::RegistrationDidNotEnd { .. } => "SIPRegistrationDidNotEnd",
            NotificationKind::MessageDidSucceed {} => "SIPMessageDidSucceed",
            NotificationKind::MessageDidFail { .. } => "SIPMessageDidFail",
            NotificationKind::PublicationDidSucceed { .. } => "SIPPublicationDidSucceed",
            NotificationKind::PublicationDidFail { .. } => "SIPPublicationDidFail",
            NotificationKind::PublicationWillExpire { .. } => "SIPPublicationWillExpire",
            NotificationKind::PublicationWillEnd {} => "SIPPublicationWillEnd",
            NotificationKind::PublicationDidEnd { .. } => "SIPPublicationDidEnd",
            NotificationKind::PublicationDidNotEnd { .. } => "SIPPublicationDidNotEnd",
            NotificationKind::WaveFileDidFinishPlaying {} => "WaveFileDidFinishPlaying",
        }
    }
}

/// A posted notification
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub sender: SenderId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl Notification {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Receives notifications from a [`NotificationCenter`]
pub trait Observer: Send + Sync {
    fn handle_notification(&self, notification: &Notification);
}

/// Observer backed by a closure
pub struct ObserverFn<F> {
    callback: F,
}

impl<F> ObserverFn<F>
where
    F: Fn(&Notification) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Observer for ObserverFn<F>
where
    F: Fn(&Notification) + Send + Sync,
{
    fn handle_notification(&self, notification: &Notification) {
        (self.callback)(notification)
    }
}

struct ObserverEntry {
    observer: Weak<dyn Observer>,
    name: Option<&'static str>,
    sender: Option<SenderId>,
}

impl ObserverEntry {
    fn is(&self, observer: *const ()) -> bool {
        std::ptr::eq(Weak::as_ptr(&self.observer) as *const (), observer)
    }

    fn matches(&self, notification: &Notification) -> bool {
        self.name.map_or(true, |name| name == notification.name())
            && self.sender.map_or(true, |sender| sender == notification.sender)
    }
}

/// Dispatches notifications to observers and subscribers
pub struct NotificationCenter {
    observers: RwLock<Vec<ObserverEntry>>,
    events_tx: broadcast::Sender<Notification>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a center whose broadcast channel buffers `capacity` notifications
    pub fn with_capacity(capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            observers: RwLock::new(Vec::new()),
            events_tx,
        }
    }

    /// Register `observer` for notifications matching the optional name and
    /// sender filters. The center only keeps a weak reference; registering
    /// the same observer with the same filters twice has no effect.
    pub fn add_observer(&self, observer: Weak<dyn Observer>, name: Option<&'static str>, sender: Option<SenderId>) {
        let mut observers = self.observers.write();
        let key = Weak::as_ptr(&observer) as *const ();
        if observers
            .iter()
            .any(|entry| entry.is(key) && entry.name == name && entry.sender == sender)
        {
            return;
        }
        observers.push(ObserverEntry { observer, name, sender });
    }

    /// Remove a registration made with the same filters. Returns whether one was found.
    pub fn remove_observer(&self, observer: &dyn Observer, name: Option<&'static str>, sender: Option<SenderId>) -> bool {
        let key = observer as *const dyn Observer as *const ();
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|entry| !(entry.is(key) && entry.name == name && entry.sender == sender));
        observers.len() != before
    }

    /// Deliver a notification to every matching observer, then to subscribers
    pub fn post_notification(&self, sender: SenderId, kind: NotificationKind) {
        let notification = Notification {
            sender,
            timestamp: Utc::now(),
            kind,
        };

        let targets: Vec<Arc<dyn Observer>> = {
            let mut observers = self.observers.write();
            observers.retain(|entry| entry.observer.strong_count() > 0);
            observers
                .iter()
                .filter(|entry| entry.matches(&notification))
                .filter_map(|entry| entry.observer.upgrade())
                .collect()
        };

        trace!(
            "Posting {} from {} to {} observer(s)",
            notification.name(),
            sender,
            targets.len()
        );
        for observer in targets {
            observer.handle_notification(&notification);
        }

        // Nobody listening is fine
        let _ = self.events_tx.send(notification);
    }

    /// Stream of every notification posted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events_tx.subscribe()
    }

    /// Number of live observer registrations
    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .iter()
            .filter(|entry| entry.observer.strong_count() > 0)
            .count()
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<dyn Observer>, Arc<Mutex<Vec<(SenderId, &'static str)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn Observer> = Arc::new(ObserverFn::new(move |n: &Notification| {
            sink.lock().push((n.sender, n.name()));
        }));
        (observer, seen)
    }

    #[test]
    fn filters_by_name_and_sender() {
        let center = NotificationCenter::new();
        let (observer, seen) = recorder();
        let a = SenderId::next();
        let b = SenderId::next();
        center.add_observer(Arc::downgrade(&observer), None, Some(a));

        center.post_notification(a, NotificationKind::RequestDidEnd {});
        center.post_notification(b, NotificationKind::RequestDidEnd {});
        center.post_notification(a, NotificationKind::MessageDidSucceed {});

        assert_eq!(
            *seen.lock(),
            vec![(a, "SIPRequestDidEnd"), (a, "SIPMessageDidSucceed")]
        );
    }

    #[test]
    fn duplicate_registration_is_ignored_and_removal_matches_filters() {
        let center = NotificationCenter::new();
        let (observer, seen) = recorder();
        let sender = SenderId::next();
        center.add_observer(Arc::downgrade(&observer), None, Some(sender));
        center.add_observer(Arc::downgrade(&observer), None, Some(sender));
        assert_eq!(center.observer_count(), 1);

        assert!(!center.remove_observer(observer.as_ref(), Some("SIPRequestDidEnd"), Some(sender)));
        assert!(center.remove_observer(observer.as_ref(), None, Some(sender)));
        center.post_notification(sender, NotificationKind::RequestDidEnd {});
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let center = NotificationCenter::new();
        let (observer, _) = recorder();
        center.add_observer(Arc::downgrade(&observer), None, None);
        drop(observer);
        center.post_notification(SenderId::next(), NotificationKind::RequestDidEnd {});
        assert_eq!(center.observer_count(), 0);
    }

    #[test]
    fn observers_may_reenter_the_center() {
        let center = Arc::new(NotificationCenter::new());
        let (inner, seen) = recorder();
        let reposting_center = center.clone();
        let reposter: Arc<dyn Observer> = Arc::new(ObserverFn::new(move |n: &Notification| {
            if n.name() == "SIPRequestDidEnd" {
                reposting_center.post_notification(n.sender, NotificationKind::MessageDidSucceed {});
            }
        }));
        center.add_observer(Arc::downgrade(&reposter), Some("SIPRequestDidEnd"), None);
        center.add_observer(Arc::downgrade(&inner), None, None);

        let sender = SenderId::next();
        center.post_notification(sender, NotificationKind::RequestDidEnd {});
        assert_eq!(
            *seen.lock(),
            vec![(sender, "SIPMessageDidSucceed"), (sender, "SIPRequestDidEnd")]
        );
    }

    #[tokio::test]
    async fn subscribers_receive_everything() {
        let center = NotificationCenter::new();
        let mut events = center.subscribe();
        let sender = SenderId::next();
        center.post_notification(sender, NotificationKind::RequestWillExpire { expires: 30 });

        let notification = events.recv().await.unwrap();
        assert_eq!(notification.kind, NotificationKind::RequestWillExpire { expires: 30 });
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["name"], "SIPRequestWillExpire");
        assert_eq!(json["data"]["expires"], 30);
    }

    #[test]
    fn payloadless_notifications_carry_empty_data() {
        for kind in [
            NotificationKind::RequestDidEnd {},
            NotificationKind::RegistrationWillEnd {},
            NotificationKind::PublicationWillEnd {},
            NotificationKind::MessageDidSucceed {},
            NotificationKind::WaveFileDidFinishPlaying {},
        ] {
            let notification = Notification {
                sender: SenderId::next(),
                timestamp: Utc::now(),
                kind,
            };
            let json = serde_json::to_value(&notification).unwrap();
            assert_eq!(json["name"], notification.name());
            assert_eq!(json["data"], serde_json::json!({}));
            assert!(json["timestamp"].is_string());
        }
    }
}
