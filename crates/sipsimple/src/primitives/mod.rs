//! High level SIP SIMPLE primitives built on [`Request`]
//!
//! Each primitive observes the notifications of its own requests and
//! translates them into `SIPRegistration*`, `SIPMessage*` or
//! `SIPPublication*` notifications sent under its own [`SenderId`].
//! Observers run synchronously, so primitives never end requests or post
//! notifications while holding their state lock; they collect [`Effects`]
//! and apply them once the lock is released.

pub mod message;
pub mod publication;
pub mod registration;

use std::sync::Arc;

use crate::core::notification::{NotificationCenter, NotificationKind, SenderId};
use crate::core::request::Request;

pub use message::Message;
pub use publication::Publication;
pub use registration::Registration;

/// Requests to end and notifications to post, in that order
#[derive(Default)]
pub(crate) struct Effects {
    to_end: Vec<Arc<Request>>,
    to_post: Vec<NotificationKind>,
}

impl Effects {
    pub(crate) fn end(&mut self, request: Arc<Request>) {
        self.to_end.push(request);
    }

    pub(crate) fn end_all(&mut self, requests: impl IntoIterator<Item = Arc<Request>>) {
        self.to_end.extend(requests);
    }

    pub(crate) fn post(&mut self, kind: NotificationKind) {
        self.to_post.push(kind);
    }

    pub(crate) fn apply(self, center: &NotificationCenter, sender: SenderId) {
        for request in self.to_end {
            request.end();
        }
        for kind in self.to_post {
            center.post_notification(sender, kind);
        }
    }
}
