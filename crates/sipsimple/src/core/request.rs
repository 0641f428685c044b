//! Non-INVITE client requests with an optional refresh lifetime

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::auth::{Credentials, DigestChallenge};
use crate::core::engine::SipCore;
use crate::core::headers::Headers;
use crate::core::message::{Method, OutgoingRequest, SipResponse};
use crate::core::notification::{NotificationKind, SenderId};
use crate::core::route::Route;
use crate::core::uri::{ContactHeader, SipUri};
use crate::error::{Error, Result};

/// Lower bound of the `SIPRequestWillExpire` warning, in seconds
const MAX_EXPIRE_WARNING: u32 = 30;

/// Lifecycle of a [`Request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Init,
    InProgress,
    Expiring,
    Terminated,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Init => "INIT",
            RequestState::InProgress => "IN_PROGRESS",
            RequestState::Expiring => "EXPIRING",
            RequestState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Builder for [`Request`]
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    from_uri: SipUri,
    to_uri: SipUri,
    request_uri: SipUri,
    route: Route,
    credentials: Option<Credentials>,
    contact_uri: Option<SipUri>,
    call_id: Option<String>,
    cseq: u32,
    extra_headers: Headers,
    content: Option<(String, Bytes)>,
}

impl RequestBuilder {
    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn contact_uri(mut self, contact_uri: SipUri) -> Self {
        self.contact_uri = Some(contact_uri);
        self
    }

    /// Reuse a Call-ID; a fresh one is generated otherwise
    pub fn call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn cseq(mut self, cseq: u32) -> Self {
        self.cseq = cseq;
        self
    }

    pub fn extra_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.extra_headers.push(name, value);
        self
    }

    pub fn content(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content = Some((content_type.into(), body.into()));
        self
    }

    pub fn build(self, core: &SipCore) -> Arc<Request> {
        let call_id = self
            .call_id
            .unwrap_or_else(|| format!("{}@{}", Uuid::new_v4().simple(), self.from_uri.host));
        let (content_type, body) = match self.content {
            Some((content_type, body)) => (Some(content_type), Some(body)),
            None => (None, None),
        };
        Arc::new(Request {
            id: SenderId::next(),
            core: core.clone(),
            method: self.method,
            from_uri: self.from_uri,
            to_uri: self.to_uri,
            request_uri: self.request_uri,
            route: self.route,
            credentials: self.credentials,
            contact_uri: self.contact_uri,
            call_id,
            from_tag: random_token(10),
            extra_headers: self.extra_headers,
            content_type,
            body,
            inner: Mutex::new(RequestInner {
                state: RequestState::Init,
                cseq: self.cseq,
                expires_at: None,
                task: None,
            }),
        })
    }
}

/// A single SIP request. Outcomes are posted to the core's notification
/// center with the request's [`SenderId`] as sender:
/// `SIPRequestDidSucceed` or `SIPRequestDidFail`, optionally
/// `SIPRequestWillExpire`, and exactly one `SIPRequestDidEnd` once sent.
pub struct Request {
    id: SenderId,
    core: SipCore,
    method: Method,
    from_uri: SipUri,
    to_uri: SipUri,
    request_uri: SipUri,
    route: Route,
    credentials: Option<Credentials>,
    contact_uri: Option<SipUri>,
    call_id: String,
    from_tag: String,
    extra_headers: Headers,
    content_type: Option<String>,
    body: Option<Bytes>,
    inner: Mutex<RequestInner>,
}

struct RequestInner {
    state: RequestState,
    cseq: u32,
    expires_at: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

impl Request {
    pub fn builder(method: Method, from_uri: SipUri, to_uri: SipUri, request_uri: SipUri, route: Route) -> RequestBuilder {
        RequestBuilder {
            method,
            from_uri,
            to_uri,
            request_uri,
            route,
            credentials: None,
            contact_uri: None,
            call_id: None,
            cseq: 1,
            extra_headers: Headers::new(),
            content: None,
        }
    }

    /// Start the transaction. `timeout` defaults to the core's request timeout.
    pub fn send(self: &Arc<Self>, timeout: Option<Duration>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::invalid_state("requests can only be sent from within a tokio runtime"))?;
        let mut inner = self.inner.lock();
        if inner.state != RequestState::Init {
            return Err(Error::invalid_state(format!(
                "cannot send a {} request in state {}",
                self.method, inner.state
            )));
        }
        inner.state = RequestState::InProgress;
        let timeout = timeout.unwrap_or_else(|| self.core.request_timeout());
        let request = Arc::clone(self);
        inner.task = Some(runtime.spawn(async move { request.run(timeout).await }));
        Ok(())
    }

    /// Stop the request. Posts `SIPRequestDidEnd` if it was in flight or
    /// expiring.
    pub fn end(&self) {
        let (previous, task) = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            if previous == RequestState::Terminated {
                return;
            }
            inner.state = RequestState::Terminated;
            inner.expires_at = None;
            (previous, inner.task.take())
        };
        if let Some(task) = task {
            task.abort();
        }
        if previous != RequestState::Init {
            debug!("{} request {} ended in state {}", self.method, self.call_id, previous);
            self.post(NotificationKind::RequestDidEnd {});
        }
    }

    async fn run(self: Arc<Self>, timeout: Duration) {
        match self.transact(timeout).await {
            Ok(response) if response.is_success() => self.succeed(response).await,
            Ok(response) => {
                let body = response.body_text();
                self.fail(response.code, response.reason, Some(response.headers), body);
            }
            Err(Error::Timeout { .. }) => self.fail(408, "Request Timeout".into(), None, None),
            Err(e) => self.fail(503, e.to_string(), None, None),
        }
    }

    async fn transact(&self, timeout: Duration) -> Result<SipResponse> {
        let deadline = Instant::now() + timeout;
        let mut authorization: Option<(&'static str, String)> = None;
        let mut nonce_count = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout {
                    millis: timeout.as_millis() as u64,
                });
            }
            let outgoing = self.build_outgoing(authorization.as_ref());
            debug!("Sending {} {} (CSeq {})", self.method, self.request_uri, self.cseq());
            let response = self
                .core
                .transport()
                .send_request(&outgoing, &self.route, remaining)
                .await?;

            if authorization.is_none() && matches!(response.code, 401 | 407) {
                if let Some(value) = self.answer_challenge(&response, nonce_count + 1) {
                    nonce_count += 1;
                    let header = if response.code == 401 {
                        "Authorization"
                    } else {
                        "Proxy-Authorization"
                    };
                    authorization = Some((header, value));
                    self.inner.lock().cseq += 1;
                    continue;
                }
            }
            return Ok(response);
        }
    }

    fn answer_challenge(&self, response: &SipResponse, nonce_count: u32) -> Option<String> {
        let credentials = self.credentials.as_ref()?;
        let header = if response.code == 401 {
            "WWW-Authenticate"
        } else {
            "Proxy-Authenticate"
        };
        let challenge = response
            .headers
            .get_all(header)
            .into_iter()
            .filter_map(|value| DigestChallenge::parse(value).ok())
            .find(|challenge| credentials.accepts_realm(&challenge.realm))?;
        match credentials.authorize(&challenge, &self.method, &self.request_uri.to_string(), nonce_count) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cannot answer challenge for realm {}: {}", challenge.realm, e);
                None
            }
        }
    }

    fn build_outgoing(&self, authorization: Option<&(&'static str, String)>) -> OutgoingRequest {
        let mut request = OutgoingRequest::new(self.method.clone(), self.request_uri.clone());
        let headers = &mut request.headers;
        headers.push("Max-Forwards", "70");
        headers.push("From", format!("<{}>;tag={}", self.from_uri, self.from_tag));
        headers.push("To", format!("<{}>", self.to_uri));
        headers.push("Call-ID", self.call_id.as_str());
        headers.push("CSeq", format!("{} {}", self.cseq(), self.method));
        if let Some(contact) = &self.contact_uri {
            headers.push("Contact", format!("<{}>", contact));
        }
        if let Some((name, value)) = authorization {
            headers.push(name, value.as_str());
        }
        headers.push("User-Agent", self.core.user_agent());
        for (name, value) in self.extra_headers.iter() {
            headers.push(name, value);
        }
        if let (Some(content_type), Some(body)) = (&self.content_type, &self.body) {
            headers.push("Content-Type", content_type.as_str());
            request.body = body.clone();
        }
        request
    }

    async fn succeed(&self, response: SipResponse) {
        let expires = self.compute_expires(&response);
        let expires_at = {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::InProgress {
                return;
            }
            if expires > 0 {
                let at = Instant::now() + Duration::from_secs(u64::from(expires));
                inner.state = RequestState::Expiring;
                inner.expires_at = Some(at);
                Some(at)
            } else {
                inner.state = RequestState::Terminated;
                None
            }
        };

        info!(
            "{} request {} succeeded with {} {} (expires {})",
            self.method, self.call_id, response.code, response.reason, expires
        );
        let body = response.body_text();
        self.post(NotificationKind::RequestDidSucceed {
            code: response.code,
            reason: response.reason,
            headers: response.headers,
            body,
            expires,
        });

        let Some(expires_at) = expires_at else {
            self.post(NotificationKind::RequestDidEnd {});
            return;
        };

        let warning = (expires / 2).min(MAX_EXPIRE_WARNING);
        sleep_until(expires_at - Duration::from_secs(u64::from(warning))).await;
        if self.state() != RequestState::Expiring {
            return;
        }
        self.post(NotificationKind::RequestWillExpire { expires: warning });

        sleep_until(expires_at).await;
        {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Expiring {
                return;
            }
            inner.state = RequestState::Terminated;
            inner.expires_at = None;
        }
        info!("{} request {} expired", self.method, self.call_id);
        self.post(NotificationKind::RequestDidEnd {});
    }

    fn fail(&self, code: u16, reason: String, headers: Option<Headers>, body: Option<String>) {
        {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::InProgress {
                return;
            }
            inner.state = RequestState::Terminated;
        }
        warn!("{} request {} failed: {} {}", self.method, self.call_id, code, reason);
        self.post(NotificationKind::RequestDidFail {
            code,
            reason,
            headers,
            body,
        });
        self.post(NotificationKind::RequestDidEnd {});
    }

    /// Lifetime granted by the peer; only requests carrying `Expires` have one
    fn compute_expires(&self, response: &SipResponse) -> u32 {
        let Some(requested) = self.extra_headers.get("Expires").and_then(|v| v.trim().parse::<u32>().ok()) else {
            return 0;
        };
        if requested == 0 {
            return 0;
        }
        if self.method == Method::Register {
            if let Some(own) = &self.contact_uri {
                let granted = response
                    .headers
                    .get_list("Contact")
                    .into_iter()
                    .filter_map(|value| ContactHeader::parse(value).ok())
                    .find(|contact| contact.uri.matches_contact(own))
                    .and_then(|contact| contact.expires());
                if let Some(granted) = granted {
                    return granted;
                }
            }
        }
        response
            .headers
            .get("Expires")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(requested)
    }

    fn post(&self, kind: NotificationKind) {
        self.core.notification_center().post_notification(self.id, kind);
    }

    pub fn id(&self) -> SenderId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.inner.lock().state
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn from_uri(&self) -> &SipUri {
        &self.from_uri
    }

    pub fn to_uri(&self) -> &SipUri {
        &self.to_uri
    }

    pub fn request_uri(&self) -> &SipUri {
        &self.request_uri
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn contact_uri(&self) -> Option<&SipUri> {
        self.contact_uri.as_ref()
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// CSeq of the last transmission
    pub fn cseq(&self) -> u32 {
        self.inner.lock().cseq
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn extra_headers(&self) -> &Headers {
        &self.extra_headers
    }

    /// Seconds left while expiring, else 0
    pub fn expires_in(&self) -> u32 {
        let inner = self.inner.lock();
        match (inner.state, inner.expires_at) {
            (RequestState::Expiring, Some(at)) => {
                at.saturating_duration_since(Instant::now()).as_secs().min(u64::from(u32::MAX)) as u32
            }
            _ => 0,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("request_uri", &self.request_uri)
            .field("call_id", &self.call_id)
            .field("state", &self.state())
            .finish()
    }
}
