mod common;

use std::time::Duration;

use common::{Events, ok, route, scripted_core, uri};
use sipsimple::core::transport::ScriptedReply;
use sipsimple::core::{Method, Request, RequestState, SipResponse};
use sipsimple::{Credentials, NotificationKind};
use tokio::time::Instant;

fn register(core: &sipsimple::SipCore, expires: u32) -> std::sync::Arc<Request> {
    Request::builder(
        Method::Register,
        uri("sip:alice@example.com"),
        uri("sip:alice@example.com"),
        uri("sip:example.com"),
        route(),
    )
    .credentials(Some(Credentials::new("alice", "secret")))
    .contact_uri(uri("sip:alice@10.0.0.1:5060"))
    .extra_header("Expires", expires.to_string())
    .build(core)
}

#[tokio::test(start_paused = true)]
async fn success_expires_with_warning() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push_response(ok().with_header("Expires", "60"));

    let request = register(&core, 3600);
    let started = Instant::now();
    request.send(None).unwrap();

    let succeeded = events.next_named("SIPRequestDidSucceed").await;
    assert_eq!(succeeded.sender, request.id());
    let NotificationKind::RequestDidSucceed { code, expires, .. } = succeeded.kind else {
        panic!("unexpected payload");
    };
    assert_eq!(code, 200);
    assert_eq!(expires, 60);
    assert_eq!(request.state(), RequestState::Expiring);
    assert!(request.expires_in() <= 60 && request.expires_in() >= 59);

    let warning = events.next_named("SIPRequestWillExpire").await;
    assert_eq!(warning.kind, NotificationKind::RequestWillExpire { expires: 30 });
    assert_eq!(started.elapsed().as_secs(), 30);

    events.next_named("SIPRequestDidEnd").await;
    assert_eq!(started.elapsed().as_secs(), 60);
    assert_eq!(request.state(), RequestState::Terminated);
    assert_eq!(request.expires_in(), 0);
}

#[tokio::test(start_paused = true)]
async fn short_lifetime_warns_at_half() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push_response(ok());

    let request = register(&core, 20);
    let started = Instant::now();
    request.send(None).unwrap();

    let warning = events.next_named("SIPRequestWillExpire").await;
    assert_eq!(warning.kind, NotificationKind::RequestWillExpire { expires: 10 });
    assert_eq!(started.elapsed().as_secs(), 10);
}

#[tokio::test(start_paused = true)]
async fn answers_one_digest_challenge() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push_response(
        SipResponse::new(401, "Unauthorized")
            .with_header("WWW-Authenticate", "Digest realm=\"example.com\", nonce=\"abc\", qop=\"auth\""),
    );
    transport.push_response(ok());

    let request = register(&core, 0);
    request.send(None).unwrap();
    events.next_named("SIPRequestDidSucceed").await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].headers.get("Authorization").is_none());
    let authorization = requests[1].headers.get("Authorization").unwrap();
    assert!(authorization.starts_with("Digest username=\"alice\", realm=\"example.com\""));
    assert_eq!(requests[1].headers.get("CSeq"), Some("2 REGISTER"));
    assert_eq!(requests[0].call_id(), requests[1].call_id());
    assert_eq!(request.cseq(), 2);
}

#[tokio::test(start_paused = true)]
async fn second_challenge_is_a_failure() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    let challenge =
        SipResponse::new(407, "Proxy Authentication Required").with_header("Proxy-Authenticate", "Digest realm=\"p\", nonce=\"1\"");
    transport.push_response(challenge.clone());
    transport.push_response(challenge);

    let request = register(&core, 300);
    request.send(None).unwrap();
    let failed = events.next_named("SIPRequestDidFail").await;
    let NotificationKind::RequestDidFail { code, headers, .. } = failed.kind else {
        panic!("unexpected payload");
    };
    assert_eq!(code, 407);
    assert!(headers.unwrap().contains("Proxy-Authenticate"));
    assert!(transport.requests()[1].headers.contains("Proxy-Authorization"));
    events.next_named("SIPRequestDidEnd").await;
}

#[tokio::test(start_paused = true)]
async fn challenge_without_credentials_fails() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push_response(SipResponse::new(401, "Unauthorized").with_header("WWW-Authenticate", "Digest realm=\"r\", nonce=\"n\""));

    let request = Request::builder(Method::Message, uri("sip:a@x"), uri("sip:b@x"), uri("sip:b@x"), route())
        .content("text/plain", "hi")
        .build(&core);
    request.send(None).unwrap();
    let failed = events.next_named("SIPRequestDidFail").await;
    assert!(matches!(failed.kind, NotificationKind::RequestDidFail { code: 401, .. }));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_and_transport_errors() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push(ScriptedReply::Silence);
    transport.push(ScriptedReply::Fail("network unreachable".into()));

    let first = register(&core, 300);
    first.send(Some(Duration::from_secs(5))).unwrap();
    let failed = events.next_named("SIPRequestDidFail").await;
    assert_eq!(
        failed.kind,
        NotificationKind::RequestDidFail {
            code: 408,
            reason: "Request Timeout".into(),
            headers: None,
            body: None,
        }
    );
    events.next_named("SIPRequestDidEnd").await;

    let second = register(&core, 300);
    second.send(None).unwrap();
    let failed = events.next_named("SIPRequestDidFail").await;
    let NotificationKind::RequestDidFail { code, reason, .. } = failed.kind else {
        panic!("unexpected payload");
    };
    assert_eq!(code, 503);
    assert!(reason.contains("network unreachable"));
}

#[tokio::test(start_paused = true)]
async fn did_end_is_posted_exactly_once() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push_response(ok());

    let request = register(&core, 120);
    request.send(None).unwrap();
    events.next_named("SIPRequestDidSucceed").await;

    request.end();
    request.end();
    tokio::time::sleep(Duration::from_secs(600)).await;
    events.drain();
    assert_eq!(events.count("SIPRequestDidEnd"), 1);
    assert_eq!(events.count("SIPRequestWillExpire"), 0);
}

#[tokio::test(start_paused = true)]
async fn ending_in_flight_request_aborts_it() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push(ScriptedReply::Delayed(Duration::from_secs(2), ok()));

    let request = register(&core, 300);
    request.send(None).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(request.state(), RequestState::InProgress);
    request.end();

    tokio::time::sleep(Duration::from_secs(5)).await;
    events.drain();
    assert_eq!(events.names(), vec!["SIPRequestDidEnd"]);
}

#[tokio::test]
async fn unsent_request_ends_silently() {
    let (core, _transport) = scripted_core();
    let mut events = Events::new(&core);
    let request = register(&core, 300);
    request.end();
    assert_eq!(request.state(), RequestState::Terminated);
    assert!(request.send(None).is_err());
    events.drain();
    assert!(events.seen.is_empty());
}

#[tokio::test(start_paused = true)]
async fn non_ascii_contacts_in_the_answer_are_skipped() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push_response(
        ok().with_header("Contact", "<sipé@10.0.0.1>;expires=60, <sip:alice@10.0.0.1:5060>;expires=90")
            .with_header("Expires", "45"),
    );
    transport.push_response(ok().with_header("Contact", "\"Ålice\" <sip:alicé@10.0.0.1>;expires=60"));

    let request = register(&core, 300);
    let started = Instant::now();
    request.send(None).unwrap();

    let succeeded = events.next_named("SIPRequestDidSucceed").await;
    assert!(matches!(succeeded.kind, NotificationKind::RequestDidSucceed { expires: 90, .. }));
    events.next_named("SIPRequestDidEnd").await;
    assert_eq!(started.elapsed().as_secs(), 90);
    assert_eq!(request.state(), RequestState::Terminated);

    let request = register(&core, 300);
    request.send(None).unwrap();
    let succeeded = events.next_named("SIPRequestDidSucceed").await;
    assert!(matches!(succeeded.kind, NotificationKind::RequestDidSucceed { expires: 300, .. }));
    request.end();
    events.next_named("SIPRequestDidEnd").await;
}
