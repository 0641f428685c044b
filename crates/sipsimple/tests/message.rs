mod common;

use common::{Events, ok, route, scripted_core, uri};
use sipsimple::core::SipResponse;
use sipsimple::{Credentials, Error, Message, NotificationKind};

#[tokio::test(start_paused = true)]
async fn delivers_once() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push_response(ok());

    let message = Message::new(
        &core,
        uri("sip:alice@example.com"),
        uri("sip:bob@example.com"),
        route(),
        "text/plain",
        "Hello Bob",
        Some(Credentials::new("alice", "secret")),
    );
    assert!(!message.is_sent());
    message.send(None).unwrap();
    assert!(message.is_sent());
    assert!(matches!(message.send(None), Err(Error::AlreadySent)));

    let succeeded = events.next_named("SIPMessageDidSucceed").await;
    assert_eq!(succeeded.sender, message.id());
    assert_eq!(succeeded.kind, NotificationKind::MessageDidSucceed {});

    let request = transport.last_request().unwrap();
    assert_eq!(request.request_uri.to_string(), "sip:bob@example.com");
    assert_eq!(request.headers.get("Content-Type"), Some("text/plain"));
    assert_eq!(request.headers.get("CSeq"), Some("1 MESSAGE"));
    assert_eq!(&request.body[..], b"Hello Bob");
    assert_eq!(transport.request_count(), 1);

    events.next_named("SIPRequestDidEnd").await;
    assert_eq!(core.notification_center().observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reports_failure() {
    let (core, transport) = scripted_core();
    let mut events = Events::new(&core);
    transport.push_response(SipResponse::new(404, "Not Found"));

    let message = Message::new(
        &core,
        uri("sip:alice@example.com"),
        uri("sip:nobody@example.com"),
        route(),
        "text/plain",
        "anyone?",
        None,
    );
    message.send(None).unwrap();
    let failed = events.next_named("SIPMessageDidFail").await;
    assert_eq!(
        failed.kind,
        NotificationKind::MessageDidFail {
            code: 404,
            reason: "Not Found".into(),
        }
    );
    events.next_named("SIPRequestDidEnd").await;
    assert_eq!(core.notification_center().observer_count(), 0);
    assert!(matches!(message.send(None), Err(Error::AlreadySent)));
}

#[test]
fn send_error_is_returned() {
    let (core, _transport) = scripted_core();
    let message = Message::new(
        &core,
        uri("sip:alice@example.com"),
        uri("sip:bob@example.com"),
        route(),
        "text/plain",
        "no runtime",
        None,
    );
    assert!(message.send(None).is_err());
    assert!(!message.is_sent());
    assert_eq!(core.notification_center().observer_count(), 0);
}
