// tests/integration/lifecycle_test.rs

//! Connection lifecycle: connect, reconnection limits, authentication and
//! heartbeats.

use super::test_helpers::{MockBehavior, MockNode, await_event, fast_settings, free_port};
use opalite::OpaliteClient;
use opalite::core::OpaliteError;
use opalite::core::events::ClientEvent;
use opalite::core::protocol::Credentials;
use opalite::core::types::{EventData, ExpectedVersion};
use std::time::Duration;

#[tokio::test]
async fn test_connect_emits_connected_event() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    let mut events = client.events();

    client.connect().await.unwrap();
    let event = await_event(&mut events, |e| matches!(e, ClientEvent::Connected(_))).await;
    match event {
        ClientEvent::Connected(remote) => assert_eq!(remote, node.addr),
        other => panic!("Expected Connected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_while_active_is_rejected() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    let mut events = client.events();

    client.connect().await.unwrap();
    await_event(&mut events, |e| matches!(e, ClientEvent::Connected(_))).await;

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, OpaliteError::InvalidState(_)));
}

#[tokio::test]
async fn test_reconnection_limit_zero_disconnects_permanently() {
    // A port nothing listens on: every connect attempt is refused.
    let port = free_port().await;
    let mut settings = fast_settings(port);
    settings.max_reconnections = 0;

    let client = OpaliteClient::new(settings).unwrap();
    let mut events = client.events();

    // Discovery itself succeeds, so connect resolves.
    client.connect().await.unwrap();
    await_event(&mut events, |e| matches!(e, ClientEvent::Disconnected)).await;

    let err = client
        .append_to_stream("s", ExpectedVersion::Any, vec![EventData::json("t", "{}")], None)
        .await
        .unwrap_err();
    assert!(matches!(err, OpaliteError::ConnectionClosed(_)));

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, OpaliteError::ConnectionClosed(_)));
}

#[tokio::test]
async fn test_reconnection_retries_before_giving_up() {
    let port = free_port().await;
    let mut settings = fast_settings(port);
    settings.max_reconnections = 2;

    let client = OpaliteClient::new(settings).unwrap();
    let mut events = client.events();
    client.connect().await.unwrap();

    let mut reconnecting = 0;
    loop {
        let event = await_event(&mut events, |e| {
            matches!(e, ClientEvent::Reconnecting | ClientEvent::Disconnected)
        })
        .await;
        match event {
            ClientEvent::Reconnecting => reconnecting += 1,
            ClientEvent::Disconnected => break,
            _ => unreachable!(),
        }
    }
    assert_eq!(reconnecting, 2);
}

#[tokio::test]
async fn test_authentication_failure_fails_pending_work() {
    let node = MockNode::start(MockBehavior {
        accept_credentials: false,
        ..MockBehavior::default()
    })
    .await;
    let mut settings = fast_settings(node.addr.port());
    settings.credentials = Some(Credentials::new("admin", "wrong"));
    settings.max_reconnections = 0;

    let client = OpaliteClient::new(settings).unwrap();
    let mut events = client.events();
    client.connect().await.unwrap();

    // Submitted while connecting; fails once the handshake is rejected.
    let append = client.append_to_stream(
        "s",
        ExpectedVersion::Any,
        vec![EventData::json("t", "{}")],
        None,
    );

    let (event, result) = tokio::join!(
        await_event(&mut events, |e| matches!(
            e,
            ClientEvent::AuthenticationFailed(_)
        )),
        append
    );
    assert!(matches!(event, ClientEvent::AuthenticationFailed(_)));
    assert!(matches!(
        result.unwrap_err(),
        OpaliteError::NotAuthenticated(_)
    ));
}

#[tokio::test]
async fn test_heartbeats_keep_a_quiet_connection_alive() {
    let node = MockNode::start(MockBehavior::default()).await;
    let mut settings = fast_settings(node.addr.port());
    settings.heartbeat_interval_ms = 100;
    settings.heartbeat_timeout_ms = 300;

    let client = OpaliteClient::new(settings).unwrap();
    let mut events = client.events();
    client.connect().await.unwrap();
    await_event(&mut events, |e| matches!(e, ClientEvent::Connected(_))).await;

    // Several heartbeat rounds with no data traffic.
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Still connected: an append goes straight through.
    let result = client
        .append_to_stream("s", ExpectedVersion::Any, vec![EventData::json("t", "{}")], None)
        .await
        .unwrap();
    assert_eq!(result.next_expected_version, 0);

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ClientEvent::ConnectionClosed),
            "channel must not close while heartbeats are answered"
        );
    }
}

#[tokio::test]
async fn test_heartbeat_timeout_closes_the_channel() {
    let node = MockNode::start(MockBehavior {
        answer_heartbeats: false,
        ..MockBehavior::default()
    })
    .await;
    let mut settings = fast_settings(node.addr.port());
    settings.heartbeat_interval_ms = 100;
    settings.heartbeat_timeout_ms = 200;

    let client = OpaliteClient::new(settings).unwrap();
    let mut events = client.events();
    client.connect().await.unwrap();
    await_event(&mut events, |e| matches!(e, ClientEvent::Connected(_))).await;

    await_event(&mut events, |e| matches!(e, ClientEvent::ConnectionClosed)).await;
}

#[tokio::test]
async fn test_disconnect_is_terminal() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    let mut events = client.events();

    client.connect().await.unwrap();
    await_event(&mut events, |e| matches!(e, ClientEvent::Connected(_))).await;

    client.disconnect();
    await_event(&mut events, |e| matches!(e, ClientEvent::Disconnected)).await;

    let err = client
        .append_to_stream("s", ExpectedVersion::Any, vec![EventData::json("t", "{}")], None)
        .await
        .unwrap_err();
    assert!(matches!(err, OpaliteError::ConnectionClosed(_)));
}
