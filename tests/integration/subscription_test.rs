// tests/integration/subscription_test.rs

//! Volatile subscriptions end to end: delivery, connection loss and
//! unsubscription.

use super::test_helpers::{
    MockBehavior, MockNode, RecordingListener, await_event, fast_settings,
};
use opalite::OpaliteClient;
use opalite::core::events::ClientEvent;
use opalite::core::subscriptions::SubscriptionDropReason;
use opalite::core::types::{EventData, ExpectedVersion};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_subscriber_receives_appended_events() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    client.connect().await.unwrap();

    let (listener, mut events, _drops) = RecordingListener::new();
    let subscription = client
        .subscribe_to_stream("ticker", false, listener, None)
        .await
        .unwrap();
    assert_eq!(subscription.stream_id, "ticker");
    assert_eq!(subscription.last_event_number, -1);

    client
        .append_to_stream(
            "ticker",
            ExpectedVersion::Any,
            vec![EventData::binary("tick", vec![0x07])],
            None,
        )
        .await
        .unwrap();

    let appeared = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(appeared.original_event().unwrap().data, vec![0x07]);
    assert_eq!(appeared.original_stream_id(), Some("ticker"));
}

#[tokio::test]
async fn test_subscribe_to_all_sees_every_stream() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    client.connect().await.unwrap();

    let (listener, mut events, _drops) = RecordingListener::new();
    let subscription = client.subscribe_to_all(false, listener, None).await.unwrap();
    assert!(subscription.is_subscribed_to_all());

    client
        .append_to_stream(
            "any-stream",
            ExpectedVersion::Any,
            vec![EventData::binary("t", vec![0x01])],
            None,
        )
        .await
        .unwrap();

    let appeared = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(appeared.original_stream_id(), Some("any-stream"));
}

#[tokio::test]
async fn test_connection_loss_drops_subscription_exactly_once() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    let mut lifecycle = client.events();
    client.connect().await.unwrap();
    await_event(&mut lifecycle, |e| matches!(e, ClientEvent::Connected(_))).await;

    let (listener, _events, mut drops) = RecordingListener::new();
    client
        .subscribe_to_stream("ticker", false, listener, None)
        .await
        .unwrap();
    assert_eq!(node.subscribes_seen.load(Ordering::SeqCst), 1);

    node.kill_connections();

    let (reason, error) = tokio::time::timeout(Duration::from_secs(5), drops.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, SubscriptionDropReason::ConnectionClosed);
    assert!(error.is_none());

    // The client reconnects, but the core never resubscribes on its own.
    await_event(&mut lifecycle, |e| matches!(e, ClientEvent::Connected(_))).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(node.subscribes_seen.load(Ordering::SeqCst), 1);

    // And the drop fired exactly once: the listener channel is now closed.
    assert!(
        tokio::time::timeout(Duration::from_secs(1), drops.recv())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_unsubscribe_round_trip() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    client.connect().await.unwrap();

    let (listener, _events, mut drops) = RecordingListener::new();
    let subscription = client
        .subscribe_to_stream("ticker", false, listener, None)
        .await
        .unwrap();

    subscription.unsubscribe().unwrap();

    let (reason, error) = tokio::time::timeout(Duration::from_secs(5), drops.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, SubscriptionDropReason::Unsubscribed);
    assert!(error.is_none());
}
