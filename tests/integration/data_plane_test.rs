// tests/integration/data_plane_test.rs

//! Data-plane round trips: appends, reads, replays across reconnection,
//! master redirects and stream metadata.

use super::test_helpers::{MockBehavior, MockNode, await_event, fast_settings};
use opalite::OpaliteClient;
use opalite::core::events::ClientEvent;
use opalite::core::types::{
    EventData, EventReadStatus, ExpectedVersion, StreamMetadata,
};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_happy_append_and_read() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    client.connect().await.unwrap();

    let write = client
        .append_to_stream(
            "s",
            ExpectedVersion::Any,
            vec![EventData::binary("t", vec![0x01])],
            None,
        )
        .await
        .unwrap();
    assert_eq!(write.next_expected_version, 0);

    let read = client.read_event("s", 0, false, None).await.unwrap();
    assert_eq!(read.status, EventReadStatus::Success);
    let event = read.event.unwrap();
    let record = event.original_event().unwrap();
    assert_eq!(record.data, vec![0x01]);
    assert_eq!(record.event_type, "t");

    // -1 reads the last event of the stream.
    let last = client.read_event("s", -1, false, None).await.unwrap();
    assert_eq!(last.status, EventReadStatus::Success);
    assert_eq!(
        last.event.unwrap().original_event().unwrap().data,
        vec![0x01]
    );
}

#[tokio::test]
async fn test_read_missing_stream_reports_no_stream() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    client.connect().await.unwrap();

    let read = client.read_event("absent", 0, false, None).await.unwrap();
    assert_eq!(read.status, EventReadStatus::NoStream);
    assert!(read.event.is_none());
}

#[tokio::test]
async fn test_append_is_replayed_across_reconnection() {
    // The node swallows the first write and kills the connection; the
    // operation must be re-sent on the next channel and resolve.
    let node = MockNode::start(MockBehavior {
        swallow_first_writes: 1,
        ..MockBehavior::default()
    })
    .await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    client.connect().await.unwrap();

    let write = client
        .append_to_stream(
            "s",
            ExpectedVersion::Any,
            vec![EventData::binary("t", vec![0x05])],
            None,
        )
        .await
        .unwrap();
    assert_eq!(write.next_expected_version, 0);
    assert!(node.writes_seen.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_not_master_redirect_is_followed() {
    let master = MockNode::start(MockBehavior::default()).await;
    let follower = MockNode::start(MockBehavior {
        redirect_writes_to: Some(master.addr),
        ..MockBehavior::default()
    })
    .await;

    let client = OpaliteClient::new(fast_settings(follower.addr.port())).unwrap();
    let mut events = client.events();
    client.connect().await.unwrap();

    let write = client
        .append_to_stream(
            "s",
            ExpectedVersion::Any,
            vec![EventData::binary("t", vec![0x09])],
            None,
        )
        .await
        .unwrap();
    assert_eq!(write.next_expected_version, 0);

    // One rejected attempt on the follower, one successful on the master.
    assert_eq!(follower.writes_seen.load(Ordering::SeqCst), 1);
    assert_eq!(master.writes_seen.load(Ordering::SeqCst), 1);

    // The client reconnected to the master's address.
    let connected_to_master = await_event(&mut events, |e| {
        matches!(e, ClientEvent::Connected(remote) if *remote == master.addr)
    })
    .await;
    assert!(matches!(connected_to_master, ClientEvent::Connected(_)));
}

#[tokio::test]
async fn test_stream_metadata_round_trip() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    client.connect().await.unwrap();

    let metadata = StreamMetadata {
        max_count: Some(5),
        max_age_secs: Some(3_600),
        ..StreamMetadata::empty()
    };

    let write = client
        .set_stream_metadata("s", ExpectedVersion::Any, &metadata, None)
        .await
        .unwrap();
    assert_eq!(write.next_expected_version, 0);

    let result = client.get_stream_metadata("s", None).await.unwrap();
    assert_eq!(result.stream, "s");
    assert!(!result.is_stream_deleted);
    assert_eq!(result.metastream_version, 0);
    assert_eq!(result.stream_metadata, metadata);
}

#[tokio::test]
async fn test_metadata_of_unknown_stream_is_empty() {
    let node = MockNode::start(MockBehavior::default()).await;
    let client = OpaliteClient::new(fast_settings(node.addr.port())).unwrap();
    client.connect().await.unwrap();

    let result = client.get_stream_metadata("unknown", None).await.unwrap();
    assert!(!result.is_stream_deleted);
    assert_eq!(result.metastream_version, -1);
    assert_eq!(result.stream_metadata, StreamMetadata::empty());
}
