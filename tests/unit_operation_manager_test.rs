// tests/unit_operation_manager_test.rs

//! Operation manager behavior against a real loopback channel: scheduling,
//! correlation, retries, timeouts and cleanup.

mod common;

use common::{loopback_channel, response_package, within};
use futures::StreamExt;
use opalite::core::OpaliteError;
use opalite::core::operations::append::AppendToStreamOperation;
use opalite::core::operations::{OperationItem, OperationManager};
use opalite::core::protocol::TcpCommand;
use opalite::core::protocol::messages::{
    MasterInfo, NewEvent, NotHandled, NotHandledReason, OperationResult, WriteEventsCompleted,
};
use opalite::core::types::WriteResult;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

fn new_append(
    max_retries: i32,
    timeout: Duration,
) -> (OperationItem, oneshot::Receiver<Result<WriteResult, OpaliteError>>) {
    let (tx, rx) = oneshot::channel();
    let operation = AppendToStreamOperation::new(
        tx,
        true,
        "orders".to_string(),
        -2,
        vec![NewEvent {
            event_id: Uuid::new_v4(),
            event_type: "placed".to_string(),
            is_json: false,
            data: vec![0x01],
            metadata: Vec::new(),
        }],
        None,
    );
    (
        OperationItem::new(Box::new(operation), max_retries, timeout),
        rx,
    )
}

fn success_body() -> WriteEventsCompleted {
    WriteEventsCompleted {
        result: OperationResult::Success,
        message: String::new(),
        first_event_number: 0,
        last_event_number: 0,
        prepare_position: 10,
        commit_position: 10,
    }
}

fn manager(max_concurrent: usize) -> OperationManager {
    OperationManager::new(max_concurrent, Arc::new(AtomicUsize::new(0)))
}

#[tokio::test]
async fn test_schedule_writes_request_and_completes_on_response() {
    let (channel, mut server, _tasks) = loopback_channel().await;
    let mut manager = manager(16);

    let (item, rx) = new_append(10, Duration::from_secs(5));
    manager.schedule_operation(item, &channel);
    assert_eq!(manager.total_count(), 1);

    let request = within(server.next()).await.unwrap().unwrap();
    assert_eq!(request.command, TcpCommand::WriteEvents);

    let response = response_package(
        TcpCommand::WriteEventsCompleted,
        request.correlation_id,
        &success_body(),
    );
    assert!(manager.handle_response(&response, &channel).is_none());

    let result = within(rx).await.unwrap().unwrap();
    assert_eq!(result.next_expected_version, 0);
    assert_eq!(manager.total_count(), 0);
}

#[tokio::test]
async fn test_capacity_defers_to_waiting_until_a_slot_frees() {
    let (channel, mut server, _tasks) = loopback_channel().await;
    let mut manager = manager(1);

    let (first, first_rx) = new_append(10, Duration::from_secs(5));
    let (second, _second_rx) = new_append(10, Duration::from_secs(5));
    manager.schedule_operation(first, &channel);
    manager.schedule_operation(second, &channel);
    assert_eq!(manager.total_count(), 2);

    let first_request = within(server.next()).await.unwrap().unwrap();

    // Completing the first pulls the deferred operation onto the wire.
    let response = response_package(
        TcpCommand::WriteEventsCompleted,
        first_request.correlation_id,
        &success_body(),
    );
    manager.handle_response(&response, &channel);
    within(first_rx).await.unwrap().unwrap();

    let second_request = within(server.next()).await.unwrap().unwrap();
    assert_eq!(second_request.command, TcpCommand::WriteEvents);
    assert_ne!(second_request.correlation_id, first_request.correlation_id);
}

#[tokio::test]
async fn test_retry_uses_a_fresh_correlation_id() {
    let (channel, mut server, _tasks) = loopback_channel().await;
    let mut manager = manager(16);

    let (item, _rx) = new_append(10, Duration::from_secs(5));
    manager.schedule_operation(item, &channel);
    let first_request = within(server.next()).await.unwrap().unwrap();

    let not_ready = response_package(
        TcpCommand::NotHandled,
        first_request.correlation_id,
        &NotHandled {
            reason: NotHandledReason::NotReady,
            master_info: None,
        },
    );
    assert!(manager.handle_response(&not_ready, &channel).is_none());

    // The retried attempt reaches the wire on the next sweep, with a new id.
    manager.check_timeouts_and_retry(&channel);
    let second_request = within(server.next()).await.unwrap().unwrap();
    assert_ne!(second_request.correlation_id, first_request.correlation_id);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_the_operation() {
    let (channel, mut server, _tasks) = loopback_channel().await;
    let mut manager = manager(16);

    let (item, rx) = new_append(0, Duration::from_secs(5));
    manager.schedule_operation(item, &channel);
    let request = within(server.next()).await.unwrap().unwrap();

    let not_ready = response_package(
        TcpCommand::NotHandled,
        request.correlation_id,
        &NotHandled {
            reason: NotHandledReason::NotReady,
            master_info: None,
        },
    );
    manager.handle_response(&not_ready, &channel);

    let err = within(rx).await.unwrap().unwrap_err();
    assert!(matches!(err, OpaliteError::RetryLimitReached(_)));
    assert_eq!(manager.total_count(), 0);
}

#[tokio::test]
async fn test_not_master_response_surfaces_reconnect_hint() {
    let (channel, mut server, _tasks) = loopback_channel().await;
    let mut manager = manager(16);

    let (item, _rx) = new_append(10, Duration::from_secs(5));
    manager.schedule_operation(item, &channel);
    let request = within(server.next()).await.unwrap().unwrap();

    let not_master = response_package(
        TcpCommand::NotHandled,
        request.correlation_id,
        &NotHandled {
            reason: NotHandledReason::NotMaster,
            master_info: Some(MasterInfo {
                external_tcp_address: "127.0.0.1".to_string(),
                external_tcp_port: 7777,
                external_secure_tcp_address: None,
                external_secure_tcp_port: None,
            }),
        },
    );

    let endpoints = manager.handle_response(&not_master, &channel).unwrap();
    assert_eq!(
        endpoints.tcp,
        Some("127.0.0.1:7777".parse().unwrap())
    );
}

#[tokio::test]
async fn test_late_response_is_silently_dropped() {
    let (channel, _server, _tasks) = loopback_channel().await;
    let mut manager = manager(16);

    let response = response_package(
        TcpCommand::WriteEventsCompleted,
        Uuid::new_v4(),
        &success_body(),
    );
    assert!(manager.handle_response(&response, &channel).is_none());
}

#[tokio::test]
async fn test_timeout_on_current_channel_spends_a_retry() {
    let (channel, mut server, _tasks) = loopback_channel().await;
    let mut manager = manager(16);

    let (item, rx) = new_append(0, Duration::from_millis(10));
    manager.schedule_operation(item, &channel);
    let _request = within(server.next()).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.check_timeouts_and_retry(&channel);

    let err = within(rx).await.unwrap().unwrap_err();
    assert!(matches!(err, OpaliteError::OperationTimeout(_)));
}

#[tokio::test]
async fn test_timeout_on_previous_channel_replays_without_spending_retries() {
    let (old_channel, mut old_server, _old_tasks) = loopback_channel().await;
    let (new_channel, mut new_server, _new_tasks) = loopback_channel().await;
    let mut manager = manager(16);

    // Zero retries: a replay after channel loss must not count against the
    // budget.
    let (item, _rx) = new_append(0, Duration::from_millis(10));
    manager.schedule_operation(item, &old_channel);
    let first_request = within(old_server.next()).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.check_timeouts_and_retry(&new_channel);

    let replayed = within(new_server.next()).await.unwrap().unwrap();
    assert_eq!(replayed.command, TcpCommand::WriteEvents);
    assert_ne!(replayed.correlation_id, first_request.correlation_id);
}

#[tokio::test]
async fn test_clean_up_fails_everything_with_connection_closed() {
    let (channel, mut server, _tasks) = loopback_channel().await;
    let mut manager = manager(1);

    let (active, active_rx) = new_append(10, Duration::from_secs(5));
    let (waiting, waiting_rx) = new_append(10, Duration::from_secs(5));
    manager.schedule_operation(active, &channel);
    manager.schedule_operation(waiting, &channel);
    let _request = within(server.next()).await.unwrap().unwrap();

    manager.clean_up();
    assert_eq!(manager.total_count(), 0);

    for rx in [active_rx, waiting_rx] {
        let err = within(rx).await.unwrap().unwrap_err();
        assert!(matches!(err, OpaliteError::ConnectionClosed(_)));
    }
}
