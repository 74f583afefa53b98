// src/client.rs

//! The user-facing client: argument validation, admission control and the
//! translation of every public verb into a control task.

use crate::config::Settings;
use crate::connection::tasks::{Task, TaskSender, task_queue};
use crate::connection::ConnectionEngine;
use crate::core::events::{ClientEvent, EventBus};
use crate::core::operations::Operation;
use crate::core::operations::append::AppendToStreamOperation;
use crate::core::operations::delete::DeleteStreamOperation;
use crate::core::operations::persistent::{
    CreatePersistentSubscriptionOperation, DeletePersistentSubscriptionOperation,
    UpdatePersistentSubscriptionOperation,
};
use crate::core::operations::read_all::ReadAllEventsOperation;
use crate::core::operations::read_event::ReadEventOperation;
use crate::core::operations::read_stream::ReadStreamEventsOperation;
use crate::core::operations::transaction::{
    CommitTransactionOperation, StartTransactionOperation, TransactionalWriteOperation,
};
use crate::core::protocol::Credentials;
use crate::core::subscriptions::{
    PersistentSubscription, PersistentSubscriptionOperation, Subscription, SubscriptionListener,
    VolatileSubscriptionOperation,
};
use crate::core::types::{
    AllEventsSlice, DeleteResult, EventData, EventReadResult, EventReadStatus, ExpectedVersion,
    PersistentSubscriptionSettings, Position, RawStreamMetadataResult, ReadDirection,
    StreamEventsSlice, StreamMetadata, StreamMetadataResult, SystemSettings, WriteResult,
    stream_position, system_event_types, system_streams,
};
use crate::core::OpaliteError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

/// Reads larger than this must page.
const MAX_READ_SIZE: i32 = 4 * 1024;

/// The pause of the admission spin-wait when the operation queue is full.
const ADMISSION_PAUSE: Duration = Duration::from_millis(1);

/// An asynchronous client for an append-only event-stream server.
///
/// All verbs are safe to call from any task; the heavy lifting happens on a
/// single control task owned by the client. Dropping the last clone of the
/// client disconnects it.
///
/// Must be constructed inside a Tokio runtime.
#[derive(Clone, Debug)]
pub struct OpaliteClient {
    inner: Arc<ClientHandle>,
}

#[derive(Debug)]
struct ClientHandle {
    settings: Arc<Settings>,
    tasks: TaskSender,
    events: EventBus,
    pending_operations: Arc<AtomicUsize>,
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        let _ = self.tasks.send(Task::CloseConnection {
            reason: "client dropped".to_string(),
            error: None,
        });
    }
}

impl ClientHandle {
    /// Coarse admission bound: the caller spins in 1 ms pauses while the
    /// total in-flight operation count is at the configured cap.
    async fn admit(&self) {
        while self.pending_operations.load(Ordering::Relaxed) >= self.settings.max_operation_queue_size
        {
            tokio::time::sleep(ADMISSION_PAUSE).await;
        }
    }

    async fn enqueue_operation(&self, operation: Box<dyn Operation>) -> Result<(), OpaliteError> {
        self.admit().await;
        self.tasks
            .send(Task::StartOperation { operation })
            .map_err(|_| OpaliteError::ConnectionClosed("connection is closed".to_string()))
    }
}

/// Maps a dropped result channel to the terminal connection state.
fn receiver_closed<T>(_: T) -> OpaliteError {
    OpaliteError::ConnectionClosed("connection is closed".to_string())
}

fn ensure_stream(stream: &str) -> Result<(), OpaliteError> {
    if stream.is_empty() {
        return Err(OpaliteError::InvalidArgument(
            "stream must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn ensure_count(count: i32) -> Result<(), OpaliteError> {
    if count <= 0 {
        return Err(OpaliteError::InvalidArgument(
            "count must be positive".to_string(),
        ));
    }
    if count >= MAX_READ_SIZE {
        return Err(OpaliteError::InvalidArgument(format!(
            "count must be less than {MAX_READ_SIZE}; page larger reads"
        )));
    }
    Ok(())
}

impl OpaliteClient {
    /// Creates a client and starts its control task. The client stays
    /// disconnected until [`connect`](Self::connect) is called.
    pub fn new(settings: Settings) -> Result<Self, OpaliteError> {
        settings
            .validate()
            .map_err(|e| OpaliteError::InvalidArgument(e.to_string()))?;
        let settings = Arc::new(settings);

        let (tasks_tx, tasks_rx) = task_queue();
        let events = EventBus::new();
        let pending_operations = Arc::new(AtomicUsize::new(0));

        let engine = ConnectionEngine::new(
            Arc::clone(&settings),
            tasks_tx.clone(),
            tasks_rx,
            events.clone(),
            Arc::clone(&pending_operations),
        );
        tokio::spawn(engine.run());

        debug!(node = ?settings.node, "Client created.");
        Ok(Self {
            inner: Arc::new(ClientHandle {
                settings,
                tasks: tasks_tx,
                events,
                pending_operations,
            }),
        })
    }

    /// Convenience constructor for a single-node client with default settings.
    pub fn single_node(host: impl Into<String>, port: u16) -> Result<Self, OpaliteError> {
        Self::new(Settings::single_node(host, port))
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Subscribes to connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Starts connecting. Resolves once a node endpoint has been discovered;
    /// the `Connected` lifecycle event signals full establishment.
    pub async fn connect(&self) -> Result<(), OpaliteError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .tasks
            .send(Task::StartConnection { result: tx })
            .map_err(receiver_closed)?;
        rx.await.map_err(receiver_closed)?
    }

    /// Disconnects terminally. In-flight work fails with `ConnectionClosed`.
    pub fn disconnect(&self) {
        let _ = self.inner.tasks.send(Task::CloseConnection {
            reason: "exit".to_string(),
            error: None,
        });
    }

    // --- write path ---

    pub async fn append_to_stream(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        events: Vec<EventData>,
        credentials: Option<Credentials>,
    ) -> Result<WriteResult, OpaliteError> {
        ensure_stream(stream)?;
        let (tx, rx) = oneshot::channel();
        let operation = AppendToStreamOperation::new(
            tx,
            self.inner.settings.require_master,
            stream.to_string(),
            expected_version.value(),
            events.into_iter().map(EventData::into_new_event).collect(),
            credentials,
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }

    pub async fn delete_stream(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        hard_delete: bool,
        credentials: Option<Credentials>,
    ) -> Result<DeleteResult, OpaliteError> {
        ensure_stream(stream)?;
        let (tx, rx) = oneshot::channel();
        let operation = DeleteStreamOperation::new(
            tx,
            self.inner.settings.require_master,
            stream.to_string(),
            expected_version.value(),
            hard_delete,
            credentials,
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }

    // --- read path ---

    /// Reads a single event. `event_number` of `-1` reads the last event of
    /// the stream.
    pub async fn read_event(
        &self,
        stream: &str,
        event_number: i64,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<EventReadResult, OpaliteError> {
        ensure_stream(stream)?;
        if event_number < -1 {
            return Err(OpaliteError::InvalidArgument(
                "event number out of range".to_string(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        let operation = ReadEventOperation::new(
            tx,
            stream.to_string(),
            event_number,
            resolve_link_tos,
            self.inner.settings.require_master,
            credentials,
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }

    pub async fn read_stream_events_forward(
        &self,
        stream: &str,
        start: i64,
        count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, OpaliteError> {
        ensure_stream(stream)?;
        if start < 0 {
            return Err(OpaliteError::InvalidArgument(
                "start must not be negative".to_string(),
            ));
        }
        ensure_count(count)?;
        self.read_stream_events(stream, start, count, ReadDirection::Forward, resolve_link_tos, credentials)
            .await
    }

    pub async fn read_stream_events_backward(
        &self,
        stream: &str,
        start: i64,
        count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, OpaliteError> {
        ensure_stream(stream)?;
        ensure_count(count)?;
        self.read_stream_events(stream, start, count, ReadDirection::Backward, resolve_link_tos, credentials)
            .await
    }

    async fn read_stream_events(
        &self,
        stream: &str,
        start: i64,
        count: i32,
        direction: ReadDirection,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, OpaliteError> {
        let (tx, rx) = oneshot::channel();
        let operation = ReadStreamEventsOperation::new(
            tx,
            stream.to_string(),
            start,
            count,
            direction,
            resolve_link_tos,
            self.inner.settings.require_master,
            credentials,
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }

    pub async fn read_all_events_forward(
        &self,
        position: Position,
        max_count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<AllEventsSlice, OpaliteError> {
        ensure_count(max_count)?;
        self.read_all_events(position, max_count, ReadDirection::Forward, resolve_link_tos, credentials)
            .await
    }

    pub async fn read_all_events_backward(
        &self,
        position: Position,
        max_count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<AllEventsSlice, OpaliteError> {
        ensure_count(max_count)?;
        self.read_all_events(position, max_count, ReadDirection::Backward, resolve_link_tos, credentials)
            .await
    }

    async fn read_all_events(
        &self,
        position: Position,
        max_count: i32,
        direction: ReadDirection,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<AllEventsSlice, OpaliteError> {
        let (tx, rx) = oneshot::channel();
        let operation = ReadAllEventsOperation::new(
            tx,
            position,
            max_count,
            direction,
            resolve_link_tos,
            self.inner.settings.require_master,
            credentials,
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }

    // --- transactions ---

    pub async fn start_transaction(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        credentials: Option<Credentials>,
    ) -> Result<Transaction, OpaliteError> {
        ensure_stream(stream)?;
        let (tx, rx) = oneshot::channel();
        let operation = StartTransactionOperation::new(
            tx,
            self.inner.settings.require_master,
            stream.to_string(),
            expected_version.value(),
            credentials.clone(),
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        let transaction_id = rx.await.map_err(receiver_closed)??;
        Ok(Transaction {
            transaction_id,
            credentials,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Re-creates a handle to a transaction started elsewhere.
    pub fn continue_transaction(
        &self,
        transaction_id: i64,
        credentials: Option<Credentials>,
    ) -> Transaction {
        Transaction {
            transaction_id,
            credentials,
            inner: Arc::clone(&self.inner),
        }
    }

    // --- subscriptions ---

    pub async fn subscribe_to_stream(
        &self,
        stream: &str,
        resolve_link_tos: bool,
        listener: Box<dyn SubscriptionListener>,
        credentials: Option<Credentials>,
    ) -> Result<Subscription, OpaliteError> {
        ensure_stream(stream)?;
        self.start_volatile_subscription(stream.to_string(), resolve_link_tos, listener, credentials)
            .await
    }

    pub async fn subscribe_to_all(
        &self,
        resolve_link_tos: bool,
        listener: Box<dyn SubscriptionListener>,
        credentials: Option<Credentials>,
    ) -> Result<Subscription, OpaliteError> {
        self.start_volatile_subscription(String::new(), resolve_link_tos, listener, credentials)
            .await
    }

    async fn start_volatile_subscription(
        &self,
        stream: String,
        resolve_link_tos: bool,
        listener: Box<dyn SubscriptionListener>,
        credentials: Option<Credentials>,
    ) -> Result<Subscription, OpaliteError> {
        let (tx, rx) = oneshot::channel();
        let operation =
            VolatileSubscriptionOperation::new(tx, stream, resolve_link_tos, credentials, listener);
        self.inner
            .tasks
            .send(Task::StartSubscription {
                operation: Box::new(operation),
            })
            .map_err(receiver_closed)?;
        rx.await.map_err(receiver_closed)?
    }

    /// Connects to a persistent subscription group as a consumer.
    pub async fn subscribe_to_persistent(
        &self,
        stream: &str,
        group: &str,
        buffer_size: i32,
        listener: Box<dyn SubscriptionListener>,
        credentials: Option<Credentials>,
    ) -> Result<PersistentSubscription, OpaliteError> {
        ensure_stream(stream)?;
        if group.is_empty() {
            return Err(OpaliteError::InvalidArgument(
                "group must not be empty".to_string(),
            ));
        }
        if buffer_size <= 0 {
            return Err(OpaliteError::InvalidArgument(
                "buffer size must be positive".to_string(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        let operation = PersistentSubscriptionOperation::new(
            tx,
            stream.to_string(),
            group.to_string(),
            buffer_size,
            credentials,
            listener,
        );
        self.inner
            .tasks
            .send(Task::StartPersistentSubscription {
                operation: Box::new(operation),
            })
            .map_err(receiver_closed)?;
        rx.await.map_err(receiver_closed)?
    }

    pub async fn create_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
        settings: PersistentSubscriptionSettings,
        credentials: Option<Credentials>,
    ) -> Result<(), OpaliteError> {
        ensure_stream(stream)?;
        if group.is_empty() {
            return Err(OpaliteError::InvalidArgument(
                "group must not be empty".to_string(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        let operation = CreatePersistentSubscriptionOperation::new(
            tx,
            stream.to_string(),
            group.to_string(),
            settings,
            credentials,
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }

    pub async fn update_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
        settings: PersistentSubscriptionSettings,
        credentials: Option<Credentials>,
    ) -> Result<(), OpaliteError> {
        ensure_stream(stream)?;
        if group.is_empty() {
            return Err(OpaliteError::InvalidArgument(
                "group must not be empty".to_string(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        let operation = UpdatePersistentSubscriptionOperation::new(
            tx,
            stream.to_string(),
            group.to_string(),
            settings,
            credentials,
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }

    pub async fn delete_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
        credentials: Option<Credentials>,
    ) -> Result<(), OpaliteError> {
        ensure_stream(stream)?;
        if group.is_empty() {
            return Err(OpaliteError::InvalidArgument(
                "group must not be empty".to_string(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        let operation = DeletePersistentSubscriptionOperation::new(
            tx,
            stream.to_string(),
            group.to_string(),
            credentials,
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }

    // --- stream metadata ---

    pub async fn set_stream_metadata(
        &self,
        stream: &str,
        expected_metastream_version: ExpectedVersion,
        metadata: &StreamMetadata,
        credentials: Option<Credentials>,
    ) -> Result<WriteResult, OpaliteError> {
        let json = serde_json::to_vec(metadata)?;
        self.set_stream_metadata_raw(stream, expected_metastream_version, json, credentials)
            .await
    }

    pub async fn set_stream_metadata_raw(
        &self,
        stream: &str,
        expected_metastream_version: ExpectedVersion,
        metadata: Vec<u8>,
        credentials: Option<Credentials>,
    ) -> Result<WriteResult, OpaliteError> {
        ensure_stream(stream)?;
        if system_streams::is_metastream(stream) {
            return Err(OpaliteError::InvalidArgument(format!(
                "setting metadata for metastream '{stream}' is not supported"
            )));
        }

        let metaevent = EventData::json(system_event_types::STREAM_METADATA, metadata);
        self.append_to_stream(
            &system_streams::metastream_of(stream),
            expected_metastream_version,
            vec![metaevent],
            credentials,
        )
        .await
    }

    pub async fn get_stream_metadata(
        &self,
        stream: &str,
        credentials: Option<Credentials>,
    ) -> Result<StreamMetadataResult, OpaliteError> {
        let raw = self
            .get_stream_metadata_as_raw_bytes(stream, credentials)
            .await?;
        let stream_metadata = if raw.stream_metadata.is_empty() {
            StreamMetadata::empty()
        } else {
            serde_json::from_slice(&raw.stream_metadata)?
        };
        Ok(StreamMetadataResult {
            stream: raw.stream,
            is_stream_deleted: raw.is_stream_deleted,
            metastream_version: raw.metastream_version,
            stream_metadata,
        })
    }

    pub async fn get_stream_metadata_as_raw_bytes(
        &self,
        stream: &str,
        credentials: Option<Credentials>,
    ) -> Result<RawStreamMetadataResult, OpaliteError> {
        ensure_stream(stream)?;
        let read = self
            .read_event(
                &system_streams::metastream_of(stream),
                stream_position::END,
                false,
                credentials,
            )
            .await?;

        match read.status {
            EventReadStatus::Success => {
                let resolved = read.event.ok_or_else(|| {
                    OpaliteError::ServerError(
                        "event is null while read result is success".to_string(),
                    )
                })?;
                Ok(match resolved.original_event() {
                    Some(record) => RawStreamMetadataResult {
                        stream: stream.to_string(),
                        is_stream_deleted: false,
                        metastream_version: record.event_number,
                        stream_metadata: record.data.clone(),
                    },
                    None => RawStreamMetadataResult {
                        stream: stream.to_string(),
                        is_stream_deleted: false,
                        metastream_version: -1,
                        stream_metadata: Vec::new(),
                    },
                })
            }
            EventReadStatus::NotFound | EventReadStatus::NoStream => Ok(RawStreamMetadataResult {
                stream: stream.to_string(),
                is_stream_deleted: false,
                metastream_version: -1,
                stream_metadata: Vec::new(),
            }),
            EventReadStatus::StreamDeleted => Ok(RawStreamMetadataResult {
                stream: stream.to_string(),
                is_stream_deleted: true,
                metastream_version: i64::MAX,
                stream_metadata: Vec::new(),
            }),
        }
    }

    /// Writes cluster-wide default ACLs to the `$settings` stream.
    pub async fn set_system_settings(
        &self,
        settings: &SystemSettings,
        credentials: Option<Credentials>,
    ) -> Result<WriteResult, OpaliteError> {
        let json = serde_json::to_vec(settings)?;
        self.append_to_stream(
            system_streams::SETTINGS_STREAM,
            ExpectedVersion::Any,
            vec![EventData::json(system_event_types::SETTINGS, json)],
            credentials,
        )
        .await
    }
}

/// A handle to a server-side transaction. Writes accumulate server-side and
/// become visible atomically on commit.
pub struct Transaction {
    pub transaction_id: i64,
    credentials: Option<Credentials>,
    inner: Arc<ClientHandle>,
}

impl Transaction {
    pub async fn write(&self, events: Vec<EventData>) -> Result<(), OpaliteError> {
        let (tx, rx) = oneshot::channel();
        let operation = TransactionalWriteOperation::new(
            tx,
            self.inner.settings.require_master,
            self.transaction_id,
            events.into_iter().map(EventData::into_new_event).collect(),
            self.credentials.clone(),
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }

    pub async fn commit(&self) -> Result<WriteResult, OpaliteError> {
        let (tx, rx) = oneshot::channel();
        let operation = CommitTransactionOperation::new(
            tx,
            self.inner.settings.require_master,
            self.transaction_id,
            self.credentials.clone(),
        );
        self.inner.enqueue_operation(Box::new(operation)).await?;
        rx.await.map_err(receiver_closed)?
    }
}
