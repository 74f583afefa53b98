// src/core/protocol/messages.rs

//! Typed payload bodies carried inside packages.
//!
//! Bodies are serde structs encoded with bincode's standard configuration.
//! The auth and bad-request payloads are plain UTF-8 text and do not go
//! through this module.

use crate::core::OpaliteError;
use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Encodes a payload body for the wire.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, OpaliteError> {
    let encoded = bincode::serde::encode_to_vec(message, bincode::config::standard())?;
    Ok(Bytes::from(encoded))
}

/// Decodes a payload body received from the wire. Trailing garbage after the
/// body is a protocol violation.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, OpaliteError> {
    let (message, read) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    if read != payload.len() {
        return Err(OpaliteError::ProtocolViolation(format!(
            "payload has {} trailing bytes",
            payload.len() - read
        )));
    }
    Ok(message)
}

/// The server-side outcome of a write-path operation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Success,
    PrepareTimeout,
    CommitTimeout,
    ForwardTimeout,
    WrongExpectedVersion,
    StreamDeleted,
    InvalidTransaction,
    AccessDenied,
}

/// A new event to be appended, as supplied by the caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// An event as recorded in a stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event_stream_id: String,
    pub event_number: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// An event plus the link event that resolved to it, if any.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResolvedIndexedEvent {
    pub event: Option<EventRecord>,
    pub link: Option<EventRecord>,
    pub commit_position: i64,
    pub prepare_position: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WriteEvents {
    pub event_stream_id: String,
    pub expected_version: i64,
    pub events: Vec<NewEvent>,
    pub require_master: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WriteEventsCompleted {
    pub result: OperationResult,
    pub message: String,
    pub first_event_number: i64,
    pub last_event_number: i64,
    pub prepare_position: i64,
    pub commit_position: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeleteStream {
    pub event_stream_id: String,
    pub expected_version: i64,
    pub require_master: bool,
    pub hard_delete: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeleteStreamCompleted {
    pub result: OperationResult,
    pub message: String,
    pub prepare_position: i64,
    pub commit_position: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionStart {
    pub event_stream_id: String,
    pub expected_version: i64,
    pub require_master: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionStartCompleted {
    pub transaction_id: i64,
    pub result: OperationResult,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionWrite {
    pub transaction_id: i64,
    pub events: Vec<NewEvent>,
    pub require_master: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionWriteCompleted {
    pub transaction_id: i64,
    pub result: OperationResult,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionCommit {
    pub transaction_id: i64,
    pub require_master: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionCommitCompleted {
    pub transaction_id: i64,
    pub result: OperationResult,
    pub message: String,
    pub first_event_number: i64,
    pub last_event_number: i64,
    pub prepare_position: i64,
    pub commit_position: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadEvent {
    pub event_stream_id: String,
    pub event_number: i64,
    pub resolve_link_tos: bool,
    pub require_master: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEventResult {
    Success,
    NotFound,
    NoStream,
    StreamDeleted,
    Error,
    AccessDenied,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadEventCompleted {
    pub result: ReadEventResult,
    pub event: Option<ResolvedIndexedEvent>,
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadStreamEvents {
    pub event_stream_id: String,
    pub from_event_number: i64,
    pub max_count: i32,
    pub resolve_link_tos: bool,
    pub require_master: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceReadResult {
    Success,
    NoStream,
    StreamDeleted,
    NotModified,
    Error,
    AccessDenied,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadStreamEventsCompleted {
    pub events: Vec<ResolvedIndexedEvent>,
    pub result: SliceReadResult,
    pub next_event_number: i64,
    pub last_event_number: i64,
    pub is_end_of_stream: bool,
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadAllEvents {
    pub commit_position: i64,
    pub prepare_position: i64,
    pub max_count: i32,
    pub resolve_link_tos: bool,
    pub require_master: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAllResult {
    Success,
    NotModified,
    Error,
    AccessDenied,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadAllEventsCompleted {
    pub commit_position: i64,
    pub prepare_position: i64,
    pub events: Vec<ResolvedIndexedEvent>,
    pub next_commit_position: i64,
    pub next_prepare_position: i64,
    pub result: ReadAllResult,
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubscribeToStream {
    /// Empty for a subscription to the all-stream.
    pub event_stream_id: String,
    pub resolve_link_tos: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubscriptionConfirmation {
    pub last_commit_position: i64,
    pub last_event_number: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamEventAppeared {
    pub event: ResolvedIndexedEvent,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnsubscribeFromStream {}

/// The reason a subscription was dropped, as reported by the server.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionDropCause {
    Unsubscribed,
    AccessDenied,
    NotFound,
    PersistentSubscriptionDeleted,
    SubscriberMaxCountReached,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubscriptionDropped {
    pub reason: SubscriptionDropCause,
}

/// Why the server declined to process a request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotHandledReason {
    NotReady,
    TooBusy,
    NotMaster,
}

/// The address of the current master, attached to a `NotMaster` response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MasterInfo {
    pub external_tcp_address: String,
    pub external_tcp_port: u16,
    pub external_secure_tcp_address: Option<String>,
    pub external_secure_tcp_port: Option<u16>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NotHandled {
    pub reason: NotHandledReason,
    pub master_info: Option<MasterInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreatePersistentSubscription {
    pub subscription_group_name: String,
    pub event_stream_id: String,
    pub resolve_link_tos: bool,
    pub start_from: i64,
    pub message_timeout_ms: u64,
    pub record_statistics: bool,
    pub live_buffer_size: i32,
    pub read_batch_size: i32,
    pub buffer_size: i32,
    pub max_retry_count: i32,
    pub checkpoint_after_ms: u64,
    pub checkpoint_max_count: i32,
    pub checkpoint_min_count: i32,
    pub subscriber_max_count: i32,
    pub named_consumer_strategy: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePersistentSubscriptionResult {
    Success,
    AlreadyExists,
    Fail,
    AccessDenied,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreatePersistentSubscriptionCompleted {
    pub result: CreatePersistentSubscriptionResult,
    pub reason: String,
}

pub type UpdatePersistentSubscription = CreatePersistentSubscription;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePersistentSubscriptionResult {
    Success,
    DoesNotExist,
    Fail,
    AccessDenied,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdatePersistentSubscriptionCompleted {
    pub result: UpdatePersistentSubscriptionResult,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeletePersistentSubscription {
    pub subscription_group_name: String,
    pub event_stream_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePersistentSubscriptionResult {
    Success,
    DoesNotExist,
    Fail,
    AccessDenied,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeletePersistentSubscriptionCompleted {
    pub result: DeletePersistentSubscriptionResult,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectToPersistentSubscription {
    pub subscription_group_name: String,
    pub event_stream_id: String,
    pub allowed_in_flight_messages: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PersistentSubscriptionConfirmation {
    pub last_commit_position: i64,
    pub subscription_id: String,
    pub last_event_number: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PersistentSubscriptionStreamEventAppeared {
    pub event: ResolvedIndexedEvent,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PersistentSubscriptionAckEvents {
    pub subscription_id: String,
    pub processed_event_ids: Vec<Uuid>,
}

/// What the server should do with negatively acknowledged events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakAction {
    Unknown,
    Park,
    Retry,
    Skip,
    Stop,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PersistentSubscriptionNakEvents {
    pub subscription_id: String,
    pub processed_event_ids: Vec<Uuid>,
    pub message: String,
    pub action: NakAction,
}
