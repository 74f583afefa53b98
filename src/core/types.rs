// src/core/types.rs

//! User-facing data types of the client API: events, results, slices and
//! stream metadata.

use crate::core::protocol::messages::{EventRecord, NewEvent, ResolvedIndexedEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved stream names and naming helpers.
pub mod system_streams {
    pub const METASTREAM_PREFIX: &str = "$$";
    pub const SETTINGS_STREAM: &str = "$settings";

    /// Returns the name of the metastream holding `stream`'s metadata.
    pub fn metastream_of(stream: &str) -> String {
        format!("{METASTREAM_PREFIX}{stream}")
    }

    pub fn is_metastream(stream: &str) -> bool {
        stream.starts_with(METASTREAM_PREFIX)
    }
}

/// Reserved event types written by the client itself.
pub mod system_event_types {
    pub const STREAM_METADATA: &str = "$metadata";
    pub const SETTINGS: &str = "$settings";
}

/// The version a stream is expected to be at when a write lands.
///
/// Writes that are not idempotent should carry an exact guard; the client
/// replays in-flight operations across reconnections and does not deduplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No concurrency check.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last event number must match exactly.
    Exact(i64),
}

impl ExpectedVersion {
    pub fn value(self) -> i64 {
        match self {
            ExpectedVersion::Any => -2,
            ExpectedVersion::NoStream => -1,
            ExpectedVersion::Exact(version) => version,
        }
    }
}

/// Well-known event numbers usable where a position in a stream is expected.
pub mod stream_position {
    /// The first event in a stream.
    pub const START: i64 = 0;
    /// The last event in a stream.
    pub const END: i64 = -1;
}

/// A global position in the all-stream transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub commit_position: i64,
    pub prepare_position: i64,
}

impl Position {
    pub const START: Position = Position {
        commit_position: 0,
        prepare_position: 0,
    };

    pub const END: Position = Position {
        commit_position: -1,
        prepare_position: -1,
    };

    pub fn new(commit_position: i64, prepare_position: i64) -> Self {
        Self {
            commit_position,
            prepare_position,
        }
    }
}

/// An event supplied by the caller for appending.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub event_id: Uuid,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl EventData {
    /// A JSON event with a fresh id and no metadata.
    pub fn json(event_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            is_json: true,
            data: data.into(),
            metadata: Vec::new(),
        }
    }

    /// A binary event with a fresh id and no metadata.
    pub fn binary(event_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            is_json: false,
            data: data.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub(crate) fn into_new_event(self) -> NewEvent {
        NewEvent {
            event_id: self.event_id,
            event_type: self.event_type,
            is_json: self.is_json,
            data: self.data,
            metadata: self.metadata,
        }
    }
}

/// An event as recorded in a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event_stream_id: String,
    pub event_id: Uuid,
    pub event_number: i64,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl From<EventRecord> for RecordedEvent {
    fn from(record: EventRecord) -> Self {
        Self {
            event_stream_id: record.event_stream_id,
            event_id: record.event_id,
            event_number: record.event_number,
            event_type: record.event_type,
            is_json: record.is_json,
            data: record.data,
            metadata: record.metadata,
        }
    }
}

/// An event together with the link that resolved to it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    pub event: Option<RecordedEvent>,
    pub link: Option<RecordedEvent>,
    pub position: Position,
}

impl ResolvedEvent {
    /// The event that was written originally, following the link if present.
    pub fn original_event(&self) -> Option<&RecordedEvent> {
        self.link.as_ref().or(self.event.as_ref())
    }

    pub fn original_stream_id(&self) -> Option<&str> {
        self.original_event().map(|e| e.event_stream_id.as_str())
    }

    pub fn original_event_number(&self) -> Option<i64> {
        self.original_event().map(|e| e.event_number)
    }
}

impl From<ResolvedIndexedEvent> for ResolvedEvent {
    fn from(resolved: ResolvedIndexedEvent) -> Self {
        Self {
            event: resolved.event.map(RecordedEvent::from),
            link: resolved.link.map(RecordedEvent::from),
            position: Position::new(resolved.commit_position, resolved.prepare_position),
        }
    }
}

/// The outcome of a successful append or transaction commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub next_expected_version: i64,
    pub log_position: Position,
}

/// The outcome of a successful stream deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub log_position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReadStatus {
    Success,
    NotFound,
    NoStream,
    StreamDeleted,
}

/// The result of reading a single event from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventReadResult {
    pub status: EventReadStatus,
    pub stream: String,
    pub event_number: i64,
    pub event: Option<ResolvedEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceReadStatus {
    Success,
    StreamNotFound,
    StreamDeleted,
}

/// A slice of events read from a single stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEventsSlice {
    pub status: SliceReadStatus,
    pub stream: String,
    pub from_event_number: i64,
    pub read_direction: ReadDirection,
    pub events: Vec<ResolvedEvent>,
    pub next_event_number: i64,
    pub last_event_number: i64,
    pub is_end_of_stream: bool,
}

/// A slice of events read from the all-stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AllEventsSlice {
    pub read_direction: ReadDirection,
    pub from_position: Position,
    pub next_position: Position,
    pub events: Vec<ResolvedEvent>,
}

impl AllEventsSlice {
    pub fn is_end_of_stream(&self) -> bool {
        self.events.is_empty()
    }
}

/// Access control list of a stream, stored inside its metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StreamAcl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_read_roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_write_roles: Option<Vec<String>>,
}

/// Metadata of a stream, stored as the latest event of its metastream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StreamMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate_before: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<StreamAcl>,
}

impl StreamMetadata {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The raw, undecoded metadata of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStreamMetadataResult {
    pub stream: String,
    pub is_stream_deleted: bool,
    pub metastream_version: i64,
    pub stream_metadata: Vec<u8>,
}

/// The decoded metadata of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadataResult {
    pub stream: String,
    pub is_stream_deleted: bool,
    pub metastream_version: i64,
    pub stream_metadata: StreamMetadata,
}

/// Default ACLs applied cluster-wide, written to the `$settings` stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SystemSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_stream_acl: Option<StreamAcl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_stream_acl: Option<StreamAcl>,
}

/// Tuning knobs of a server-side persistent subscription group.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentSubscriptionSettings {
    pub resolve_link_tos: bool,
    pub start_from: i64,
    pub message_timeout_ms: u64,
    pub record_statistics: bool,
    pub live_buffer_size: i32,
    pub read_batch_size: i32,
    pub history_buffer_size: i32,
    pub max_retry_count: i32,
    pub checkpoint_after_ms: u64,
    pub checkpoint_max_count: i32,
    pub checkpoint_min_count: i32,
    pub max_subscriber_count: i32,
    pub consumer_strategy: String,
}

impl Default for PersistentSubscriptionSettings {
    fn default() -> Self {
        Self {
            resolve_link_tos: false,
            start_from: -1,
            message_timeout_ms: 30_000,
            record_statistics: false,
            live_buffer_size: 500,
            read_batch_size: 10,
            history_buffer_size: 20,
            max_retry_count: 500,
            checkpoint_after_ms: 2_000,
            checkpoint_max_count: 1_000,
            checkpoint_min_count: 10,
            max_subscriber_count: 0,
            consumer_strategy: "RoundRobin".to_string(),
        }
    }
}
