// src/core/errors.rs

//! Defines the primary error type for the entire client.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the client.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum OpaliteError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("No connection")]
    NoConnection,

    #[error("Connection is closed: {0}")]
    ConnectionClosed(String),

    #[error("Cannot establish connection: {0}")]
    CannotEstablishConnection(String),

    #[error("Endpoint discovery failed: {0}")]
    EndpointDiscovery(String),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    #[error("Retry limit reached: {0}")]
    RetryLimitReached(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Wrong expected version: {0}")]
    WrongExpectedVersion(String),

    #[error("Stream deleted: {0}")]
    StreamDeleted(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Commit timed out")]
    CommitTimeout,

    // --- Protocol-level errors, fatal for the channel that produced them ---
    #[error("Frame too large: max {max_frame_bytes} got {got_bytes}")]
    FrameTooLarge {
        max_frame_bytes: usize,
        got_bytes: usize,
    },

    #[error("Unknown command byte: 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for OpaliteError {
    fn clone(&self) -> Self {
        match self {
            OpaliteError::Io(e) => OpaliteError::Io(Arc::clone(e)),
            OpaliteError::InvalidArgument(s) => OpaliteError::InvalidArgument(s.clone()),
            OpaliteError::InvalidState(s) => OpaliteError::InvalidState(s.clone()),
            OpaliteError::NoConnection => OpaliteError::NoConnection,
            OpaliteError::ConnectionClosed(s) => OpaliteError::ConnectionClosed(s.clone()),
            OpaliteError::CannotEstablishConnection(s) => {
                OpaliteError::CannotEstablishConnection(s.clone())
            }
            OpaliteError::EndpointDiscovery(s) => OpaliteError::EndpointDiscovery(s.clone()),
            OpaliteError::NotAuthenticated(s) => OpaliteError::NotAuthenticated(s.clone()),
            OpaliteError::OperationTimeout(s) => OpaliteError::OperationTimeout(s.clone()),
            OpaliteError::RetryLimitReached(s) => OpaliteError::RetryLimitReached(s.clone()),
            OpaliteError::ServerError(s) => OpaliteError::ServerError(s.clone()),
            OpaliteError::BadRequest(s) => OpaliteError::BadRequest(s.clone()),
            OpaliteError::WrongExpectedVersion(s) => OpaliteError::WrongExpectedVersion(s.clone()),
            OpaliteError::StreamDeleted(s) => OpaliteError::StreamDeleted(s.clone()),
            OpaliteError::AccessDenied(s) => OpaliteError::AccessDenied(s.clone()),
            OpaliteError::CommitTimeout => OpaliteError::CommitTimeout,
            OpaliteError::FrameTooLarge {
                max_frame_bytes,
                got_bytes,
            } => OpaliteError::FrameTooLarge {
                max_frame_bytes: *max_frame_bytes,
                got_bytes: *got_bytes,
            },
            OpaliteError::UnknownCommand(b) => OpaliteError::UnknownCommand(*b),
            OpaliteError::ProtocolViolation(s) => OpaliteError::ProtocolViolation(s.clone()),
            OpaliteError::Serialization(s) => OpaliteError::Serialization(s.clone()),
        }
    }
}

impl PartialEq for OpaliteError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OpaliteError::Io(e1), OpaliteError::Io(e2)) => e1.to_string() == e2.to_string(),
            (OpaliteError::InvalidArgument(s1), OpaliteError::InvalidArgument(s2)) => s1 == s2,
            (OpaliteError::InvalidState(s1), OpaliteError::InvalidState(s2)) => s1 == s2,
            (OpaliteError::ConnectionClosed(s1), OpaliteError::ConnectionClosed(s2)) => s1 == s2,
            (
                OpaliteError::CannotEstablishConnection(s1),
                OpaliteError::CannotEstablishConnection(s2),
            ) => s1 == s2,
            (OpaliteError::EndpointDiscovery(s1), OpaliteError::EndpointDiscovery(s2)) => s1 == s2,
            (OpaliteError::NotAuthenticated(s1), OpaliteError::NotAuthenticated(s2)) => s1 == s2,
            (OpaliteError::OperationTimeout(s1), OpaliteError::OperationTimeout(s2)) => s1 == s2,
            (OpaliteError::RetryLimitReached(s1), OpaliteError::RetryLimitReached(s2)) => s1 == s2,
            (OpaliteError::ServerError(s1), OpaliteError::ServerError(s2)) => s1 == s2,
            (OpaliteError::BadRequest(s1), OpaliteError::BadRequest(s2)) => s1 == s2,
            (OpaliteError::WrongExpectedVersion(s1), OpaliteError::WrongExpectedVersion(s2)) => {
                s1 == s2
            }
            (OpaliteError::StreamDeleted(s1), OpaliteError::StreamDeleted(s2)) => s1 == s2,
            (OpaliteError::AccessDenied(s1), OpaliteError::AccessDenied(s2)) => s1 == s2,
            (OpaliteError::UnknownCommand(b1), OpaliteError::UnknownCommand(b2)) => b1 == b2,
            (OpaliteError::ProtocolViolation(s1), OpaliteError::ProtocolViolation(s2)) => s1 == s2,
            (OpaliteError::Serialization(s1), OpaliteError::Serialization(s2)) => s1 == s2,
            (
                OpaliteError::FrameTooLarge {
                    max_frame_bytes: m1,
                    got_bytes: g1,
                },
                OpaliteError::FrameTooLarge {
                    max_frame_bytes: m2,
                    got_bytes: g2,
                },
            ) => m1 == m2 && g1 == g2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for OpaliteError {
    fn from(e: std::io::Error) -> Self {
        OpaliteError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for OpaliteError {
    fn from(e: reqwest::Error) -> Self {
        OpaliteError::EndpointDiscovery(e.to_string())
    }
}

impl From<uuid::Error> for OpaliteError {
    fn from(e: uuid::Error) -> Self {
        OpaliteError::ProtocolViolation(format!("Malformed correlation id: {e}"))
    }
}

impl From<serde_json::Error> for OpaliteError {
    fn from(e: serde_json::Error) -> Self {
        OpaliteError::Serialization(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<bincode::error::EncodeError> for OpaliteError {
    fn from(e: bincode::error::EncodeError) -> Self {
        OpaliteError::Serialization(format!("Payload encoding error: {e}"))
    }
}

impl From<bincode::error::DecodeError> for OpaliteError {
    fn from(e: bincode::error::DecodeError) -> Self {
        OpaliteError::Serialization(format!("Payload decoding error: {e}"))
    }
}
