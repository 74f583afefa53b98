// src/core/protocol/command.rs

//! Command byte values carried by every package on the wire.

use crate::core::OpaliteError;

/// The single-byte command discriminator of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TcpCommand {
    HeartbeatRequest = 0x01,
    HeartbeatResponse = 0x02,
    Ping = 0x03,
    Pong = 0x04,

    WriteEvents = 0x82,
    WriteEventsCompleted = 0x83,
    TransactionStart = 0x84,
    TransactionStartCompleted = 0x85,
    TransactionWrite = 0x86,
    TransactionWriteCompleted = 0x87,
    TransactionCommit = 0x88,
    TransactionCommitCompleted = 0x89,
    DeleteStream = 0x8A,
    DeleteStreamCompleted = 0x8B,

    ReadEvent = 0xB0,
    ReadEventCompleted = 0xB1,
    ReadStreamEventsForward = 0xB2,
    ReadStreamEventsForwardCompleted = 0xB3,
    ReadStreamEventsBackward = 0xB4,
    ReadStreamEventsBackwardCompleted = 0xB5,
    ReadAllEventsForward = 0xB6,
    ReadAllEventsForwardCompleted = 0xB7,
    ReadAllEventsBackward = 0xB8,
    ReadAllEventsBackwardCompleted = 0xB9,

    SubscribeToStream = 0xC0,
    SubscriptionConfirmation = 0xC1,
    StreamEventAppeared = 0xC2,
    UnsubscribeFromStream = 0xC3,
    SubscriptionDropped = 0xC4,
    ConnectToPersistentSubscription = 0xC5,
    PersistentSubscriptionConfirmation = 0xC6,
    PersistentSubscriptionStreamEventAppeared = 0xC7,
    CreatePersistentSubscription = 0xC8,
    CreatePersistentSubscriptionCompleted = 0xC9,
    DeletePersistentSubscription = 0xCA,
    DeletePersistentSubscriptionCompleted = 0xCB,
    PersistentSubscriptionAckEvents = 0xCC,
    PersistentSubscriptionNakEvents = 0xCD,
    UpdatePersistentSubscription = 0xCE,
    UpdatePersistentSubscriptionCompleted = 0xCF,

    BadRequest = 0xF0,
    NotHandled = 0xF1,
    Authenticate = 0xF2,
    Authenticated = 0xF3,
    NotAuthenticated = 0xF4,
}

impl TcpCommand {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self, OpaliteError> {
        let command = match value {
            0x01 => TcpCommand::HeartbeatRequest,
            0x02 => TcpCommand::HeartbeatResponse,
            0x03 => TcpCommand::Ping,
            0x04 => TcpCommand::Pong,
            0x82 => TcpCommand::WriteEvents,
            0x83 => TcpCommand::WriteEventsCompleted,
            0x84 => TcpCommand::TransactionStart,
            0x85 => TcpCommand::TransactionStartCompleted,
            0x86 => TcpCommand::TransactionWrite,
            0x87 => TcpCommand::TransactionWriteCompleted,
            0x88 => TcpCommand::TransactionCommit,
            0x89 => TcpCommand::TransactionCommitCompleted,
            0x8A => TcpCommand::DeleteStream,
            0x8B => TcpCommand::DeleteStreamCompleted,
            0xB0 => TcpCommand::ReadEvent,
            0xB1 => TcpCommand::ReadEventCompleted,
            0xB2 => TcpCommand::ReadStreamEventsForward,
            0xB3 => TcpCommand::ReadStreamEventsForwardCompleted,
            0xB4 => TcpCommand::ReadStreamEventsBackward,
            0xB5 => TcpCommand::ReadStreamEventsBackwardCompleted,
            0xB6 => TcpCommand::ReadAllEventsForward,
            0xB7 => TcpCommand::ReadAllEventsForwardCompleted,
            0xB8 => TcpCommand::ReadAllEventsBackward,
            0xB9 => TcpCommand::ReadAllEventsBackwardCompleted,
            0xC0 => TcpCommand::SubscribeToStream,
            0xC1 => TcpCommand::SubscriptionConfirmation,
            0xC2 => TcpCommand::StreamEventAppeared,
            0xC3 => TcpCommand::UnsubscribeFromStream,
            0xC4 => TcpCommand::SubscriptionDropped,
            0xC5 => TcpCommand::ConnectToPersistentSubscription,
            0xC6 => TcpCommand::PersistentSubscriptionConfirmation,
            0xC7 => TcpCommand::PersistentSubscriptionStreamEventAppeared,
            0xC8 => TcpCommand::CreatePersistentSubscription,
            0xC9 => TcpCommand::CreatePersistentSubscriptionCompleted,
            0xCA => TcpCommand::DeletePersistentSubscription,
            0xCB => TcpCommand::DeletePersistentSubscriptionCompleted,
            0xCC => TcpCommand::PersistentSubscriptionAckEvents,
            0xCD => TcpCommand::PersistentSubscriptionNakEvents,
            0xCE => TcpCommand::UpdatePersistentSubscription,
            0xCF => TcpCommand::UpdatePersistentSubscriptionCompleted,
            0xF0 => TcpCommand::BadRequest,
            0xF1 => TcpCommand::NotHandled,
            0xF2 => TcpCommand::Authenticate,
            0xF3 => TcpCommand::Authenticated,
            0xF4 => TcpCommand::NotAuthenticated,
            other => return Err(OpaliteError::UnknownCommand(other)),
        };
        Ok(command)
    }
}
