// src/connection/tasks.rs

//! The control task queue of the connection engine.
//!
//! Every state change enters through a [`Task`]: user verbs from the facade,
//! completions posted by spawned work, and inbound traffic from the channel
//! reader. The engine is the sole consumer, so handlers run strictly one at a
//! time in FIFO order and a handler's own enqueue is never executed
//! synchronously.

use crate::connection::channel::ChannelHandle;
use crate::core::OpaliteError;
use crate::core::discovery::NodeEndpoints;
use crate::core::operations::Operation;
use crate::core::protocol::Package;
use crate::core::subscriptions::SubscriptionOperation;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

pub type TaskSender = mpsc::UnboundedSender<Task>;
pub type TaskReceiver = mpsc::UnboundedReceiver<Task>;

pub fn task_queue() -> (TaskSender, TaskReceiver) {
    mpsc::unbounded_channel()
}

pub enum Task {
    // --- user verbs ---
    StartConnection {
        result: oneshot::Sender<Result<(), OpaliteError>>,
    },
    CloseConnection {
        reason: String,
        error: Option<OpaliteError>,
    },
    StartOperation {
        operation: Box<dyn Operation>,
    },
    StartSubscription {
        operation: Box<dyn SubscriptionOperation>,
    },
    StartPersistentSubscription {
        operation: Box<dyn SubscriptionOperation>,
    },

    // --- completions posted by spawned work ---
    EstablishTcpConnection {
        endpoints: NodeEndpoints,
        epoch: u64,
    },
    DiscoveryFailed {
        epoch: u64,
        error: OpaliteError,
    },
    TcpConnectionEstablished {
        channel: ChannelHandle,
        epoch: u64,
    },
    TcpConnectionFailed {
        epoch: u64,
        error: OpaliteError,
    },
    TcpConnectionClosed {
        channel_id: Uuid,
        error: Option<OpaliteError>,
    },
    PackageReceived {
        channel_id: Uuid,
        package: Package,
    },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::StartConnection { .. } => "StartConnection",
            Task::CloseConnection { .. } => "CloseConnection",
            Task::StartOperation { .. } => "StartOperation",
            Task::StartSubscription { .. } => "StartSubscription",
            Task::StartPersistentSubscription { .. } => "StartPersistentSubscription",
            Task::EstablishTcpConnection { .. } => "EstablishTcpConnection",
            Task::DiscoveryFailed { .. } => "DiscoveryFailed",
            Task::TcpConnectionEstablished { .. } => "TcpConnectionEstablished",
            Task::TcpConnectionFailed { .. } => "TcpConnectionFailed",
            Task::TcpConnectionClosed { .. } => "TcpConnectionClosed",
            Task::PackageReceived { .. } => "PackageReceived",
        }
    }
}
