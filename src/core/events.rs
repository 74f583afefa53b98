// src/core/events.rs

//! Defines the event bus used to propagate connection lifecycle events
//! to interested listeners.

use crate::core::OpaliteError;
use std::net::SocketAddr;
use tokio::sync::broadcast::{self, Sender as BroadcastSender};
use tracing::debug;

/// The capacity of the broadcast channel for lifecycle events.
/// Lifecycle events are rare, so a modest buffer is plenty even for
/// slow subscribers.
const EVENT_BUS_CAPACITY: usize = 1024;

/// A connection lifecycle event, as observed by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A channel to the given remote endpoint became fully operational.
    Connected(SocketAddr),
    /// The client was disconnected and will not reconnect.
    Disconnected,
    /// A reconnection attempt is about to start.
    Reconnecting,
    /// The active channel was closed; the client will attempt to reconnect.
    ConnectionClosed,
    /// A connection-level error occurred.
    ErrorOccurred(OpaliteError),
    /// The authentication handshake was rejected or timed out.
    AuthenticationFailed(String),
}

/// The `EventBus` is the distribution hub for connection lifecycle events.
/// Listeners subscribe at any time and may come and go freely; publishing
/// never blocks the control task.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: BroadcastSender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Publishes an event to all subscribers. It's okay if there are none.
    pub fn publish(&self, event: ClientEvent) {
        if self.sender.send(event).is_err() {
            debug!("Published a client event with no active subscribers.");
        }
    }

    /// Provides a new receiver for a listener to observe lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
