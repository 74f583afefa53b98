// src/core/subscriptions/mod.rs

//! Long-lived server-pushed subscriptions and the manager that tracks them
//! across confirmation, drops and connection loss.

pub mod manager;
pub mod persistent;
pub mod volatile;

pub use manager::{SubscriptionItem, SubscriptionManager};
pub use persistent::{PersistentSubscription, PersistentSubscriptionOperation};
pub use volatile::{Subscription, VolatileSubscriptionOperation};

use crate::connection::channel::ChannelHandle;
use crate::core::OpaliteError;
use crate::core::discovery::NodeEndpoints;
use crate::core::protocol::Package;
use crate::core::protocol::messages::SubscriptionDropCause;
use crate::core::types::ResolvedEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why a subscription ended, as reported to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionDropReason {
    /// The caller unsubscribed.
    Unsubscribed,
    AccessDenied,
    NotFound,
    PersistentSubscriptionDeleted,
    SubscriberMaxCountReached,
    /// The channel carrying the subscription was closed.
    ConnectionClosed,
    /// A client-side failure ended the subscription.
    Error,
}

impl From<SubscriptionDropCause> for SubscriptionDropReason {
    fn from(cause: SubscriptionDropCause) -> Self {
        match cause {
            SubscriptionDropCause::Unsubscribed => SubscriptionDropReason::Unsubscribed,
            SubscriptionDropCause::AccessDenied => SubscriptionDropReason::AccessDenied,
            SubscriptionDropCause::NotFound => SubscriptionDropReason::NotFound,
            SubscriptionDropCause::PersistentSubscriptionDeleted => {
                SubscriptionDropReason::PersistentSubscriptionDeleted
            }
            SubscriptionDropCause::SubscriberMaxCountReached => {
                SubscriptionDropReason::SubscriberMaxCountReached
            }
        }
    }
}

/// Receives the life of a subscription. Callbacks run on a dedicated task,
/// never on the control task, so they may block moderately without stalling
/// the client.
pub trait SubscriptionListener: Send + 'static {
    fn on_event_appeared(&mut self, event: ResolvedEvent);

    /// Called exactly once, after which no further events are delivered.
    fn on_dropped(&mut self, reason: SubscriptionDropReason, error: Option<OpaliteError>);
}

/// Internal notice relayed from the control task to the listener driver.
#[derive(Debug)]
pub(crate) enum SubscriptionNotice {
    EventAppeared(ResolvedEvent),
    Dropped(SubscriptionDropReason, Option<OpaliteError>),
}

/// Spawns the task that relays notices to the listener. The task ends after
/// the drop notice.
pub(crate) fn spawn_listener_driver(
    mut listener: Box<dyn SubscriptionListener>,
) -> mpsc::UnboundedSender<SubscriptionNotice> {
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            match notice {
                SubscriptionNotice::EventAppeared(event) => listener.on_event_appeared(event),
                SubscriptionNotice::Dropped(reason, error) => {
                    listener.on_dropped(reason, error);
                    break;
                }
            }
        }
    });
    notice_tx
}

/// What the manager should do with a subscription after a package has been
/// inspected.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionDecision {
    DoNothing,
    /// The server confirmed the subscription.
    Subscribed,
    /// The subscription ended and can be removed.
    EndOperation,
    /// The subscribe attempt should be re-sent with a fresh correlation id.
    Retry,
    /// The server asked us to talk to another node; re-subscribe there.
    Reconnect(NodeEndpoints),
}

/// A long-lived subscription exchange. The concrete type owns the caller's
/// future, the listener notices and the drop bookkeeping.
pub trait SubscriptionOperation: Send {
    fn name(&self) -> &'static str;

    /// Writes the subscribe request for one attempt on the given channel.
    fn subscribe(
        &mut self,
        correlation_id: Uuid,
        channel: &ChannelHandle,
    ) -> Result<(), OpaliteError>;

    /// Applies a package addressed to this subscription.
    fn inspect(&mut self, package: &Package, channel: &ChannelHandle) -> SubscriptionDecision;

    /// Ends the subscription: fails the pending future or notifies the
    /// listener, exactly once.
    fn drop_subscription(&mut self, reason: SubscriptionDropReason, error: Option<OpaliteError>);
}
