// src/core/subscriptions/manager.rs

//! Tracks pending and live subscriptions. All methods are called from the
//! connection engine's control task.

use crate::connection::channel::ChannelHandle;
use crate::core::OpaliteError;
use crate::core::discovery::NodeEndpoints;
use crate::core::protocol::Package;
use crate::core::subscriptions::{
    SubscriptionDecision, SubscriptionDropReason, SubscriptionOperation,
};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// A tracked subscription together with its bookkeeping.
pub struct SubscriptionItem {
    pub operation: Box<dyn SubscriptionOperation>,
    pub correlation_id: Uuid,
    pub max_retries: i32,
    pub timeout: Duration,
    pub retry_count: i32,
    /// The id of the channel the current attempt was written to.
    pub connection_id: Option<Uuid>,
    pub is_subscribed: bool,
    pub last_updated: Instant,
}

impl SubscriptionItem {
    pub fn new(
        operation: Box<dyn SubscriptionOperation>,
        max_retries: i32,
        timeout: Duration,
    ) -> Self {
        Self {
            operation,
            correlation_id: Uuid::new_v4(),
            max_retries,
            timeout,
            retry_count: 0,
            connection_id: None,
            is_subscribed: false,
            last_updated: Instant::now(),
        }
    }

    fn retries_exhausted(&self) -> bool {
        self.max_retries >= 0 && self.retry_count >= self.max_retries
    }
}

/// Owns the `active` correlation map and the `waiting` FIFO of subscriptions.
#[derive(Default)]
pub struct SubscriptionManager {
    active: HashMap<Uuid, SubscriptionItem>,
    waiting: VecDeque<SubscriptionItem>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, correlation_id: &Uuid) -> bool {
        self.active.contains_key(correlation_id)
    }

    /// Defers a subscription until a channel becomes available.
    pub fn enqueue_subscription(&mut self, item: SubscriptionItem) {
        debug!(operation = item.operation.name(), "Enqueueing subscription.");
        self.waiting.push_back(item);
    }

    /// Writes the subscribe request for one attempt on the given channel.
    /// Returns false when the channel is gone; the subscription is then kept
    /// at the front of the waiting queue for the next channel.
    pub fn start_subscription(
        &mut self,
        mut item: SubscriptionItem,
        channel: &ChannelHandle,
    ) -> bool {
        item.correlation_id = Uuid::new_v4();
        if let Err(e) = item.operation.subscribe(item.correlation_id, channel) {
            warn!(
                operation = item.operation.name(),
                "Failed to start subscription: {e}"
            );
            // A send failure means the channel died under us; keep the
            // subscription for the next one. Anything else is terminal.
            if matches!(e, OpaliteError::ConnectionClosed(_)) {
                item.connection_id = None;
                self.waiting.push_front(item);
                return false;
            }
            item.operation
                .drop_subscription(SubscriptionDropReason::Error, Some(e));
            return true;
        }

        item.connection_id = Some(channel.id);
        item.is_subscribed = false;
        item.last_updated = Instant::now();
        debug!(
            operation = item.operation.name(),
            correlation_id = %item.correlation_id,
            "Subscription started."
        );
        self.active.insert(item.correlation_id, item);
        true
    }

    /// Starts every deferred subscription on the given channel, stopping if
    /// the channel dies mid-drain.
    pub fn schedule_waiting(&mut self, channel: &ChannelHandle) {
        while let Some(item) = self.waiting.pop_front() {
            if !self.start_subscription(item, channel) {
                break;
            }
        }
    }

    /// Applies a package addressed to a tracked subscription. Returns the
    /// master endpoints when the server asked for a reconnect.
    pub fn handle_package(
        &mut self,
        package: &Package,
        channel: &ChannelHandle,
    ) -> Option<NodeEndpoints> {
        let Some(item) = self.active.get_mut(&package.correlation_id) else {
            debug!(
                correlation_id = %package.correlation_id,
                command = ?package.command,
                "Dropping package with no matching subscription."
            );
            return None;
        };

        match item.operation.inspect(package, channel) {
            SubscriptionDecision::DoNothing => None,
            SubscriptionDecision::Subscribed => {
                item.is_subscribed = true;
                item.last_updated = Instant::now();
                None
            }
            SubscriptionDecision::EndOperation => {
                self.active.remove(&package.correlation_id);
                None
            }
            SubscriptionDecision::Retry => {
                let item = self
                    .active
                    .remove(&package.correlation_id)
                    .expect("subscription present by construction");
                self.retry(item);
                None
            }
            SubscriptionDecision::Reconnect(endpoints) => {
                let item = self
                    .active
                    .remove(&package.correlation_id)
                    .expect("subscription present by construction");
                self.retry(item);
                Some(endpoints)
            }
        }
    }

    /// Re-enqueues a pending subscription for another attempt, or drops it
    /// once the retry budget is spent.
    fn retry(&mut self, mut item: SubscriptionItem) {
        if item.retries_exhausted() {
            item.operation.drop_subscription(
                SubscriptionDropReason::Error,
                Some(OpaliteError::RetryLimitReached(format!(
                    "{} retried {} times",
                    item.operation.name(),
                    item.retry_count
                ))),
            );
            return;
        }
        item.retry_count += 1;
        item.connection_id = None;
        item.is_subscribed = false;
        self.waiting.push_back(item);
    }

    /// The periodic timeout sweep over unconfirmed subscriptions. Confirmed
    /// subscriptions are long-lived and never expire here.
    pub fn check_timeouts_and_retry(&mut self, channel: &ChannelHandle) {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .active
            .iter()
            .filter(|(_, item)| {
                !item.is_subscribed && now.duration_since(item.last_updated) > item.timeout
            })
            .map(|(id, _)| *id)
            .collect();

        for correlation_id in expired {
            let mut item = self
                .active
                .remove(&correlation_id)
                .expect("subscription present by construction");

            if item.connection_id != Some(channel.id) {
                debug!(
                    operation = item.operation.name(),
                    "Replaying subscription started on a previous channel."
                );
                item.connection_id = None;
                item.last_updated = Instant::now();
                self.waiting.push_back(item);
            } else if item.retries_exhausted() {
                warn!(
                    operation = item.operation.name(),
                    retries = item.retry_count,
                    "Subscription timed out with no retries left."
                );
                item.operation.drop_subscription(
                    SubscriptionDropReason::Error,
                    Some(OpaliteError::OperationTimeout(format!(
                        "{} timed out after {} retries",
                        item.operation.name(),
                        item.retry_count
                    ))),
                );
            } else {
                item.retry_count += 1;
                item.connection_id = None;
                item.last_updated = Instant::now();
                self.waiting.push_back(item);
            }
        }

        self.schedule_waiting(channel);
    }

    /// Reacts to a channel close: confirmed subscriptions bound to it are
    /// terminally dropped, unconfirmed ones are re-enqueued for the next
    /// channel.
    pub fn purge_subscribed_and_dropped(&mut self, channel_id: Uuid) {
        let bound: Vec<Uuid> = self
            .active
            .iter()
            .filter(|(_, item)| item.connection_id == Some(channel_id))
            .map(|(id, _)| *id)
            .collect();

        for correlation_id in bound {
            let mut item = self
                .active
                .remove(&correlation_id)
                .expect("subscription present by construction");
            if item.is_subscribed {
                item.operation
                    .drop_subscription(SubscriptionDropReason::ConnectionClosed, None);
            } else {
                item.connection_id = None;
                self.waiting.push_back(item);
            }
        }
    }

    /// Fails every tracked subscription with the given error and clears the
    /// manager.
    pub fn fail_all(&mut self, error: &OpaliteError) {
        for (_, mut item) in self.active.drain() {
            item.operation
                .drop_subscription(SubscriptionDropReason::Error, Some(error.clone()));
        }
        for mut item in self.waiting.drain(..) {
            item.operation
                .drop_subscription(SubscriptionDropReason::Error, Some(error.clone()));
        }
    }

    /// Drops everything with a connection-closed reason. Called on disconnect.
    pub fn clean_up(&mut self) {
        for (_, mut item) in self.active.drain() {
            item.operation.drop_subscription(
                SubscriptionDropReason::ConnectionClosed,
                Some(OpaliteError::ConnectionClosed(
                    "connection was closed".to_string(),
                )),
            );
        }
        for mut item in self.waiting.drain(..) {
            item.operation.drop_subscription(
                SubscriptionDropReason::ConnectionClosed,
                Some(OpaliteError::ConnectionClosed(
                    "connection was closed".to_string(),
                )),
            );
        }
    }
}
