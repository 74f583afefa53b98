// src/core/operations/manager.rs

//! Tracks pending one-shot operations: correlation, capacity, retries and
//! timeouts. All methods are called from the connection engine's control task.

use crate::connection::channel::ChannelHandle;
use crate::core::OpaliteError;
use crate::core::discovery::NodeEndpoints;
use crate::core::operations::{Decision, Operation};
use crate::core::protocol::Package;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// A pending operation together with its bookkeeping.
pub struct OperationItem {
    pub operation: Box<dyn Operation>,
    pub correlation_id: Uuid,
    pub max_retries: i32,
    pub timeout: Duration,
    pub retry_count: i32,
    /// The id of the channel the current attempt was written to.
    pub connection_id: Option<Uuid>,
    pub last_updated: Instant,
}

impl OperationItem {
    pub fn new(operation: Box<dyn Operation>, max_retries: i32, timeout: Duration) -> Self {
        Self {
            operation,
            correlation_id: Uuid::new_v4(),
            max_retries,
            timeout,
            retry_count: 0,
            connection_id: None,
            last_updated: Instant::now(),
        }
    }

    fn retries_exhausted(&self) -> bool {
        self.max_retries >= 0 && self.retry_count >= self.max_retries
    }
}

/// Owns the `active` correlation map and the `waiting` FIFO of operations.
pub struct OperationManager {
    max_concurrent: usize,
    active: HashMap<Uuid, OperationItem>,
    waiting: VecDeque<OperationItem>,
    /// Total in-flight operation count, shared with the facade for admission.
    total_count: Arc<AtomicUsize>,
}

impl OperationManager {
    pub fn new(max_concurrent: usize, total_count: Arc<AtomicUsize>) -> Self {
        Self {
            max_concurrent,
            active: HashMap::new(),
            waiting: VecDeque::new(),
            total_count,
        }
    }

    pub fn total_count(&self) -> usize {
        self.total_count.load(Ordering::Relaxed)
    }

    pub fn contains(&self, correlation_id: &Uuid) -> bool {
        self.active.contains_key(correlation_id)
    }

    fn sync_total_count(&self) {
        self.total_count
            .store(self.active.len() + self.waiting.len(), Ordering::Relaxed);
    }

    /// Defers an operation until a channel becomes available.
    pub fn enqueue_operation(&mut self, item: OperationItem) {
        debug!(operation = item.operation.name(), "Enqueueing operation.");
        self.waiting.push_back(item);
        self.sync_total_count();
    }

    /// Sends an operation on the given channel, or defers it when the wire is
    /// already at capacity.
    pub fn schedule_operation(&mut self, item: OperationItem, channel: &ChannelHandle) {
        if self.active.len() >= self.max_concurrent {
            debug!(
                operation = item.operation.name(),
                active = self.active.len(),
                "Operation capacity reached; deferring."
            );
            self.waiting.push_back(item);
        } else {
            let _ = self.send(item, channel);
        }
        self.sync_total_count();
    }

    /// Pulls deferred operations onto the channel while capacity remains and
    /// the channel stays writable.
    pub fn schedule_waiting(&mut self, channel: &ChannelHandle) {
        while self.active.len() < self.max_concurrent {
            let Some(item) = self.waiting.pop_front() else {
                break;
            };
            if !self.send(item, channel) {
                break;
            }
        }
        self.sync_total_count();
    }

    /// One send attempt: fresh correlation id, request package, active slot.
    /// Returns false when the channel is gone; the operation is then kept at
    /// the front of the waiting queue for the next channel.
    fn send(&mut self, mut item: OperationItem, channel: &ChannelHandle) -> bool {
        item.correlation_id = Uuid::new_v4();
        let package = match item.operation.create_request(item.correlation_id) {
            Ok(package) => package,
            Err(e) => {
                warn!(
                    operation = item.operation.name(),
                    "Failed to build request package: {e}"
                );
                item.operation.fail(e);
                return true;
            }
        };

        if channel.send(package).is_err() {
            item.connection_id = None;
            self.waiting.push_front(item);
            return false;
        }

        item.connection_id = Some(channel.id);
        item.last_updated = Instant::now();
        debug!(
            operation = item.operation.name(),
            correlation_id = %item.correlation_id,
            "Operation sent."
        );
        self.active.insert(item.correlation_id, item);
        true
    }

    /// Applies a response package. Returns the master endpoints when the
    /// server asked for a reconnect.
    pub fn handle_response(
        &mut self,
        package: &Package,
        channel: &ChannelHandle,
    ) -> Option<NodeEndpoints> {
        let Some(item) = self.active.get_mut(&package.correlation_id) else {
            // Late responses for timed-out or completed operations are expected.
            debug!(
                correlation_id = %package.correlation_id,
                command = ?package.command,
                "Dropping response with no matching operation."
            );
            return None;
        };

        let decision = item.operation.inspect(package);
        match decision {
            Decision::DoNothing => None,
            Decision::EndOperation => {
                self.active.remove(&package.correlation_id);
                // Capacity freed; pull deferred work onto the wire.
                self.schedule_waiting(channel);
                None
            }
            Decision::Retry => {
                let item = self
                    .active
                    .remove(&package.correlation_id)
                    .expect("operation present by construction");
                // Re-sent on the next connect or timeout sweep, not
                // immediately: the server just told us it cannot serve it.
                self.retry(item);
                self.sync_total_count();
                None
            }
            Decision::Reconnect(endpoints) => {
                let item = self
                    .active
                    .remove(&package.correlation_id)
                    .expect("operation present by construction");
                self.retry(item);
                self.sync_total_count();
                Some(endpoints)
            }
        }
    }

    /// Re-enqueues an operation for another attempt, or fails it once the
    /// retry budget is spent.
    fn retry(&mut self, mut item: OperationItem) {
        if item.retries_exhausted() {
            item.operation.fail(OpaliteError::RetryLimitReached(format!(
                "{} retried {} times",
                item.operation.name(),
                item.retry_count
            )));
            return;
        }
        item.retry_count += 1;
        item.connection_id = None;
        self.waiting.push_back(item);
    }

    /// The periodic timeout sweep against the current channel.
    ///
    /// An expired operation bound to a previous channel is replayed without
    /// spending a retry: it may never have reached the server.
    pub fn check_timeouts_and_retry(&mut self, channel: &ChannelHandle) {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .active
            .iter()
            .filter(|(_, item)| now.duration_since(item.last_updated) > item.timeout)
            .map(|(id, _)| *id)
            .collect();

        for correlation_id in expired {
            let mut item = self
                .active
                .remove(&correlation_id)
                .expect("operation present by construction");

            if item.connection_id != Some(channel.id) {
                debug!(
                    operation = item.operation.name(),
                    "Replaying operation scheduled on a previous channel."
                );
                item.connection_id = None;
                item.last_updated = Instant::now();
                self.waiting.push_back(item);
            } else if item.retries_exhausted() {
                warn!(
                    operation = item.operation.name(),
                    retries = item.retry_count,
                    "Operation timed out with no retries left."
                );
                item.operation.fail(OpaliteError::OperationTimeout(format!(
                    "{} timed out after {} retries",
                    item.operation.name(),
                    item.retry_count
                )));
            } else {
                item.retry_count += 1;
                item.connection_id = None;
                item.last_updated = Instant::now();
                self.waiting.push_back(item);
            }
        }

        self.schedule_waiting(channel);
    }

    /// Fails every tracked operation with the given error and clears the
    /// manager.
    pub fn fail_all(&mut self, error: &OpaliteError) {
        for (_, mut item) in self.active.drain() {
            item.operation.fail(error.clone());
        }
        for mut item in self.waiting.drain(..) {
            item.operation.fail(error.clone());
        }
        self.sync_total_count();
    }

    /// Fails everything with a connection-closed error. Called on disconnect.
    pub fn clean_up(&mut self) {
        self.fail_all(&OpaliteError::ConnectionClosed(
            "connection was closed".to_string(),
        ));
    }
}
