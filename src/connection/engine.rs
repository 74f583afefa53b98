// src/connection/engine.rs

//! The connection lifecycle engine.
//!
//! A single control task consumes the task queue and owns every piece of
//! mutable state: the channel, the connecting phase, both managers and the
//! reconnection bookkeeping. The transport tasks and the discoverer only ever
//! post messages back into the queue, so all state transitions are serialized
//! here.

use crate::config::{NodeSettings, Settings};
use crate::connection::auth::{AuthenticationStage, AuthenticationStatus};
use crate::connection::channel::{self, ChannelHandle};
use crate::connection::tasks::{Task, TaskReceiver, TaskSender};
use crate::core::discovery::{
    ClusterDiscoverer, EndpointDiscoverer, NodeEndpoints, StaticEndpointDiscoverer,
};
use crate::core::events::{ClientEvent, EventBus};
use crate::core::operations::{Operation, OperationItem, OperationManager, text_payload};
use crate::core::protocol::{Package, TcpCommand};
use crate::core::subscriptions::{
    SubscriptionDropReason, SubscriptionItem, SubscriptionManager, SubscriptionOperation,
};
use crate::core::OpaliteError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// The period of the engine's housekeeping ticker.
const TICK_PERIOD: Duration = Duration::from_millis(200);

/// The coarse connection state, derived from the channel and the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Init,
    Connecting,
    Connected,
    Closed,
}

/// The fine-grained phase of a connection attempt. Within one attempt the
/// phase only moves forward; any error re-enters `Reconnecting` via a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectingPhase {
    Invalid,
    Reconnecting,
    EndpointDiscovery,
    ConnectionEstablishing,
    Authentication,
    Connected,
}

/// Reconnection attempt counter plus the timestamp of the last phase entry
/// that awaits a delay.
struct ReconnectionInfo {
    attempt: i32,
    timestamp: Instant,
}

impl ReconnectionInfo {
    fn new() -> Self {
        Self {
            attempt: 0,
            timestamp: Instant::now(),
        }
    }

    fn reset(&mut self) {
        self.attempt = 0;
        self.touch();
    }

    fn touch(&mut self) {
        self.timestamp = Instant::now();
    }
}

pub struct ConnectionEngine {
    settings: Arc<Settings>,
    tasks_tx: TaskSender,
    tasks_rx: TaskReceiver,
    events: EventBus,
    discoverer: Arc<dyn EndpointDiscoverer>,
    operations: OperationManager,
    subscriptions: SubscriptionManager,

    channel: Option<ChannelHandle>,
    connecting_phase: ConnectingPhase,
    /// Terminal flag: set by `disconnect`, never cleared.
    closed: bool,
    auth_stage: Option<AuthenticationStage>,
    reconnection: ReconnectionInfo,
    last_operation_timeout_check: Option<Instant>,
    /// The remote of the last established channel, handed to the discoverer
    /// as the endpoint to avoid.
    last_connected_remote: Option<SocketAddr>,
    /// Endpoints to connect to once the current channel finishes closing.
    pending_reconnect: Option<NodeEndpoints>,
    /// Epoch token of the current connection attempt. Completions of spawned
    /// work carry the epoch that started them; stale ones are dropped.
    attempt_epoch: u64,
}

impl ConnectionEngine {
    pub fn new(
        settings: Arc<Settings>,
        tasks_tx: TaskSender,
        tasks_rx: TaskReceiver,
        events: EventBus,
        operation_count: Arc<AtomicUsize>,
    ) -> Self {
        let discoverer: Arc<dyn EndpointDiscoverer> = match &settings.node {
            NodeSettings::Static(static_nodes) => {
                Arc::new(StaticEndpointDiscoverer::new(static_nodes.clone()))
            }
            NodeSettings::Cluster(cluster) => Arc::new(ClusterDiscoverer::new(cluster.clone())),
        };

        let operations = OperationManager::new(settings.max_concurrent_operations, operation_count);

        Self {
            settings,
            tasks_tx,
            tasks_rx,
            events,
            discoverer,
            operations,
            subscriptions: SubscriptionManager::new(),
            channel: None,
            connecting_phase: ConnectingPhase::Invalid,
            closed: false,
            auth_stage: None,
            reconnection: ReconnectionInfo::new(),
            last_operation_timeout_check: None,
            last_connected_remote: None,
            pending_reconnect: None,
            attempt_epoch: 0,
        }
    }

    /// The control loop. Runs until the client disconnects terminally.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_task = self.tasks_rx.recv() => match maybe_task {
                    Some(task) => self.handle_task(task),
                    None => break,
                },
                _ = ticker.tick() => self.on_tick(),
            }

            if self.closed {
                break;
            }
        }
        debug!("Connection engine stopped.");
    }

    fn handle_task(&mut self, task: Task) {
        trace!(kind = task.kind(), "Handling task.");
        match task {
            Task::StartConnection { result } => self.handle_start_connection(result),
            Task::CloseConnection { reason, error } => self.close_connection(&reason, error),
            Task::StartOperation { operation } => self.handle_start_operation(operation),
            Task::StartSubscription { operation } => self.handle_start_subscription(operation),
            Task::StartPersistentSubscription { operation } => {
                self.handle_start_subscription(operation)
            }
            Task::EstablishTcpConnection { endpoints, epoch } => {
                self.handle_establish_tcp_connection(endpoints, epoch)
            }
            Task::DiscoveryFailed { epoch, error } => self.handle_discovery_failed(epoch, error),
            Task::TcpConnectionEstablished { channel, epoch } => {
                self.handle_tcp_connection_established(channel, epoch)
            }
            Task::TcpConnectionFailed { epoch, error } => {
                self.handle_tcp_connection_failed(epoch, error)
            }
            Task::TcpConnectionClosed { channel_id, error } => {
                self.handle_tcp_connection_closed(channel_id, error)
            }
            Task::PackageReceived {
                channel_id,
                package,
            } => self.handle_package(channel_id, package),
        }
    }

    fn connection_state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else if self.channel.is_none() {
            ConnectionState::Init
        } else if self.connecting_phase == ConnectingPhase::Connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        }
    }

    // --- ticker duties ---

    fn on_tick(&mut self) {
        match self.connection_state() {
            ConnectionState::Init => self.check_reconnection(),
            ConnectionState::Connected => self.check_operation_timeout(),
            _ => {}
        }

        // The credential exchange has its own deadline, independent of any
        // operation being in flight.
        if self.connecting_phase == ConnectingPhase::Authentication
            && let Some(stage) = &self.auth_stage
            && stage.is_expired(Instant::now())
        {
            self.auth_stage = None;
            self.on_authentication_completed(AuthenticationStatus::Timeout);
        }
    }

    fn check_reconnection(&mut self) {
        if self.connecting_phase != ConnectingPhase::Reconnecting
            || self.reconnection.timestamp.elapsed() < self.settings.reconnection_delay()
        {
            return;
        }

        debug!("Checking reconnection...");
        self.reconnection.attempt += 1;
        self.reconnection.touch();

        if self.settings.max_reconnections >= 0
            && self.reconnection.attempt > self.settings.max_reconnections
        {
            self.close_connection("Reconnection limit reached", None);
        } else {
            self.events.publish(ClientEvent::Reconnecting);
            self.discover_endpoint(None);
        }
    }

    fn check_operation_timeout(&mut self) {
        // Mid-switch to another node: the current channel is on its way out,
        // nothing may be scheduled on it anymore.
        if self.pending_reconnect.is_some() {
            return;
        }
        let due = self
            .last_operation_timeout_check
            .is_none_or(|last| last.elapsed() > self.settings.operation_timeout_check_interval());
        if !due {
            return;
        }

        if let Some(channel) = self.channel.clone() {
            self.operations.check_timeouts_and_retry(&channel);
            self.subscriptions.check_timeouts_and_retry(&channel);
        }
        self.last_operation_timeout_check = Some(Instant::now());
    }

    // --- connection establishment ---

    fn handle_start_connection(&mut self, result: oneshot::Sender<Result<(), OpaliteError>>) {
        debug!("StartConnection");
        match self.connection_state() {
            ConnectionState::Init if self.connecting_phase == ConnectingPhase::Invalid => {
                self.connecting_phase = ConnectingPhase::Reconnecting;
                self.reconnection.reset();
                self.discover_endpoint(Some(result));
            }
            ConnectionState::Init | ConnectionState::Connecting | ConnectionState::Connected => {
                let _ = result.send(Err(OpaliteError::InvalidState(
                    "connection is already active".to_string(),
                )));
            }
            ConnectionState::Closed => {
                let _ = result.send(Err(OpaliteError::ConnectionClosed(
                    "connection is closed".to_string(),
                )));
            }
        }
    }

    fn discover_endpoint(&mut self, result: Option<oneshot::Sender<Result<(), OpaliteError>>>) {
        if self.connection_state() != ConnectionState::Init
            || self.connecting_phase != ConnectingPhase::Reconnecting
        {
            return;
        }

        debug!("Discovering endpoint...");
        self.connecting_phase = ConnectingPhase::EndpointDiscovery;
        self.attempt_epoch += 1;
        let epoch = self.attempt_epoch;

        let discoverer = Arc::clone(&self.discoverer);
        let failed_endpoint = self.last_connected_remote;
        let tasks = self.tasks_tx.clone();
        tokio::spawn(async move {
            match discoverer.discover(failed_endpoint).await {
                Ok(endpoints) => {
                    let _ = tasks.send(Task::EstablishTcpConnection { endpoints, epoch });
                    if let Some(result) = result {
                        let _ = result.send(Ok(()));
                    }
                }
                Err(e) => {
                    let _ = tasks.send(Task::DiscoveryFailed {
                        epoch,
                        error: e.clone(),
                    });
                    if let Some(result) = result {
                        let _ = result.send(Err(OpaliteError::CannotEstablishConnection(format!(
                            "cannot resolve target endpoint: {e}"
                        ))));
                    }
                }
            }
        });
    }

    fn handle_discovery_failed(&mut self, epoch: u64, error: OpaliteError) {
        if epoch != self.attempt_epoch {
            debug!("Stale discovery failure ignored.");
            return;
        }
        self.close_connection(
            "Failed to resolve TCP endpoint to which to connect.",
            Some(error),
        );
    }

    fn handle_establish_tcp_connection(&mut self, endpoints: NodeEndpoints, epoch: u64) {
        if epoch != self.attempt_epoch {
            debug!("Stale endpoint resolution ignored.");
            return;
        }

        let Some(endpoint) = endpoints.endpoint_for(self.settings.ssl.enabled) else {
            self.close_connection("No endpoint to node specified.", None);
            return;
        };

        if self.connection_state() != ConnectionState::Init
            || self.connecting_phase != ConnectingPhase::EndpointDiscovery
        {
            return;
        }

        debug!("Connecting to [{endpoint}]...");
        self.connecting_phase = ConnectingPhase::ConnectionEstablishing;

        let settings = Arc::clone(&self.settings);
        let tasks = self.tasks_tx.clone();
        tokio::spawn(async move {
            match channel::establish(settings, endpoint, tasks.clone()).await {
                Ok(channel) => {
                    let _ = tasks.send(Task::TcpConnectionEstablished { channel, epoch });
                }
                Err(error) => {
                    let _ = tasks.send(Task::TcpConnectionFailed { epoch, error });
                }
            }
        });
    }

    fn handle_tcp_connection_established(&mut self, channel: ChannelHandle, epoch: u64) {
        if epoch != self.attempt_epoch
            || self.connection_state() != ConnectionState::Init
            || self.connecting_phase != ConnectingPhase::ConnectionEstablishing
        {
            debug!(channel_id = %channel.id, "Stale connection establishment; closing channel.");
            channel.close();
            return;
        }

        self.connecting_phase = ConnectingPhase::Authentication;
        self.channel = Some(channel.clone());

        match AuthenticationStage::begin(&self.settings, &channel) {
            Ok(Some(stage)) => self.auth_stage = Some(stage),
            Ok(None) => self.on_authentication_completed(AuthenticationStatus::Ignored),
            Err(e) => {
                warn!("Failed to send authentication request: {e}");
                self.close_tcp_connection("unable to start authentication");
            }
        }
    }

    fn handle_tcp_connection_failed(&mut self, epoch: u64, error: OpaliteError) {
        if epoch != self.attempt_epoch {
            debug!("Stale connect failure ignored.");
            return;
        }
        if self.connection_state() == ConnectionState::Init
            && self.connecting_phase == ConnectingPhase::ConnectionEstablishing
        {
            warn!("Unable to connect: {error}");
            self.connecting_phase = ConnectingPhase::Reconnecting;
            self.reconnection.touch();
        }
    }

    fn on_authentication_completed(&mut self, status: AuthenticationStatus) {
        match status {
            AuthenticationStatus::Success | AuthenticationStatus::Ignored => {
                self.goto_connected_phase()
            }
            AuthenticationStatus::Failed(reason) => self.on_authentication_failed(reason),
            AuthenticationStatus::Timeout => {
                self.on_authentication_failed("authentication timed out".to_string())
            }
        }
    }

    fn on_authentication_failed(&mut self, reason: String) {
        warn!("Authentication failed: {reason}");
        self.events
            .publish(ClientEvent::AuthenticationFailed(reason.clone()));

        // Work submitted against this client cannot proceed without a valid
        // identity; fail it now rather than after the reconnect budget.
        let error = OpaliteError::NotAuthenticated(reason);
        self.operations.fail_all(&error);
        self.subscriptions.fail_all(&error);

        self.close_tcp_connection("authentication failed");
    }

    fn goto_connected_phase(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return;
        };

        self.connecting_phase = ConnectingPhase::Connected;
        self.reconnection.reset();
        self.last_connected_remote = Some(channel.remote);
        self.events.publish(ClientEvent::Connected(channel.remote));
        info!(remote = %channel.remote, "Client connected.");

        self.operations.schedule_waiting(&channel);
        self.subscriptions.schedule_waiting(&channel);
        self.check_operation_timeout();
    }

    // --- closing and reconnection ---

    fn close_connection(&mut self, reason: &str, error: Option<OpaliteError>) {
        if self.connection_state() == ConnectionState::Closed {
            debug!("CloseConnection ignored because connection is closed, reason: {reason}");
            return;
        }
        debug!("CloseConnection, reason: {reason}");
        if let Some(error) = error {
            self.events.publish(ClientEvent::ErrorOccurred(error));
        }
        self.disconnect(reason);
    }

    fn disconnect(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.operations.clean_up();
        self.subscriptions.clean_up();
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.connecting_phase = ConnectingPhase::Invalid;
        self.events.publish(ClientEvent::Disconnected);
        info!("Disconnected, reason: {reason}");
    }

    fn close_tcp_connection(&mut self, reason: &str) {
        if let Some(channel) = &self.channel {
            debug!(channel_id = %channel.id, "Closing TCP connection, reason: {reason}");
            channel.close();
        } else {
            self.connecting_phase = ConnectingPhase::Reconnecting;
            self.reconnection.touch();
        }
    }

    fn handle_tcp_connection_closed(&mut self, channel_id: Uuid, error: Option<OpaliteError>) {
        if self.closed {
            return;
        }
        match &self.channel {
            Some(channel) if channel.id == channel_id => {
                info!(remote = %channel.remote, "Connection closed.");
                if let Some(error) = error {
                    self.events.publish(ClientEvent::ErrorOccurred(error));
                }
                self.subscriptions.purge_subscribed_and_dropped(channel_id);
                self.events.publish(ClientEvent::ConnectionClosed);

                self.channel = None;
                self.auth_stage = None;
                self.connecting_phase = ConnectingPhase::Reconnecting;
                self.reconnection.touch();

                // A server-directed reconnect skips discovery and goes
                // straight to the named node.
                if let Some(endpoints) = self.pending_reconnect.take() {
                    self.connecting_phase = ConnectingPhase::EndpointDiscovery;
                    self.attempt_epoch += 1;
                    let epoch = self.attempt_epoch;
                    let _ = self
                        .tasks_tx
                        .send(Task::EstablishTcpConnection { endpoints, epoch });
                }
            }
            _ => debug!(%channel_id, "Stale channel close ignored."),
        }
    }

    fn reconnect_to(&mut self, endpoints: NodeEndpoints) {
        let Some(endpoint) = endpoints.endpoint_for(self.settings.ssl.enabled) else {
            self.close_connection("No endpoint is specified while trying to reconnect.", None);
            return;
        };

        if self.connection_state() == ConnectionState::Connected
            && let Some(channel) = &self.channel
            && channel.remote != endpoint
        {
            info!(
                channel_id = %channel.id,
                current = %channel.remote,
                target = %endpoint,
                "Going to reconnect to another node."
            );
            self.pending_reconnect = Some(endpoints);
            self.close_tcp_connection("reconnect to another node");
        }
    }

    // --- data plane ---

    fn handle_start_operation(&mut self, operation: Box<dyn Operation>) {
        let mut item = OperationItem::new(
            operation,
            self.settings.max_operation_retries,
            self.settings.operation_timeout(),
        );

        match self.connection_state() {
            ConnectionState::Init => {
                if self.connecting_phase == ConnectingPhase::Invalid {
                    item.operation.fail(OpaliteError::NoConnection);
                } else {
                    self.operations.enqueue_operation(item);
                }
            }
            ConnectionState::Connecting => self.operations.enqueue_operation(item),
            ConnectionState::Connected => {
                let channel = self.channel.clone().expect("connected implies a channel");
                self.operations.schedule_operation(item, &channel);
            }
            ConnectionState::Closed => item.operation.fail(OpaliteError::ConnectionClosed(
                "connection is closed".to_string(),
            )),
        }
    }

    fn handle_start_subscription(&mut self, operation: Box<dyn SubscriptionOperation>) {
        let mut item = SubscriptionItem::new(
            operation,
            self.settings.max_operation_retries,
            self.settings.operation_timeout(),
        );

        match self.connection_state() {
            ConnectionState::Init => {
                if self.connecting_phase == ConnectingPhase::Invalid {
                    item.operation
                        .drop_subscription(SubscriptionDropReason::Error, Some(OpaliteError::NoConnection));
                } else {
                    self.subscriptions.enqueue_subscription(item);
                }
            }
            ConnectionState::Connecting => self.subscriptions.enqueue_subscription(item),
            ConnectionState::Connected => {
                let channel = self.channel.clone().expect("connected implies a channel");
                self.subscriptions.start_subscription(item, &channel);
            }
            ConnectionState::Closed => item.operation.drop_subscription(
                SubscriptionDropReason::ConnectionClosed,
                Some(OpaliteError::ConnectionClosed(
                    "connection is closed".to_string(),
                )),
            ),
        }
    }

    fn handle_package(&mut self, channel_id: Uuid, package: Package) {
        let Some(channel) = self.channel.clone() else {
            debug!(%channel_id, "Package for an unbound channel dropped.");
            return;
        };
        if channel.id != channel_id {
            debug!(%channel_id, "Package for a stale channel dropped.");
            return;
        }

        // A bad-request with the nil correlation id condemns the whole
        // connection, not a single operation.
        if package.command == TcpCommand::BadRequest && package.correlation_id.is_nil() {
            let message = text_payload(&package, "<no message>");
            self.close_connection(
                "Connection-wide BadRequest received. Too dangerous to continue.",
                Some(OpaliteError::BadRequest(message)),
            );
            return;
        }

        if self.connecting_phase == ConnectingPhase::Authentication
            && let Some(stage) = &self.auth_stage
            && let Some(status) = stage.inspect(&package)
        {
            self.auth_stage = None;
            self.on_authentication_completed(status);
            return;
        }

        if self.operations.contains(&package.correlation_id) {
            if let Some(endpoints) = self.operations.handle_response(&package, &channel) {
                self.reconnect_to(endpoints);
            }
        } else if self.subscriptions.contains(&package.correlation_id) {
            if let Some(endpoints) = self.subscriptions.handle_package(&package, &channel) {
                self.reconnect_to(endpoints);
            }
        } else {
            debug!(
                correlation_id = %package.correlation_id,
                command = ?package.command,
                "Package with no matching operation or subscription dropped."
            );
        }
    }
}
