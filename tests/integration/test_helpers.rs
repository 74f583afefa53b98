// tests/integration/test_helpers.rs

//! Test helpers: a mock event-stream node speaking the real wire protocol,
//! plus settings and listener utilities.

#![allow(dead_code)]

use opalite::config::Settings;
use opalite::core::OpaliteError;
use opalite::core::events::ClientEvent;
use opalite::core::protocol::messages::{
    self, EventRecord, MasterInfo, NewEvent, NotHandled, NotHandledReason, OperationResult,
    ReadEvent, ReadEventCompleted, ReadEventResult, ResolvedIndexedEvent, StreamEventAppeared,
    SubscribeToStream, SubscriptionConfirmation, SubscriptionDropCause, SubscriptionDropped,
    WriteEvents, WriteEventsCompleted,
};
use opalite::core::protocol::{Package, PackageCodec, TcpCommand};
use opalite::core::subscriptions::{SubscriptionDropReason, SubscriptionListener};
use opalite::core::types::ResolvedEvent;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use uuid::Uuid;

/// How a mock node reacts to traffic.
#[derive(Clone)]
pub struct MockBehavior {
    /// When false, every `Authenticate` is rejected.
    pub accept_credentials: bool,
    /// Kill the connection instead of answering the first N writes.
    pub swallow_first_writes: usize,
    /// Answer every write with a not-master redirect to this address.
    pub redirect_writes_to: Option<SocketAddr>,
    /// When false, heartbeat requests go unanswered.
    pub answer_heartbeats: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            accept_credentials: true,
            swallow_first_writes: 0,
            redirect_writes_to: None,
            answer_heartbeats: true,
        }
    }
}

#[derive(Default)]
struct NodeState {
    streams: HashMap<String, Vec<NewEvent>>,
    swallowed: usize,
}

/// An in-process node: accepts any number of connections, keeps an in-memory
/// event store, confirms subscriptions and pushes appended events to them.
pub struct MockNode {
    pub addr: SocketAddr,
    pub writes_seen: Arc<AtomicUsize>,
    pub subscribes_seen: Arc<AtomicUsize>,
    kill_tx: broadcast::Sender<()>,
}

impl MockNode {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(NodeState::default()));
        let writes_seen = Arc::new(AtomicUsize::new(0));
        let subscribes_seen = Arc::new(AtomicUsize::new(0));
        let (kill_tx, _) = broadcast::channel(4);

        let node = Self {
            addr,
            writes_seen: Arc::clone(&writes_seen),
            subscribes_seen: Arc::clone(&subscribes_seen),
            kill_tx: kill_tx.clone(),
        };

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(run_connection(
                    socket,
                    Arc::clone(&state),
                    behavior.clone(),
                    Arc::clone(&writes_seen),
                    Arc::clone(&subscribes_seen),
                    kill_tx.subscribe(),
                ));
            }
        });

        node
    }

    /// Abruptly drops every open connection. The accept loop keeps running,
    /// so the client can reconnect.
    pub fn kill_connections(&self) {
        let _ = self.kill_tx.send(());
    }
}

enum Action {
    Respond(Vec<Package>),
    Ignore,
    Kill,
}

async fn run_connection(
    socket: TcpStream,
    state: Arc<Mutex<NodeState>>,
    behavior: MockBehavior,
    writes_seen: Arc<AtomicUsize>,
    subscribes_seen: Arc<AtomicUsize>,
    mut kill_rx: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(socket, PackageCodec::default());
    // Subscriptions are bound to this connection and die with it.
    let mut subscriptions: Vec<(Uuid, String)> = Vec::new();

    loop {
        tokio::select! {
            _ = kill_rx.recv() => break,
            maybe_package = framed.next() => {
                let Some(Ok(package)) = maybe_package else {
                    break;
                };
                let action = handle_package(
                    package,
                    &state,
                    &behavior,
                    &writes_seen,
                    &subscribes_seen,
                    &mut subscriptions,
                );
                match action {
                    Action::Respond(responses) => {
                        for response in responses {
                            if framed.send(response).await.is_err() {
                                return;
                            }
                        }
                    }
                    Action::Ignore => {}
                    Action::Kill => break,
                }
            }
        }
    }
}

fn handle_package(
    package: Package,
    state: &Arc<Mutex<NodeState>>,
    behavior: &MockBehavior,
    writes_seen: &AtomicUsize,
    subscribes_seen: &AtomicUsize,
    subscriptions: &mut Vec<(Uuid, String)>,
) -> Action {
    let correlation_id = package.correlation_id;
    match package.command {
        TcpCommand::HeartbeatRequest => {
            if behavior.answer_heartbeats {
                Action::Respond(vec![Package::heartbeat_response(correlation_id)])
            } else {
                Action::Ignore
            }
        }
        TcpCommand::HeartbeatResponse => Action::Ignore,
        TcpCommand::Authenticate => {
            if behavior.accept_credentials {
                Action::Respond(vec![Package::new(TcpCommand::Authenticated, correlation_id)])
            } else {
                Action::Respond(vec![Package::with_payload(
                    TcpCommand::NotAuthenticated,
                    correlation_id,
                    bytes::Bytes::from_static(b"invalid credentials"),
                )])
            }
        }
        TcpCommand::WriteEvents => {
            writes_seen.fetch_add(1, Ordering::SeqCst);
            let request: WriteEvents = messages::decode(&package.payload).unwrap();

            {
                let mut guard = state.lock().unwrap();
                if guard.swallowed < behavior.swallow_first_writes {
                    guard.swallowed += 1;
                    return Action::Kill;
                }
            }

            if let Some(master) = behavior.redirect_writes_to {
                return Action::Respond(vec![encoded(
                    TcpCommand::NotHandled,
                    correlation_id,
                    &NotHandled {
                        reason: NotHandledReason::NotMaster,
                        master_info: Some(MasterInfo {
                            external_tcp_address: master.ip().to_string(),
                            external_tcp_port: master.port(),
                            external_secure_tcp_address: None,
                            external_secure_tcp_port: None,
                        }),
                    },
                )]);
            }

            let (first, last, pushed) = {
                let mut guard = state.lock().unwrap();
                let stream = guard.streams.entry(request.event_stream_id.clone()).or_default();
                let first = stream.len() as i64;
                stream.extend(request.events.iter().cloned());
                let last = stream.len() as i64 - 1;

                // Push the freshly appended events to matching subscriptions.
                let mut pushed = Vec::new();
                for (subscription_id, subscribed_stream) in subscriptions.iter() {
                    if subscribed_stream.is_empty() || *subscribed_stream == request.event_stream_id
                    {
                        for (offset, event) in request.events.iter().enumerate() {
                            pushed.push(encoded(
                                TcpCommand::StreamEventAppeared,
                                *subscription_id,
                                &StreamEventAppeared {
                                    event: resolved(
                                        &request.event_stream_id,
                                        first + offset as i64,
                                        event,
                                    ),
                                },
                            ));
                        }
                    }
                }
                (first, last, pushed)
            };

            let mut responses = vec![encoded(
                TcpCommand::WriteEventsCompleted,
                correlation_id,
                &WriteEventsCompleted {
                    result: OperationResult::Success,
                    message: String::new(),
                    first_event_number: first,
                    last_event_number: last,
                    prepare_position: last,
                    commit_position: last,
                },
            )];
            responses.extend(pushed);
            Action::Respond(responses)
        }
        TcpCommand::ReadEvent => {
            let request: ReadEvent = messages::decode(&package.payload).unwrap();
            let guard = state.lock().unwrap();
            let completed = match guard.streams.get(&request.event_stream_id) {
                None => ReadEventCompleted {
                    result: ReadEventResult::NoStream,
                    event: None,
                    error: String::new(),
                },
                Some(events) => {
                    let index = if request.event_number == -1 {
                        events.len().checked_sub(1)
                    } else {
                        Some(request.event_number as usize)
                    };
                    match index.and_then(|i| events.get(i).map(|e| (i, e))) {
                        Some((event_number, event)) => ReadEventCompleted {
                            result: ReadEventResult::Success,
                            event: Some(resolved(
                                &request.event_stream_id,
                                event_number as i64,
                                event,
                            )),
                            error: String::new(),
                        },
                        None => ReadEventCompleted {
                            result: ReadEventResult::NotFound,
                            event: None,
                            error: String::new(),
                        },
                    }
                }
            };
            Action::Respond(vec![encoded(
                TcpCommand::ReadEventCompleted,
                correlation_id,
                &completed,
            )])
        }
        TcpCommand::SubscribeToStream => {
            subscribes_seen.fetch_add(1, Ordering::SeqCst);
            let request: SubscribeToStream = messages::decode(&package.payload).unwrap();
            subscriptions.push((correlation_id, request.event_stream_id));
            Action::Respond(vec![encoded(
                TcpCommand::SubscriptionConfirmation,
                correlation_id,
                &SubscriptionConfirmation {
                    last_commit_position: 0,
                    last_event_number: -1,
                },
            )])
        }
        TcpCommand::UnsubscribeFromStream => {
            subscriptions.retain(|(id, _)| *id != correlation_id);
            Action::Respond(vec![encoded(
                TcpCommand::SubscriptionDropped,
                correlation_id,
                &SubscriptionDropped {
                    reason: SubscriptionDropCause::Unsubscribed,
                },
            )])
        }
        _ => Action::Ignore,
    }
}

fn encoded<T: Serialize>(command: TcpCommand, correlation_id: Uuid, body: &T) -> Package {
    Package::with_payload(command, correlation_id, messages::encode(body).unwrap())
}

fn resolved(stream: &str, event_number: i64, event: &NewEvent) -> ResolvedIndexedEvent {
    ResolvedIndexedEvent {
        event: Some(EventRecord {
            event_stream_id: stream.to_string(),
            event_number,
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            is_json: event.is_json,
            data: event.data.clone(),
            metadata: event.metadata.clone(),
        }),
        link: None,
        commit_position: event_number,
        prepare_position: event_number,
    }
}

/// Client settings tuned for fast test turnaround: short timeouts, quick
/// reconnection, heartbeats out of the way unless a test opts in.
pub fn fast_settings(port: u16) -> Settings {
    let mut settings = Settings::single_node("127.0.0.1", port);
    settings.operation_timeout_ms = 500;
    settings.operation_timeout_check_interval_ms = 100;
    settings.reconnection_delay_ms = 100;
    settings.heartbeat_interval_ms = 10_000;
    settings.heartbeat_timeout_ms = 10_000;
    settings
}

/// Returns a port that had no listener at the time of the call.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Awaits the first lifecycle event matching the predicate.
pub async fn await_event(
    events: &mut broadcast::Receiver<ClientEvent>,
    matches: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event bus closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for a lifecycle event")
}

/// A listener that forwards everything it sees into channels the test can
/// await on.
pub struct RecordingListener {
    events: mpsc::UnboundedSender<ResolvedEvent>,
    drops: mpsc::UnboundedSender<(SubscriptionDropReason, Option<OpaliteError>)>,
}

impl RecordingListener {
    pub fn new() -> (
        Box<dyn SubscriptionListener>,
        mpsc::UnboundedReceiver<ResolvedEvent>,
        mpsc::UnboundedReceiver<(SubscriptionDropReason, Option<OpaliteError>)>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (drops_tx, drops_rx) = mpsc::unbounded_channel();
        (
            Box::new(RecordingListener {
                events: events_tx,
                drops: drops_tx,
            }),
            events_rx,
            drops_rx,
        )
    }
}

impl SubscriptionListener for RecordingListener {
    fn on_event_appeared(&mut self, event: ResolvedEvent) {
        let _ = self.events.send(event);
    }

    fn on_dropped(&mut self, reason: SubscriptionDropReason, error: Option<OpaliteError>) {
        let _ = self.drops.send((reason, error));
    }
}
