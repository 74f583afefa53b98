// tests/common/mod.rs

//! Shared helpers for the unit test suites: a loopback channel backed by a
//! real TCP socket, and a recording subscription listener.

#![allow(dead_code)]

use opalite::config::Settings;
use opalite::connection::channel::{self, ChannelHandle};
use opalite::connection::tasks::{TaskReceiver, task_queue};
use opalite::core::OpaliteError;
use opalite::core::protocol::{Package, PackageCodec, TcpCommand};
use opalite::core::subscriptions::{SubscriptionDropReason, SubscriptionListener};
use opalite::core::types::ResolvedEvent;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use uuid::Uuid;

/// The server side of a loopback channel.
pub type ServerSide = Framed<TcpStream, PackageCodec>;

/// Settings tuned so that the channel's own heartbeat never interferes with
/// a unit test.
pub fn quiet_settings(port: u16) -> Settings {
    let mut settings = Settings::single_node("127.0.0.1", port);
    settings.heartbeat_interval_ms = 60_000;
    settings.heartbeat_timeout_ms = 60_000;
    settings
}

/// Establishes a real channel against an in-test TCP listener. The returned
/// task receiver must stay alive for the duration of the test, otherwise the
/// channel shuts itself down.
pub async fn loopback_channel() -> (ChannelHandle, ServerSide, TaskReceiver) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let settings = Arc::new(quiet_settings(addr.port()));

    let (tasks_tx, tasks_rx) = task_queue();
    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    let handle = channel::establish(settings, addr, tasks_tx).await.unwrap();
    let server = accept.await.unwrap();

    (handle, Framed::new(server, PackageCodec::default()), tasks_rx)
}

/// Builds a response package carrying an encoded payload body.
pub fn response_package<T: Serialize>(
    command: TcpCommand,
    correlation_id: Uuid,
    body: &T,
) -> Package {
    let payload = opalite::core::protocol::messages::encode(body).unwrap();
    Package::with_payload(command, correlation_id, payload)
}

/// A listener that forwards everything it sees into channels the test can
/// await on.
pub struct RecordingListener {
    pub events: mpsc::UnboundedSender<ResolvedEvent>,
    pub drops: mpsc::UnboundedSender<(SubscriptionDropReason, Option<OpaliteError>)>,
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

/// Awaits the next value with a bounded patience, so a regression hangs the
/// test for seconds rather than forever.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out waiting for the expected outcome")
}
