// src/connection/channel.rs

//! A single established channel to a node: transport setup, the writer task
//! that serializes outbound packages, and the reader task with the heartbeat
//! monitor.

use crate::config::Settings;
use crate::connection::stream::{NodeStream, server_name, tls_connector};
use crate::connection::tasks::{Task, TaskSender};
use crate::core::OpaliteError;
use crate::core::protocol::{Package, PackageCodec, TcpCommand};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf, split};
use tokio::net::TcpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A cheap handle for writing packages to a live channel. Held by the
/// managers through [`ChannelHandle`] and by subscription handles directly.
#[derive(Debug, Clone)]
pub struct PackageSender {
    tx: mpsc::UnboundedSender<Package>,
}

impl PackageSender {
    pub fn send(&self, package: Package) -> Result<(), OpaliteError> {
        self.tx
            .send(package)
            .map_err(|_| OpaliteError::ConnectionClosed("channel is closed".to_string()))
    }
}

/// The engine-side handle of an established channel.
///
/// The channel itself lives in two spawned tasks (reader and writer); the
/// handle identifies it, writes to it and can ask it to shut down.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub id: Uuid,
    pub remote: SocketAddr,
    pub local: SocketAddr,
    out_tx: mpsc::UnboundedSender<Package>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ChannelHandle {
    pub fn send(&self, package: Package) -> Result<(), OpaliteError> {
        self.out_tx
            .send(package)
            .map_err(|_| OpaliteError::ConnectionClosed("channel is closed".to_string()))
    }

    pub fn package_sender(&self) -> PackageSender {
        PackageSender {
            tx: self.out_tx.clone(),
        }
    }

    /// Asks the reader and writer tasks to stop. The engine learns about the
    /// actual close through the reader's closed notification.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Establishes a channel to the given endpoint: TCP connect with socket
/// options, the optional TLS handshake, and the reader/writer tasks.
pub async fn establish(
    settings: Arc<Settings>,
    endpoint: SocketAddr,
    tasks: TaskSender,
) -> Result<ChannelHandle, OpaliteError> {
    let socket = match endpoint {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_keepalive(settings.tcp.keep_alive)?;
    if let Some(size) = settings.tcp.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    if let Some(size) = settings.tcp.receive_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }

    let tcp_stream = timeout(settings.tcp.connect_timeout(), socket.connect(endpoint))
        .await
        .map_err(|_| {
            OpaliteError::CannotEstablishConnection(format!("connect to {endpoint} timed out"))
        })??;
    tcp_stream.set_nodelay(settings.tcp.no_delay)?;
    let local = tcp_stream.local_addr()?;

    let stream = if settings.ssl.enabled {
        debug!(%endpoint, "Starting TLS handshake.");
        let connector = tls_connector(&settings.ssl)?;
        let name = server_name(&settings.ssl, endpoint)?;
        let tls_stream = connector.connect(name, tcp_stream).await.map_err(|e| {
            OpaliteError::CannotEstablishConnection(format!("TLS handshake failed: {e}"))
        })?;
        NodeStream::Tls(Box::new(tls_stream))
    } else {
        NodeStream::Tcp(tcp_stream)
    };

    let id = Uuid::new_v4();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, _) = broadcast::channel(1);
    let (read_half, write_half) = split(stream);

    tokio::spawn(write_loop(
        write_half,
        out_rx,
        shutdown_tx.subscribe(),
        settings.tcp.close_timeout(),
    ));
    tokio::spawn(read_loop(
        read_half,
        out_tx.clone(),
        tasks,
        id,
        settings.heartbeat_interval(),
        settings.heartbeat_timeout(),
        shutdown_tx.subscribe(),
    ));

    info!(channel_id = %id, remote = %endpoint, %local, "Connection established.");
    Ok(ChannelHandle {
        id,
        remote: endpoint,
        local,
        out_tx,
        shutdown_tx,
    })
}

/// Drains the outbound queue into the framed writer. On shutdown, flushes
/// gracefully for at most the configured close timeout.
async fn write_loop(
    write_half: WriteHalf<NodeStream>,
    mut out_rx: mpsc::UnboundedReceiver<Package>,
    mut shutdown_rx: broadcast::Receiver<()>,
    close_timeout: Duration,
) {
    let mut framed = FramedWrite::new(write_half, PackageCodec::default());

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            maybe_package = out_rx.recv() => match maybe_package {
                Some(package) => {
                    if let Err(e) = framed.send(package).await {
                        warn!("Failed to write package: {e}");
                        break;
                    }
                }
                None => break,
            }
        }
    }

    if timeout(close_timeout, framed.close()).await.is_err() {
        warn!("Unable to close connection gracefully within the close timeout.");
    }
}

/// Reads inbound packages, answers heartbeat requests, probes the server
/// after read inactivity, and forwards everything else to the control task.
async fn read_loop(
    read_half: ReadHalf<NodeStream>,
    out_tx: mpsc::UnboundedSender<Package>,
    tasks: TaskSender,
    channel_id: Uuid,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut framed = FramedRead::new(read_half, PackageCodec::default());
    let mut close_error = None;

    'main_loop: loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break 'main_loop,
            next = timeout(heartbeat_interval, framed.next()) => match next {
                Ok(Some(Ok(package))) => {
                    if !handle_inbound(package, &out_tx, &tasks, channel_id) {
                        break 'main_loop;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(channel_id = %channel_id, "Channel error: {e}");
                    close_error = Some(e);
                    break 'main_loop;
                }
                Ok(None) => {
                    debug!(channel_id = %channel_id, "Connection closed by peer.");
                    break 'main_loop;
                }
                Err(_) => {
                    // Reader idle: probe the server and give it the grace period.
                    let probe = Package::new(TcpCommand::HeartbeatRequest, Uuid::new_v4());
                    if out_tx.send(probe).is_err() {
                        break 'main_loop;
                    }
                    match timeout(heartbeat_timeout, framed.next()).await {
                        Ok(Some(Ok(package))) => {
                            // Any traffic proves the peer alive.
                            if !handle_inbound(package, &out_tx, &tasks, channel_id) {
                                break 'main_loop;
                            }
                        }
                        Ok(Some(Err(e))) => {
                            warn!(channel_id = %channel_id, "Channel error: {e}");
                            close_error = Some(e);
                            break 'main_loop;
                        }
                        Ok(None) => {
                            debug!(channel_id = %channel_id, "Connection closed by peer.");
                            break 'main_loop;
                        }
                        Err(_) => {
                            warn!(channel_id = %channel_id, "Heartbeat timed out; closing channel.");
                            close_error = Some(OpaliteError::OperationTimeout(
                                "heartbeat timed out".to_string(),
                            ));
                            break 'main_loop;
                        }
                    }
                }
            }
        }
    }

    let _ = tasks.send(Task::TcpConnectionClosed {
        channel_id,
        error: close_error,
    });
}

/// Handles one inbound package at the channel level. Returns false when the
/// loop should stop.
fn handle_inbound(
    package: Package,
    out_tx: &mpsc::UnboundedSender<Package>,
    tasks: &TaskSender,
    channel_id: Uuid,
) -> bool {
    match package.command {
        TcpCommand::HeartbeatRequest => out_tx
            .send(Package::heartbeat_response(package.correlation_id))
            .is_ok(),
        // A response to our own probe; receipt alone is the liveness signal.
        TcpCommand::HeartbeatResponse => true,
        _ => tasks
            .send(Task::PackageReceived {
                channel_id,
                package,
            })
            .is_ok(),
    }
}
