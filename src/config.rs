// src/config.rs

//! Manages client configuration: connection knobs, node addressing and validation.

use crate::core::protocol::Credentials;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level client settings.
///
/// Every duration is expressed in milliseconds in the serialized form and
/// exposed as a [`Duration`] through an accessor, so the serde representation
/// stays flat and obvious.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    /// Deadline for a single attempt of a one-shot operation.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Minimum interval between two timeout sweeps over in-flight operations.
    #[serde(default = "default_operation_timeout_check_interval_ms")]
    pub operation_timeout_check_interval_ms: u64,
    /// Delay between reconnection attempts.
    #[serde(default = "default_reconnection_delay_ms")]
    pub reconnection_delay_ms: u64,
    /// Maximum number of reconnection attempts. A negative value means unbounded.
    #[serde(default = "default_max_reconnections")]
    pub max_reconnections: i32,
    /// Maximum number of retries for a single operation. A negative value means unbounded.
    #[serde(default = "default_max_operation_retries")]
    pub max_operation_retries: i32,
    /// Upper bound on operations admitted into the client at once. Callers
    /// submitting beyond this bound are back-pressured.
    #[serde(default = "default_max_operation_queue_size")]
    pub max_operation_queue_size: usize,
    /// Upper bound on operations in flight on the wire; the remainder waits.
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
    /// Read-inactivity interval after which a heartbeat request is sent.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Grace period for the heartbeat response before the channel is closed.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Requires every write to be served by the cluster master.
    #[serde(default = "default_require_master")]
    pub require_master: bool,
    #[serde(default)]
    pub tcp: TcpSettings,
    #[serde(default)]
    pub ssl: SslSettings,
    /// Credentials used for the connection-level authentication handshake.
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Node addressing: either a static node list or cluster discovery.
    #[serde(default)]
    pub node: NodeSettings,
}

fn default_operation_timeout_ms() -> u64 {
    7_000
}
fn default_operation_timeout_check_interval_ms() -> u64 {
    1_000
}
fn default_reconnection_delay_ms() -> u64 {
    500
}
fn default_max_reconnections() -> i32 {
    10
}
fn default_max_operation_retries() -> i32 {
    10
}
fn default_max_operation_queue_size() -> usize {
    5_000
}
fn default_max_concurrent_operations() -> usize {
    2_000
}
fn default_heartbeat_interval_ms() -> u64 {
    500
}
fn default_heartbeat_timeout_ms() -> u64 {
    1_500
}
fn default_require_master() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            operation_timeout_check_interval_ms: default_operation_timeout_check_interval_ms(),
            reconnection_delay_ms: default_reconnection_delay_ms(),
            max_reconnections: default_max_reconnections(),
            max_operation_retries: default_max_operation_retries(),
            max_operation_queue_size: default_max_operation_queue_size(),
            max_concurrent_operations: default_max_concurrent_operations(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            require_master: default_require_master(),
            tcp: TcpSettings::default(),
            ssl: SslSettings::default(),
            credentials: None,
            node: NodeSettings::default(),
        }
    }
}

impl Settings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn operation_timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_check_interval_ms)
    }

    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Validates settings consistency before the client starts.
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(anyhow!("operation_timeout_ms must be greater than zero"));
        }
        if self.max_operation_queue_size == 0 {
            return Err(anyhow!("max_operation_queue_size must be greater than zero"));
        }
        if self.max_concurrent_operations == 0 {
            return Err(anyhow!(
                "max_concurrent_operations must be greater than zero"
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_timeout_ms == 0 {
            return Err(anyhow!("heartbeat intervals must be greater than zero"));
        }
        match &self.node {
            NodeSettings::Static(static_nodes) => {
                if static_nodes.nodes.is_empty() {
                    return Err(anyhow!("at least one static node must be configured"));
                }
            }
            NodeSettings::Cluster(cluster) => {
                if cluster.cluster_dns.is_empty() {
                    return Err(anyhow!("cluster_dns must not be empty"));
                }
                if cluster.max_discover_attempts == 0 {
                    return Err(anyhow!("max_discover_attempts must be greater than zero"));
                }
            }
        }
        Ok(())
    }

    /// Convenience constructor for a client talking to a single node.
    pub fn single_node(host: impl Into<String>, port: u16) -> Self {
        Self {
            node: NodeSettings::Static(StaticNodeSettings {
                nodes: vec![StaticNode {
                    host: host.into(),
                    port,
                    secure_port: None,
                }],
            }),
            ..Self::default()
        }
    }
}

/// Transport-level socket options.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TcpSettings {
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    #[serde(default = "default_true")]
    pub no_delay: bool,
    /// Kernel send buffer size; `None` keeps the OS default.
    #[serde(default)]
    pub send_buffer_size: Option<u32>,
    /// Kernel receive buffer size; `None` keeps the OS default.
    #[serde(default)]
    pub receive_buffer_size: Option<u32>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound on the graceful flush when a channel shuts down.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_close_timeout_ms() -> u64 {
    500
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            keep_alive: true,
            no_delay: true,
            send_buffer_size: None,
            receive_buffer_size: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl TcpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// TLS options for secure channels.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SslSettings {
    #[serde(default)]
    pub enabled: bool,
    /// If false, the server certificate is accepted without verification.
    #[serde(default = "default_true")]
    pub validate_server_cert: bool,
    /// Overrides the name presented for SNI and certificate matching.
    #[serde(default)]
    pub expected_common_name: Option<String>,
}

impl Default for SslSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            validate_server_cert: true,
            expected_common_name: None,
        }
    }
}

/// Node addressing: a preconfigured node list, or DNS-seeded cluster gossip.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum NodeSettings {
    Static(StaticNodeSettings),
    Cluster(ClusterSettings),
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings::Static(StaticNodeSettings {
            nodes: vec![StaticNode {
                host: "127.0.0.1".to_string(),
                port: 1113,
                secure_port: None,
            }],
        })
    }
}

/// A fixed list of candidate nodes, tried in order.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StaticNodeSettings {
    pub nodes: Vec<StaticNode>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StaticNode {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure_port: Option<u16>,
}

/// Cluster discovery via DNS-resolved gossip seeds.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterSettings {
    /// DNS name resolving to the gossip seeds of the cluster.
    pub cluster_dns: String,
    #[serde(default = "default_gossip_port")]
    pub gossip_port: u16,
    #[serde(default = "default_gossip_timeout_ms")]
    pub gossip_timeout_ms: u64,
    #[serde(default = "default_max_discover_attempts")]
    pub max_discover_attempts: u32,
}

fn default_gossip_port() -> u16 {
    2113
}
fn default_gossip_timeout_ms() -> u64 {
    1_000
}
fn default_max_discover_attempts() -> u32 {
    10
}

impl ClusterSettings {
    pub fn gossip_timeout(&self) -> Duration {
        Duration::from_millis(self.gossip_timeout_ms)
    }
}
