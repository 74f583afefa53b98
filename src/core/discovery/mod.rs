// src/core/discovery/mod.rs

//! Resolution of candidate node endpoints, either from a static node list or
//! via cluster gossip.

mod cluster;
mod static_nodes;

pub use cluster::ClusterDiscoverer;
pub use static_nodes::StaticEndpointDiscoverer;

use crate::core::OpaliteError;
use async_trait::async_trait;
use std::net::SocketAddr;

/// The plaintext and (optionally) secure endpoints of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEndpoints {
    pub tcp: Option<SocketAddr>,
    pub secure_tcp: Option<SocketAddr>,
}

impl NodeEndpoints {
    pub fn new(tcp: Option<SocketAddr>, secure_tcp: Option<SocketAddr>) -> Self {
        Self { tcp, secure_tcp }
    }

    /// Picks the endpoint to connect to: the secure one when TLS is enabled
    /// and the node offers it, the plaintext one otherwise.
    pub fn endpoint_for(&self, ssl_enabled: bool) -> Option<SocketAddr> {
        if ssl_enabled && self.secure_tcp.is_some() {
            self.secure_tcp
        } else {
            self.tcp
        }
    }
}

/// Resolves the endpoints of a node the client should connect to.
///
/// A failed resolution is terminal for the current connection attempt; the
/// engine decides whether another attempt is scheduled.
#[async_trait]
pub trait EndpointDiscoverer: Send + Sync {
    async fn discover(
        &self,
        failed_endpoint: Option<SocketAddr>,
    ) -> Result<NodeEndpoints, OpaliteError>;
}
