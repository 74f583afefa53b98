// src/core/discovery/static_nodes.rs

//! Endpoint resolution from a preconfigured node list.

use crate::config::{StaticNode, StaticNodeSettings};
use crate::core::OpaliteError;
use crate::core::discovery::{EndpointDiscoverer, NodeEndpoints};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::lookup_host;
use tracing::{debug, warn};

/// Resolves endpoints from the configured node list, in order. The node that
/// just failed is tried last so that a multi-node list rotates on failure.
pub struct StaticEndpointDiscoverer {
    settings: StaticNodeSettings,
}

impl StaticEndpointDiscoverer {
    pub fn new(settings: StaticNodeSettings) -> Self {
        Self { settings }
    }

    async fn resolve(&self, node: &StaticNode) -> Result<NodeEndpoints, OpaliteError> {
        let mut addrs = lookup_host((node.host.as_str(), node.port)).await?;
        let tcp = addrs.next().ok_or_else(|| {
            OpaliteError::EndpointDiscovery(format!("no address found for {}", node.host))
        })?;
        let secure_tcp = node
            .secure_port
            .map(|port| SocketAddr::new(tcp.ip(), port));
        Ok(NodeEndpoints::new(Some(tcp), secure_tcp))
    }
}

#[async_trait]
impl EndpointDiscoverer for StaticEndpointDiscoverer {
    async fn discover(
        &self,
        failed_endpoint: Option<SocketAddr>,
    ) -> Result<NodeEndpoints, OpaliteError> {
        let mut candidates: Vec<&StaticNode> = self.settings.nodes.iter().collect();
        if let Some(failed) = failed_endpoint {
            // Deprioritize the node whose ports match the endpoint that just failed.
            candidates.sort_by_key(|node| {
                node.port == failed.port() || node.secure_port == Some(failed.port())
            });
        }

        let mut last_error = None;
        for node in candidates {
            match self.resolve(node).await {
                Ok(endpoints) => {
                    debug!(host = %node.host, "Resolved static node endpoints.");
                    return Ok(endpoints);
                }
                Err(e) => {
                    warn!(host = %node.host, "Failed to resolve static node: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OpaliteError::EndpointDiscovery("no static nodes configured".to_string())
        }))
    }
}
