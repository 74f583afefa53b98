// src/core/discovery/cluster.rs

//! Endpoint resolution via cluster gossip: DNS-resolved seeds are queried
//! over HTTP for the member list, and the best alive node is selected.

use crate::config::ClusterSettings;
use crate::core::OpaliteError;
use crate::core::discovery::{EndpointDiscoverer, NodeEndpoints};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::{debug, info, warn};

/// The pause between two rounds of seed queries.
const DISCOVER_ATTEMPT_INTERVAL: Duration = Duration::from_millis(500);

/// The role of a cluster member, as advertised through gossip.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    #[serde(alias = "Leader")]
    Master,
    #[serde(alias = "Follower")]
    Slave,
    Clone,
    CatchingUp,
    PreReplica,
    #[serde(other)]
    Unknown,
}

impl MemberState {
    /// Lower ranks are preferred when picking a node to connect to.
    fn rank(self) -> u8 {
        match self {
            MemberState::Master => 0,
            MemberState::Slave => 1,
            MemberState::Clone => 2,
            MemberState::CatchingUp => 3,
            MemberState::PreReplica => 4,
            MemberState::Unknown => 5,
        }
    }
}

/// One member entry of the gossip document served by a seed node.
#[derive(Deserialize, Debug, Clone)]
pub struct MemberInfo {
    pub state: MemberState,
    pub is_alive: bool,
    pub external_tcp_ip: String,
    pub external_tcp_port: u16,
    #[serde(default)]
    pub external_secure_tcp_ip: Option<String>,
    #[serde(default)]
    pub external_secure_tcp_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GossipDocument {
    pub members: Vec<MemberInfo>,
}

/// Discovers nodes by resolving the cluster DNS name to gossip seeds and
/// asking each seed for the member list.
pub struct ClusterDiscoverer {
    settings: ClusterSettings,
}

impl ClusterDiscoverer {
    pub fn new(settings: ClusterSettings) -> Self {
        Self { settings }
    }

    fn http_client(&self) -> Result<reqwest::Client, OpaliteError> {
        let client = reqwest::Client::builder()
            .timeout(self.settings.gossip_timeout())
            .build()?;
        Ok(client)
    }

    async fn resolve_seeds(&self) -> Result<Vec<SocketAddr>, OpaliteError> {
        let addrs = lookup_host((self.settings.cluster_dns.as_str(), self.settings.gossip_port))
            .await?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(OpaliteError::EndpointDiscovery(format!(
                "cluster DNS '{}' resolved to no addresses",
                self.settings.cluster_dns
            )));
        }
        Ok(addrs)
    }

    async fn query_seed(
        &self,
        http: &reqwest::Client,
        seed: SocketAddr,
    ) -> Result<GossipDocument, OpaliteError> {
        let url = format!("http://{seed}/gossip");
        let document = http.get(&url).send().await?.json().await?;
        Ok(document)
    }

    /// Picks the best member out of a gossip document: alive nodes only,
    /// masters first, the endpoint that just failed last.
    fn select_member(
        document: &GossipDocument,
        failed_endpoint: Option<SocketAddr>,
    ) -> Option<NodeEndpoints> {
        let mut candidates: Vec<&MemberInfo> =
            document.members.iter().filter(|m| m.is_alive).collect();
        candidates.sort_by_key(|member| {
            let failed = failed_endpoint.is_some_and(|failed| {
                member.external_tcp_port == failed.port()
                    && member.external_tcp_ip == failed.ip().to_string()
            });
            (failed, member.state.rank())
        });

        let member = candidates.first()?;
        let tcp = format!("{}:{}", member.external_tcp_ip, member.external_tcp_port)
            .parse()
            .ok();
        let secure_tcp = match (&member.external_secure_tcp_ip, member.external_secure_tcp_port) {
            (Some(ip), Some(port)) => format!("{ip}:{port}").parse().ok(),
            _ => None,
        };
        tcp.is_some().then_some(NodeEndpoints::new(tcp, secure_tcp))
    }
}

#[async_trait]
impl EndpointDiscoverer for ClusterDiscoverer {
    async fn discover(
        &self,
        failed_endpoint: Option<SocketAddr>,
    ) -> Result<NodeEndpoints, OpaliteError> {
        let http = self.http_client()?;
        for attempt in 1..=self.settings.max_discover_attempts {
            debug!(
                attempt,
                max = self.settings.max_discover_attempts,
                "Discovering cluster endpoints..."
            );

            match self.resolve_seeds().await {
                Ok(mut seeds) => {
                    // Shuffle so that discovery load spreads over the seeds.
                    seeds.shuffle(&mut rand::thread_rng());

                    for seed in seeds {
                        match self.query_seed(&http, seed).await {
                            Ok(document) => {
                                if let Some(endpoints) =
                                    Self::select_member(&document, failed_endpoint)
                                {
                                    info!(?endpoints, %seed, "Discovered cluster node via gossip.");
                                    return Ok(endpoints);
                                }
                                warn!(%seed, "Gossip document contained no usable member.");
                            }
                            Err(e) => warn!(%seed, "Gossip query failed: {e}"),
                        }
                    }
                }
                Err(e) => warn!("Seed resolution failed: {e}"),
            }

            tokio::time::sleep(DISCOVER_ATTEMPT_INTERVAL).await;
        }

        Err(OpaliteError::EndpointDiscovery(format!(
            "unable to discover a cluster node after {} attempts",
            self.settings.max_discover_attempts
        )))
    }
}
