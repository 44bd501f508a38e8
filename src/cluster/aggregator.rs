use crate::cluster::leader::LeaderTracker;
use crate::cluster::metrics::SyncMetricsCollector;
use crate::cluster::registry::EndpointRegistry;
use crate::cluster::store::StateStore;
use crate::cluster::transport::NodeTransport;
use crate::cluster::types::{ClusterInfo, NodeId};
use crate::error::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of one status refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub reachable: Vec<NodeId>,
    pub unreachable: Vec<NodeId>,
}

/// Polls every node's status and folds the answers into the store
///
/// Each node is queried independently; results are applied as they arrive,
/// so one slow or dead node never holds back the others.
pub struct ClusterAggregator {
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn NodeTransport>,
    store: Arc<StateStore>,
    leader: Arc<LeaderTracker>,
    metrics: Arc<SyncMetricsCollector>,
}

impl ClusterAggregator {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn NodeTransport>,
        store: Arc<StateStore>,
        leader: Arc<LeaderTracker>,
        metrics: Arc<SyncMetricsCollector>,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
            leader,
            metrics,
        }
    }

    /// Query every node's status once
    ///
    /// A node that fails to answer within the transport timeout is recorded
    /// as `stopped` for this cycle; its previous status is discarded.
    pub async fn refresh_all(&self) -> RefreshReport {
        let mut polls = JoinSet::new();
        for node in self.registry.node_ids() {
            let transport = self.transport.clone();
            polls.spawn(async move {
                let started = Instant::now();
                let result = transport.fetch_status(node).await;
                (node, started.elapsed(), result)
            });
        }

        let mut report = RefreshReport::default();
        while let Some(joined) = polls.join_next().await {
            let (node, latency, result) = match joined {
                Ok(polled) => polled,
                Err(e) => {
                    warn!("Status poll task failed: {}", e);
                    continue;
                }
            };

            match result {
                Ok(mut status) => {
                    self.metrics.record_status_poll(node, latency, true);
                    if status.node_id != node {
                        warn!(
                            "Node {} answered with status for node {}; keying by the polled id",
                            node, status.node_id
                        );
                        status.node_id = node;
                    }
                    self.store.update(|state| state.apply_status(status));
                    report.reachable.push(node);
                }
                Err(e) => {
                    self.metrics.record_status_poll(node, latency, false);
                    debug!("Status poll of node {} failed: {}", node, e);
                    if self.store.update(|state| state.apply_unreachable(node)) {
                        warn!("Node {} is unreachable, marking stopped", node);
                    }
                    report.unreachable.push(node);
                }
            }
        }

        report.reachable.sort_unstable();
        report.unreachable.sort_unstable();
        self.log_desync();
        report
    }

    /// Replace the event history with the primary node's recent events
    ///
    /// The primary is the tracked write target, or the observed leader while
    /// that target is known to be stopped. On failure the current history is
    /// kept.
    pub async fn refresh_events(&self) -> Result<usize> {
        let tracked = self.leader.current_leader().await;
        let primary = self.store.read(|state| state.read_target(tracked));
        let events = self.transport.fetch_events(primary).await?;
        let count = events.len();
        self.store.update(|state| state.replace_events(events));
        debug!("Replaced event history with {} events from node {}", count, primary);
        Ok(count)
    }

    /// `GET /api/raft/cluster` on one node, for diagnostics
    pub async fn cluster_info(&self, node: NodeId) -> Result<ClusterInfo> {
        self.registry.resolve(node)?;
        self.transport.fetch_cluster(node).await
    }

    /// Warn about conflicting leadership reports; the view is left as is
    fn log_desync(&self) {
        let (claims, dangling, believed) = self.store.read(|state| {
            (
                state.leader_claims(),
                state.dangling_leader_refs(),
                state.leader_id(),
            )
        });

        if claims.len() > 1 {
            warn!(
                "Multiple nodes claim leadership {:?}; believing node {:?} until the cluster converges",
                claims, believed
            );
        }
        for (node, target) in dangling {
            warn!("Node {} reports leader {} which does not claim leadership", node, target);
        }
    }
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod aggregator_tests;
