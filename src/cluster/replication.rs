use crate::cluster::metrics::SyncMetricsCollector;
use crate::cluster::registry::EndpointRegistry;
use crate::cluster::store::StateStore;
use crate::cluster::transport::NodeTransport;
use crate::cluster::types::{LogEntry, NodeId};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Replication state of one reference entry on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationCell {
    /// The node's fetched log has no entry at this index
    Absent,
    /// Present, but the node's commit index is below it
    Uncommitted,
    /// Present and at or below the node's commit index
    Committed,
}

impl ReplicationCell {
    pub fn is_present(&self) -> bool {
        !matches!(self, ReplicationCell::Absent)
    }
}

/// One reference log entry with its per-node replication state
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationRow {
    pub entry: LogEntry,
    pub cells: BTreeMap<NodeId, ReplicationCell>,
}

impl ReplicationRow {
    pub fn replicated_count(&self) -> usize {
        self.cells.values().filter(|cell| cell.is_present()).count()
    }

    pub fn committed_count(&self) -> usize {
        self.cells
            .values()
            .filter(|cell| **cell == ReplicationCell::Committed)
            .count()
    }
}

/// Entry × node matrix derived from the latest log fetch, for display only
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplicationView {
    /// Node whose log was picked as the reference
    pub reference_node: Option<NodeId>,
    pub rows: Vec<ReplicationRow>,
}

impl ReplicationView {
    pub fn reference_len(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: u64) -> Option<&ReplicationRow> {
        self.rows.iter().find(|row| row.entry.index == index)
    }

    pub fn cell(&self, index: u64, node: NodeId) -> Option<ReplicationCell> {
        self.row(index).and_then(|row| row.cells.get(&node).copied())
    }
}

/// Build the replication matrix from one round of fetched logs
///
/// The reference is the longest log. On a tie the previous reference node is
/// kept if it is still at the maximum length, otherwise the lowest node id at
/// that length wins. Nodes missing from `commit_indexes` count as having
/// committed nothing.
pub fn compose(
    previous_reference: Option<NodeId>,
    logs: &BTreeMap<NodeId, Vec<LogEntry>>,
    commit_indexes: &BTreeMap<NodeId, i64>,
) -> ReplicationView {
    let Some(max_len) = logs.values().map(Vec::len).max() else {
        return ReplicationView::default();
    };

    let reference_node = previous_reference
        .filter(|node| logs.get(node).map(Vec::len) == Some(max_len))
        .or_else(|| {
            logs.iter()
                .find(|(_, log)| log.len() == max_len)
                .map(|(node, _)| *node)
        });

    let Some(reference_node) = reference_node else {
        return ReplicationView::default();
    };

    let present: BTreeMap<NodeId, HashSet<u64>> = logs
        .iter()
        .map(|(node, log)| (*node, log.iter().map(|entry| entry.index).collect()))
        .collect();

    let rows = logs[&reference_node]
        .iter()
        .map(|entry| {
            let cells = present
                .iter()
                .map(|(node, indexes)| {
                    let cell = if !indexes.contains(&entry.index) {
                        ReplicationCell::Absent
                    } else if is_committed(commit_indexes.get(node).copied(), entry.index) {
                        ReplicationCell::Committed
                    } else {
                        ReplicationCell::Uncommitted
                    };
                    (*node, cell)
                })
                .collect();
            ReplicationRow {
                entry: entry.clone(),
                cells,
            }
        })
        .collect();

    ReplicationView {
        reference_node: Some(reference_node),
        rows,
    }
}

fn is_committed(commit_index: Option<i64>, index: u64) -> bool {
    match commit_index {
        Some(commit) if commit >= 0 => commit as u64 >= index,
        _ => false,
    }
}

/// Periodically fetches every node's log and publishes the replication matrix
pub struct ReplicationComposer {
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn NodeTransport>,
    store: Arc<StateStore>,
    metrics: Arc<SyncMetricsCollector>,
}

impl ReplicationComposer {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn NodeTransport>,
        store: Arc<StateStore>,
        metrics: Arc<SyncMetricsCollector>,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
            metrics,
        }
    }

    /// Fetch all logs concurrently and replace the published view
    ///
    /// A node whose fetch fails contributes an empty log for this cycle.
    pub async fn refresh_logs(&self) -> ReplicationView {
        let started = Instant::now();
        let mut fetches = JoinSet::new();
        for node in self.registry.node_ids() {
            let transport = self.transport.clone();
            fetches.spawn(async move { (node, transport.fetch_log(node).await) });
        }

        let mut logs = BTreeMap::new();
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((node, Ok(log))) => {
                    debug!("Fetched {} log entries from node {}", log.len(), node);
                    self.metrics.record_log_fetch(true);
                    logs.insert(node, log);
                }
                Ok((node, Err(e))) => {
                    debug!("Log fetch from node {} failed: {}", node, e);
                    self.metrics.record_log_fetch(false);
                    logs.insert(node, Vec::new());
                }
                Err(e) => warn!("Log fetch task failed: {}", e),
            }
        }
        // Joined tasks that panicked still count as empty logs.
        for node in self.registry.node_ids() {
            logs.entry(node).or_default();
        }

        let (previous, commit_indexes) = self
            .store
            .read(|state| (state.replication().reference_node, state.commit_indexes()));
        let view = compose(previous, &logs, &commit_indexes);

        debug!(
            "Replication view rebuilt in {}ms: reference node {:?}, {} entries",
            started.elapsed().as_millis(),
            view.reference_node,
            view.reference_len()
        );

        let published = view.clone();
        self.store.update(|state| state.set_replication(published));
        view
    }
}

#[cfg(test)]
#[path = "replication_tests.rs"]
mod replication_tests;
