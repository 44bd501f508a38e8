use crate::cluster::history::EventHistory;
use crate::cluster::replication::ReplicationView;
use crate::cluster::types::*;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tracing::{info, warn};

/// Aggregate view of the cluster as reconciled by this client
///
/// Plain data with update methods: every write replaces a whole entity, so
/// concurrent writers resolve to last-write-wins per key. Every mutator
/// reports whether it changed anything.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterState {
    nodes: BTreeMap<NodeId, NodeStatus>,
    leader_id: Option<NodeId>,
    current_term: u64,
    events: EventHistory,
    replication: ReplicationView,
    tasks: Vec<Task>,
    stream_connected: bool,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new(EventHistory::default())
    }
}

impl ClusterState {
    pub fn new(events: EventHistory) -> Self {
        Self {
            nodes: BTreeMap::new(),
            leader_id: None,
            current_term: 0,
            events,
            replication: ReplicationView::default(),
            tasks: Vec::new(),
            stream_connected: false,
        }
    }

    /// Overwrite the status of one node with a fresh observation
    ///
    /// A node claiming leadership becomes the believed leader regardless of
    /// what was believed before; the term only ever moves forward. Returns
    /// whether anything changed.
    pub fn apply_status(&mut self, mut status: NodeStatus) -> bool {
        if !status.is_consistent() {
            warn!(
                "Node {} claims leadership but reports leader_id {:?}; normalising",
                status.node_id, status.leader_id
            );
            status.leader_id = Some(status.node_id);
        }

        let mut changed = false;

        if status.is_leader && self.leader_id != Some(status.node_id) {
            info!(
                "Believed leader changed: {:?} -> {} (term {})",
                self.leader_id, status.node_id, status.term
            );
            self.leader_id = Some(status.node_id);
            changed = true;
        }

        if status.term > self.current_term {
            info!("Cluster term advanced: {} -> {}", self.current_term, status.term);
            self.current_term = status.term;
            changed = true;
        }

        if self.nodes.get(&status.node_id) != Some(&status) {
            self.nodes.insert(status.node_id, status);
            changed = true;
        }

        changed
    }

    /// Record that `node_id` did not answer; leader and term are untouched
    pub fn apply_unreachable(&mut self, node_id: NodeId) -> bool {
        let stopped = NodeStatus::unreachable(node_id);
        if self.nodes.get(&node_id) == Some(&stopped) {
            return false;
        }
        self.nodes.insert(node_id, stopped);
        true
    }

    /// Append to the event history; always a change
    pub fn push_event(&mut self, event: RaftEvent) -> bool {
        self.events.append(event);
        true
    }

    pub fn replace_events(&mut self, events: Vec<RaftEvent>) -> bool {
        self.events.replace_all(events)
    }

    pub fn set_replication(&mut self, view: ReplicationView) -> bool {
        if self.replication == view {
            return false;
        }
        self.replication = view;
        true
    }

    pub fn replace_tasks(&mut self, tasks: Vec<Task>) -> bool {
        if self.tasks == tasks {
            return false;
        }
        self.tasks = tasks;
        true
    }

    /// Insert or replace a task by id
    pub fn upsert_task(&mut self, task: Task) -> bool {
        match self.tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(existing) if *existing == task => false,
            Some(existing) => {
                *existing = task;
                true
            }
            None => {
                self.tasks.push(task);
                true
            }
        }
    }

    pub fn remove_task(&mut self, task_id: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != task_id);
        self.tasks.len() != before
    }

    pub fn set_stream_connected(&mut self, connected: bool) -> bool {
        let changed = self.stream_connected != connected;
        self.stream_connected = connected;
        changed
    }

    pub fn nodes(&self) -> &BTreeMap<NodeId, NodeStatus> {
        &self.nodes
    }

    pub fn node(&self, node_id: NodeId) -> Option<&NodeStatus> {
        self.nodes.get(&node_id)
    }

    /// Reported state of a node, `None` while it has never been observed
    pub fn observed_state(&self, node_id: NodeId) -> Option<NodeState> {
        self.nodes.get(&node_id).map(|status| status.state)
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    /// Node to read from when the write path currently targets `tracked`
    ///
    /// The write target only moves on redirects. While it points at a node
    /// observed as stopped and the status polls have found a live leader,
    /// reads go to that leader instead.
    pub fn read_target(&self, tracked: NodeId) -> NodeId {
        match self.leader_id {
            Some(leader)
                if leader != tracked
                    && self.observed_state(tracked) == Some(NodeState::Stopped)
                    && matches!(self.observed_state(leader), Some(state) if state != NodeState::Stopped) =>
            {
                leader
            }
            _ => tracked,
        }
    }

    /// Nodes whose latest status claims leadership
    ///
    /// More than one entry means the reports disagree; the believed leader is
    /// still whichever claim arrived last.
    pub fn leader_claims(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|status| status.is_leader)
            .map(|status| status.node_id)
            .collect()
    }

    /// Statuses whose `leader_id` names a node not currently claiming leadership
    pub fn dangling_leader_refs(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .values()
            .filter_map(|status| {
                let target = status.leader_id?;
                let target_leads = self
                    .nodes
                    .get(&target)
                    .map(|t| t.is_leader)
                    .unwrap_or(false);
                (!target_leads).then_some((status.node_id, target))
            })
            .collect()
    }

    pub fn events(&self) -> &EventHistory {
        &self.events
    }

    pub fn replication(&self) -> &ReplicationView {
        &self.replication
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn stream_connected(&self) -> bool {
        self.stream_connected
    }

    /// Last known commit index per node
    pub fn commit_indexes(&self) -> BTreeMap<NodeId, i64> {
        self.nodes
            .iter()
            .map(|(id, status)| (*id, status.commit_index))
            .collect()
    }
}

/// Shared, observable container for [`ClusterState`]
///
/// Readers take snapshots or subscribe for change notifications; writers go
/// through [`StateStore::update`]. Subscribers are only woken when the
/// update closure reports a change.
#[derive(Debug)]
pub struct StateStore {
    tx: watch::Sender<ClusterState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(ClusterState::default())
    }
}

impl StateStore {
    pub fn new(initial: ClusterState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn snapshot(&self) -> ClusterState {
        self.tx.borrow().clone()
    }

    /// Apply `f` to the state; subscribers are notified when it returns true
    ///
    /// `f` must return whether it changed the state, as the
    /// [`ClusterState`] mutators do.
    pub fn update(&self, f: impl FnOnce(&mut ClusterState) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    pub fn subscribe(&self) -> watch::Receiver<ClusterState> {
        self.tx.subscribe()
    }

    /// Read a value out of the current state without cloning all of it
    pub fn read<R>(&self, f: impl FnOnce(&ClusterState) -> R) -> R {
        f(&self.tx.borrow())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
