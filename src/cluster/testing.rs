//! In-memory cluster and push channel doubles shared by the unit tests

use crate::cluster::channel::{PushChannel, PushConnector};
use crate::cluster::leader::LeaderTracker;
use crate::cluster::metrics::SyncMetricsCollector;
use crate::cluster::registry::{EndpointRegistry, NodeEndpoint};
use crate::cluster::store::StateStore;
use crate::cluster::transport::NodeTransport;
use crate::cluster::types::*;
use crate::error::{ObserverError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// How a fake node answers task writes
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WriteReply {
    Accept,
    Redirect(Option<NodeId>),
    Reject(u16),
    Unreachable,
}

/// A scripted cluster behind the [`NodeTransport`] seam
#[derive(Default)]
pub(crate) struct FakeCluster {
    statuses: Mutex<HashMap<NodeId, Option<NodeStatus>>>,
    logs: Mutex<HashMap<NodeId, Option<Vec<LogEntry>>>>,
    events: Mutex<HashMap<NodeId, Vec<RaftEvent>>>,
    tasks: Mutex<Vec<Task>>,
    write_replies: Mutex<HashMap<NodeId, WriteReply>>,
    calls: Mutex<Vec<(NodeId, &'static str)>>,
    next_task: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, status: NodeStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(status.node_id, Some(status));
    }

    pub fn set_down(&self, node: NodeId) {
        self.statuses.lock().unwrap().insert(node, None);
        self.logs.lock().unwrap().insert(node, None);
    }

    pub fn set_log(&self, node: NodeId, log: Vec<LogEntry>) {
        self.logs.lock().unwrap().insert(node, Some(log));
    }

    pub fn set_events(&self, node: NodeId, events: Vec<RaftEvent>) {
        self.events.lock().unwrap().insert(node, events);
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.lock().unwrap() = tasks;
    }

    pub fn set_write_reply(&self, node: NodeId, reply: WriteReply) {
        self.write_replies.lock().unwrap().insert(node, reply);
    }

    /// Every call made so far, as `(node, operation)`
    pub fn calls(&self) -> Vec<(NodeId, &'static str)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls of one operation, in order
    pub fn calls_of(&self, op: &str) -> Vec<NodeId> {
        self.calls()
            .into_iter()
            .filter(|(_, name)| *name == op)
            .map(|(node, _)| node)
            .collect()
    }

    fn record(&self, node: NodeId, op: &'static str) {
        self.calls.lock().unwrap().push((node, op));
    }

    fn check_write(&self, node: NodeId) -> Result<()> {
        let reply = self
            .write_replies
            .lock()
            .unwrap()
            .get(&node)
            .cloned()
            .unwrap_or(WriteReply::Accept);
        match reply {
            WriteReply::Accept => Ok(()),
            WriteReply::Redirect(leader_id) => Err(ObserverError::NotLeader { node, leader_id }),
            WriteReply::Reject(status) if status >= 500 => Err(ObserverError::Server {
                status,
                message: "Failed to create task".to_string(),
            }),
            WriteReply::Reject(status) => Err(ObserverError::Validation {
                status,
                message: "Title is required".to_string(),
            }),
            WriteReply::Unreachable => Err(ObserverError::unreachable(node, "connection refused")),
        }
    }
}

#[async_trait]
impl NodeTransport for FakeCluster {
    async fn fetch_status(&self, node: NodeId) -> Result<NodeStatus> {
        self.record(node, "status");
        self.statuses
            .lock()
            .unwrap()
            .get(&node)
            .cloned()
            .flatten()
            .ok_or_else(|| ObserverError::unreachable(node, "connection refused"))
    }

    async fn fetch_cluster(&self, node: NodeId) -> Result<ClusterInfo> {
        self.record(node, "cluster");
        let this_node = self.fetch_status(node).await?;
        Ok(ClusterInfo {
            leader_id: this_node.leader_id,
            term: this_node.term,
            cluster_nodes: vec!["127.0.0.1:9001".to_string()],
            this_node,
        })
    }

    async fn fetch_events(&self, node: NodeId) -> Result<Vec<RaftEvent>> {
        self.record(node, "events");
        self.events
            .lock()
            .unwrap()
            .get(&node)
            .cloned()
            .ok_or_else(|| ObserverError::unreachable(node, "connection refused"))
    }

    async fn fetch_log(&self, node: NodeId) -> Result<Vec<LogEntry>> {
        self.record(node, "log");
        self.logs
            .lock()
            .unwrap()
            .get(&node)
            .cloned()
            .flatten()
            .ok_or_else(|| ObserverError::unreachable(node, "timed out"))
    }

    async fn list_tasks(&self, node: NodeId) -> Result<Vec<Task>> {
        self.record(node, "list_tasks");
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn get_task(&self, node: NodeId, task_id: &str) -> Result<Task> {
        self.record(node, "get_task");
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|task| task.id == task_id)
            .cloned()
            .ok_or_else(|| ObserverError::NotFound("Task not found".to_string()))
    }

    async fn create_task(&self, node: NodeId, new_task: &NewTask) -> Result<Task> {
        self.record(node, "create_task");
        self.check_write(node)?;
        let seq = self.next_task.fetch_add(1, Ordering::SeqCst) + 1;
        let created = Task {
            id: format!("task-{}", seq),
            title: new_task.title.clone(),
            description: new_task.description.clone(),
            status: TaskStatus::Pending,
            priority: new_task.priority,
            created_at: None,
            updated_at: None,
            created_by_node: Some(node),
            log_index: Some(seq as u64 - 1),
        };
        self.tasks.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_task(&self, node: NodeId, task_id: &str, update: &TaskUpdate) -> Result<Task> {
        self.record(node, "update_task");
        self.check_write(node)?;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| ObserverError::NotFound("Task not found or update failed".to_string()))?;
        if let Some(title) = &update.title {
            task.title = title.clone();
        }
        if let Some(description) = &update.description {
            task.description = Some(description.clone());
        }
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        Ok(task.clone())
    }

    async fn delete_task(&self, node: NodeId, task_id: &str) -> Result<()> {
        self.record(node, "delete_task");
        self.check_write(node)?;
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|task| task.id != task_id);
        if tasks.len() == before {
            return Err(ObserverError::NotFound("Task not found or delete failed".to_string()));
        }
        Ok(())
    }

    async fn toggle_node(&self, node: NodeId) -> Result<ToggleResponse> {
        self.record(node, "toggle");
        let mut statuses = self.statuses.lock().unwrap();
        let entry = statuses.entry(node).or_insert(None);
        let state = if entry.is_some() {
            *entry = None;
            "stopped"
        } else {
            *entry = Some(status(node, NodeState::Follower, 0, false));
            "running"
        };
        Ok(ToggleResponse {
            state: state.to_string(),
            message: Some(format!("Node {} {}", node, state)),
        })
    }
}

/// Shared wiring for component tests
pub(crate) struct Harness {
    pub registry: Arc<EndpointRegistry>,
    pub cluster: Arc<FakeCluster>,
    pub store: Arc<StateStore>,
    pub leader: Arc<LeaderTracker>,
    pub metrics: Arc<SyncMetricsCollector>,
}

impl Harness {
    pub fn new(nodes: u64) -> Self {
        Self {
            registry: Arc::new(registry(nodes)),
            cluster: FakeCluster::new(),
            store: Arc::new(StateStore::default()),
            leader: Arc::new(LeaderTracker::new(1)),
            metrics: Arc::new(SyncMetricsCollector::new()),
        }
    }

    pub fn transport(&self) -> Arc<dyn NodeTransport> {
        self.cluster.clone()
    }
}

pub(crate) fn registry(nodes: u64) -> EndpointRegistry {
    EndpointRegistry::new(
        (1..=nodes).map(|id| NodeEndpoint::new(id, format!("127.0.0.1:{}", 8000 + id))),
    )
    .unwrap()
}

pub(crate) fn status(node: NodeId, state: NodeState, term: u64, is_leader: bool) -> NodeStatus {
    NodeStatus {
        node_id: node,
        state,
        term,
        voted_for: None,
        log_length: 0,
        commit_index: -1,
        last_heartbeat: 1_700_000_000.0,
        is_leader,
        leader_id: if is_leader { Some(node) } else { None },
    }
}

pub(crate) fn entries(len: u64, term: u64) -> Vec<LogEntry> {
    (0..len)
        .map(|index| LogEntry {
            index,
            term,
            key: format!("task:create:{}", index),
            value: serde_json::json!({ "title": format!("task {}", index) }),
            timestamp: 1_700_000_000.0 + index as f64,
        })
        .collect()
}

pub(crate) fn event(seq: u64, node: NodeId) -> RaftEvent {
    RaftEvent {
        timestamp: 1_700_000_000.0 + seq as f64,
        event_type: "state_change".to_string(),
        node_id: node,
        term: 1,
        details: BTreeMap::from([("seq".to_string(), serde_json::json!(seq))]),
    }
}

/// Test end of a scripted push channel
pub(crate) struct PeerEnd {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

pub(crate) struct ScriptedChannel {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

/// A connected channel pair; dropping `PeerEnd::to_client` closes it
pub(crate) fn session() -> (ScriptedChannel, PeerEnd) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    (
        ScriptedChannel { inbound, outbound },
        PeerEnd {
            to_client,
            from_client,
        },
    )
}

#[async_trait]
impl PushChannel for ScriptedChannel {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn send(&mut self, frame: String) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| ObserverError::channel("peer gone"))
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Hands out queued sessions; refuses once the queue is empty
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    sessions: Mutex<VecDeque<ScriptedChannel>>,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a session and return its test end
    pub fn push_session(&self) -> PeerEnd {
        let (channel, peer) = session();
        self.sessions.lock().unwrap().push_back(channel);
        peer
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushConnector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushChannel>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let next = self.sessions.lock().unwrap().pop_front();
        match next {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(ObserverError::channel("connection refused")),
        }
    }
}

/// Poll `check` until it holds or roughly a second passes
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    check()
}
