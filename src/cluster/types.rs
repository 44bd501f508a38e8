use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node ID type for the observed cluster
pub type NodeId = u64;

/// Role a node reports for itself
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Leader,
    Follower,
    Candidate,
    Stopped,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeState::Leader => "leader",
            NodeState::Follower => "follower",
            NodeState::Candidate => "candidate",
            NodeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Status snapshot reported by a single node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub state: NodeState,
    pub term: u64,
    pub voted_for: Option<NodeId>,
    pub log_length: u64,
    /// Highest committed log index, `-1` before the first commit
    pub commit_index: i64,
    /// Epoch seconds of the last heartbeat the node saw
    pub last_heartbeat: f64,
    pub is_leader: bool,
    pub leader_id: Option<NodeId>,
}

impl NodeStatus {
    /// Placeholder recorded for a node that did not answer a poll
    pub fn unreachable(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: NodeState::Stopped,
            term: 0,
            voted_for: None,
            log_length: 0,
            commit_index: 0,
            last_heartbeat: 0.0,
            is_leader: false,
            leader_id: None,
        }
    }

    /// Whether `is_leader` and `leader_id` agree with each other
    pub fn is_consistent(&self) -> bool {
        !self.is_leader || self.leader_id == Some(self.node_id)
    }

    /// Last heartbeat as a wall-clock time
    pub fn heartbeat_time(&self) -> Option<DateTime<Utc>> {
        epoch_seconds_to_utc(self.last_heartbeat)
    }
}

/// Cluster event as recorded by a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaftEvent {
    pub timestamp: f64,
    pub event_type: String,
    pub node_id: NodeId,
    pub term: u64,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl RaftEvent {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        epoch_seconds_to_utc(self.timestamp)
    }
}

/// Entry of a node's replicated log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub key: String,
    #[serde(default)]
    pub value: serde_json::Value,
    pub timestamp: f64,
}

/// `GET /api/raft/cluster`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterInfo {
    pub this_node: NodeStatus,
    #[serde(default)]
    pub cluster_nodes: Vec<String>,
    pub leader_id: Option<NodeId>,
    pub term: u64,
}

/// `GET /api/raft/events`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsResponse {
    pub events: Vec<RaftEvent>,
}

/// `GET /api/raft/log`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogResponse {
    pub memory_log: Vec<LogEntry>,
    /// Database-side log rows, passed through untouched
    #[serde(default)]
    pub database_log: Vec<serde_json::Value>,
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// Task priority
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Task as owned by the remote cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub created_by_node: Option<NodeId>,
    pub log_index: Option<u64>,
}

/// `GET /api/tasks`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksResponse {
    pub tasks: Vec<Task>,
}

/// Body of `POST /api/tasks`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: TaskPriority,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: TaskPriority::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Body of `PUT /api/tasks/{id}`; absent fields are left unchanged
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
}

/// Body a node answers with when it refuses a write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectBody {
    pub leader_id: Option<NodeId>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /api/raft/node/{id}/toggle`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToggleResponse {
    pub state: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Frame exchanged over the push channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushFrame {
    InitialStatus(NodeStatus),
    StatusUpdate(NodeStatus),
    Event(RaftEvent),
    Events(Vec<RaftEvent>),
    Log(Vec<LogEntry>),
}

/// Command the client may send over the push channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    GetEvents { limit: usize },
    GetLog,
}

fn epoch_seconds_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    let secs = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
}
