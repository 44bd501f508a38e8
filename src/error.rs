use crate::cluster::types::NodeId;
use thiserror::Error;

/// Main error type for the raftview client layer
#[derive(Error, Debug)]
pub enum ObserverError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Unknown node: {0} is not a cluster member")]
    UnknownNode(NodeId),

    #[error("Node {node} unreachable: {reason}")]
    Unreachable { node: NodeId, reason: String },

    #[error("Node {node} is not the leader (reported leader: {leader_id:?})")]
    NotLeader {
        node: NodeId,
        leader_id: Option<NodeId>,
    },

    #[error("Redirected twice ({first} -> {second} -> {next:?}), giving up")]
    RedirectLimit {
        first: NodeId,
        second: NodeId,
        next: Option<NodeId>,
    },

    #[error("Validation error ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Push channel error: {0}")]
    Channel(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ObserverError>;

impl ObserverError {
    pub fn unreachable(node: NodeId, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            node,
            reason: reason.into(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure means the node could not be talked to at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    /// Whether the failure is a not-leader redirect signal
    pub fn is_redirect(&self) -> bool {
        matches!(self, Self::NotLeader { .. })
    }
}
