use crate::cluster::types::NodeId;
use tokio::sync::RwLock;
use tracing::info;

/// Holds the node that task writes are currently routed to
///
/// The value may be stale; the redirect executor repairs it when a node
/// answers that it is not the leader. Instances are passed explicitly so
/// independent clients (and tests) never share routing state.
///
/// # Example
///
/// ```
/// use raftview::cluster::LeaderTracker;
///
/// # tokio_test::block_on(async {
/// let tracker = LeaderTracker::new(1);
/// assert!(tracker.set_current_leader(2).await);
/// assert!(!tracker.set_current_leader(2).await);
/// assert_eq!(tracker.current_leader().await, 2);
/// # });
/// ```
#[derive(Debug)]
pub struct LeaderTracker {
    current_leader: RwLock<NodeId>,
}

impl LeaderTracker {
    pub fn new(default_leader: NodeId) -> Self {
        Self {
            current_leader: RwLock::new(default_leader),
        }
    }

    /// Node that mutating requests go to by default
    pub async fn current_leader(&self) -> NodeId {
        *self.current_leader.read().await
    }

    /// Route subsequent writes to `node_id`; returns whether the target changed
    pub async fn set_current_leader(&self, node_id: NodeId) -> bool {
        let mut current = self.current_leader.write().await;
        if *current == node_id {
            return false;
        }
        info!("Leader target changed: {} -> {}", *current, node_id);
        *current = node_id;
        true
    }
}
