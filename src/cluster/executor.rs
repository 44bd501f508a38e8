use crate::cluster::leader::LeaderTracker;
use crate::cluster::metrics::SyncMetricsCollector;
use crate::cluster::registry::EndpointRegistry;
use crate::cluster::transport::NodeTransport;
use crate::cluster::types::*;
use crate::error::{ObserverError, Result};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Task mutation routed through the redirect executor
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOperation {
    Create(NewTask),
    Update { id: String, update: TaskUpdate },
    Delete { id: String },
}

impl TaskOperation {
    pub fn name(&self) -> &'static str {
        match self {
            TaskOperation::Create(_) => "create_task",
            TaskOperation::Update { .. } => "update_task",
            TaskOperation::Delete { .. } => "delete_task",
        }
    }
}

/// Server-confirmed result of a [`TaskOperation`]
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Created(Task),
    Updated(Task),
    Deleted(String),
}

/// Sends task writes to the believed leader and follows one redirect
///
/// A node that is not the leader answers with the id of the node it believes
/// leads. The executor moves the leader target there and retries once; a
/// second redirect is returned as [`ObserverError::RedirectLimit`] so two
/// disagreeing nodes cannot bounce a request forever. Any other failure is
/// returned as-is without a retry.
pub struct RedirectExecutor {
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn NodeTransport>,
    leader: Arc<LeaderTracker>,
    metrics: Arc<SyncMetricsCollector>,
}

impl RedirectExecutor {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn NodeTransport>,
        leader: Arc<LeaderTracker>,
        metrics: Arc<SyncMetricsCollector>,
    ) -> Self {
        Self {
            registry,
            transport,
            leader,
            metrics,
        }
    }

    pub fn leader(&self) -> &Arc<LeaderTracker> {
        &self.leader
    }

    /// Run `operation` against `node_hint`, or the tracked leader when absent
    pub async fn execute(
        &self,
        operation: &TaskOperation,
        node_hint: Option<NodeId>,
    ) -> Result<TaskOutcome> {
        let request_id = Uuid::new_v4();
        let span = info_span!("task_write", %request_id, op = operation.name());

        let result = self
            .execute_with_redirect(operation, node_hint)
            .instrument(span)
            .await;
        self.metrics.record_write(result.is_ok());
        result
    }

    async fn execute_with_redirect(
        &self,
        operation: &TaskOperation,
        node_hint: Option<NodeId>,
    ) -> Result<TaskOutcome> {
        let first = match node_hint {
            Some(node) => node,
            None => self.leader.current_leader().await,
        };

        let next = match self.dispatch(first, operation).await {
            Ok(outcome) => return Ok(outcome),
            Err(ObserverError::NotLeader {
                node,
                leader_id: Some(next),
            }) if next != node => next,
            Err(e) => return Err(e),
        };

        if !self.registry.contains(next) {
            warn!("Node {} redirected to unknown node {}", first, next);
            return Err(ObserverError::UnknownNode(next));
        }

        info!("Node {} is not the leader, retrying on node {}", first, next);
        self.leader.set_current_leader(next).await;
        self.metrics.record_redirect();

        match self.dispatch(next, operation).await {
            Ok(outcome) => Ok(outcome),
            Err(ObserverError::NotLeader { leader_id, .. }) => {
                warn!(
                    "Retry on node {} was redirected again (to {:?}); not following",
                    next, leader_id
                );
                self.metrics.record_redirect_limit();
                Err(ObserverError::RedirectLimit {
                    first,
                    second: next,
                    next: leader_id,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch(&self, node: NodeId, operation: &TaskOperation) -> Result<TaskOutcome> {
        debug!("Sending {} to node {}", operation.name(), node);
        match operation {
            TaskOperation::Create(task) => self
                .transport
                .create_task(node, task)
                .await
                .map(TaskOutcome::Created),
            TaskOperation::Update { id, update } => self
                .transport
                .update_task(node, id, update)
                .await
                .map(TaskOutcome::Updated),
            TaskOperation::Delete { id } => {
                self.transport.delete_task(node, id).await?;
                Ok(TaskOutcome::Deleted(id.clone()))
            }
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod executor_tests;
