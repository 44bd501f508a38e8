use crate::cluster::executor::{RedirectExecutor, TaskOperation, TaskOutcome};
use crate::cluster::leader::LeaderTracker;
use crate::cluster::registry::EndpointRegistry;
use crate::cluster::store::StateStore;
use crate::cluster::transport::NodeTransport;
use crate::cluster::types::*;
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Cached view of the cluster's tasks plus redirect-aware mutations
///
/// The cache only changes on confirmed server answers: a periodic full
/// refresh, or a successful write applied locally right away.
pub struct TaskService {
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn NodeTransport>,
    leader: Arc<LeaderTracker>,
    executor: Arc<RedirectExecutor>,
    store: Arc<StateStore>,
}

impl TaskService {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn NodeTransport>,
        leader: Arc<LeaderTracker>,
        executor: Arc<RedirectExecutor>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            registry,
            transport,
            leader,
            executor,
            store,
        }
    }

    /// Replace the cached task list with the primary node's
    pub async fn refresh(&self) -> Result<usize> {
        let primary = self.read_target().await;
        let tasks = self.transport.list_tasks(primary).await?;
        let count = tasks.len();
        self.store.update(|state| state.replace_tasks(tasks));
        debug!("Task cache refreshed from node {}: {} tasks", primary, count);
        Ok(count)
    }

    /// Read one task from the primary node, refreshing its cached copy
    pub async fn get(&self, task_id: &str) -> Result<Task> {
        let primary = self.read_target().await;
        let task = self.transport.get_task(primary, task_id).await?;
        let cached = task.clone();
        self.store.update(|state| state.upsert_task(cached));
        Ok(task)
    }

    pub async fn create(&self, task: NewTask) -> Result<Task> {
        match self.run(TaskOperation::Create(task)).await? {
            TaskOutcome::Created(created) => {
                info!("Task {} created", created.id);
                Ok(created)
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<Task> {
        let operation = TaskOperation::Update {
            id: task_id.to_string(),
            update,
        };
        match self.run(operation).await? {
            TaskOutcome::Updated(updated) => Ok(updated),
            other => Err(unexpected(other)),
        }
    }

    pub async fn delete(&self, task_id: &str) -> Result<()> {
        let operation = TaskOperation::Delete {
            id: task_id.to_string(),
        };
        match self.run(operation).await? {
            TaskOutcome::Deleted(_) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Stop or start a node; the effect shows up through later status polls
    pub async fn toggle_node(&self, node: NodeId) -> Result<ToggleResponse> {
        self.registry.resolve(node)?;
        let response = self.transport.toggle_node(node).await?;
        info!("Node {} toggled, now {}", node, response.state);
        Ok(response)
    }

    async fn read_target(&self) -> NodeId {
        let tracked = self.leader.current_leader().await;
        self.store.read(|state| state.read_target(tracked))
    }

    async fn run(&self, operation: TaskOperation) -> Result<TaskOutcome> {
        let outcome = self.executor.execute(&operation, None).await?;
        let applied = outcome.clone();
        self.store.update(|state| match applied {
            TaskOutcome::Created(task) | TaskOutcome::Updated(task) => state.upsert_task(task),
            TaskOutcome::Deleted(id) => state.remove_task(&id),
        });
        Ok(outcome)
    }
}

fn unexpected(outcome: TaskOutcome) -> crate::error::ObserverError {
    crate::error::ObserverError::internal(format!("Unexpected task outcome: {:?}", outcome))
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tasks_tests;
