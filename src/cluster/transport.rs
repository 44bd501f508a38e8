use crate::cluster::registry::EndpointRegistry;
use crate::cluster::types::*;
use crate::error::{ObserverError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Requests the client layer makes against a single node
///
/// Every network call goes through this trait so the synchronization logic
/// can run against an in-memory cluster in tests.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// `GET /api/raft/status`
    async fn fetch_status(&self, node: NodeId) -> Result<NodeStatus>;

    /// `GET /api/raft/cluster`
    async fn fetch_cluster(&self, node: NodeId) -> Result<ClusterInfo>;

    /// `GET /api/raft/events`
    async fn fetch_events(&self, node: NodeId) -> Result<Vec<RaftEvent>>;

    /// `GET /api/raft/log`, memory log only
    async fn fetch_log(&self, node: NodeId) -> Result<Vec<LogEntry>>;

    async fn list_tasks(&self, node: NodeId) -> Result<Vec<Task>>;

    async fn get_task(&self, node: NodeId, task_id: &str) -> Result<Task>;

    /// May fail with [`ObserverError::NotLeader`]
    async fn create_task(&self, node: NodeId, task: &NewTask) -> Result<Task>;

    /// May fail with [`ObserverError::NotLeader`]
    async fn update_task(&self, node: NodeId, task_id: &str, update: &TaskUpdate) -> Result<Task>;

    /// May fail with [`ObserverError::NotLeader`]
    async fn delete_task(&self, node: NodeId, task_id: &str) -> Result<()>;

    /// `POST /api/raft/node/{id}/toggle`, sent to the node itself
    async fn toggle_node(&self, node: NodeId) -> Result<ToggleResponse>;
}

/// reqwest-backed transport talking to the node HTTP API
#[derive(Clone)]
pub struct HttpTransport {
    registry: Arc<EndpointRegistry>,
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport whose requests are bounded by `timeout`
    pub fn new(registry: Arc<EndpointRegistry>, timeout: Duration) -> Result<Self> {
        // 307 carries the leader hint in its body; never let reqwest chase it.
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ObserverError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build a request for the path made of `segments`, each percent-encoded
    fn request(&self, method: Method, node: NodeId, segments: &[&str]) -> Result<RequestBuilder> {
        let base = self.registry.base_url(node)?;
        let mut url = Url::parse(&base).map_err(|e| {
            ObserverError::internal(format!("Invalid address {} for node {}: {}", base, node, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| ObserverError::internal(format!("Address {} for node {} cannot carry a path", base, node)))?
            .pop_if_empty()
            .extend(segments);
        debug!("{} {} (node {})", method, url, node);
        Ok(self.client.request(method, url))
    }

    /// Send the request and classify the response
    async fn send(&self, node: NodeId, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ObserverError::unreachable(node, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(node, status, &body))
    }

    async fn send_json<R: DeserializeOwned>(&self, node: NodeId, request: RequestBuilder) -> Result<R> {
        let response = self.send(node, request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ObserverError::unreachable(node, e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ObserverError::protocol(format!("Undecodable response from node {}: {}", node, e))
        })
    }
}

/// Map a non-2xx response onto the error taxonomy
pub(crate) fn classify_failure(node: NodeId, status: StatusCode, body: &str) -> ObserverError {
    if status == StatusCode::TEMPORARY_REDIRECT {
        let leader_id = serde_json::from_str::<RedirectBody>(body)
            .ok()
            .and_then(|redirect| redirect.leader_id);
        return ObserverError::NotLeader { node, leader_id };
    }

    let message = error_message(body);
    if status == StatusCode::NOT_FOUND {
        ObserverError::NotFound(message)
    } else if status.is_client_error() {
        ObserverError::Validation {
            status: status.as_u16(),
            message,
        }
    } else {
        ObserverError::Server {
            status: status.as_u16(),
            message,
        }
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn fetch_status(&self, node: NodeId) -> Result<NodeStatus> {
        let request = self.request(Method::GET, node, &["api", "raft", "status"])?;
        self.send_json(node, request).await
    }

    async fn fetch_cluster(&self, node: NodeId) -> Result<ClusterInfo> {
        let request = self.request(Method::GET, node, &["api", "raft", "cluster"])?;
        self.send_json(node, request).await
    }

    async fn fetch_events(&self, node: NodeId) -> Result<Vec<RaftEvent>> {
        let request = self.request(Method::GET, node, &["api", "raft", "events"])?;
        let response: EventsResponse = self.send_json(node, request).await?;
        Ok(response.events)
    }

    async fn fetch_log(&self, node: NodeId) -> Result<Vec<LogEntry>> {
        let request = self.request(Method::GET, node, &["api", "raft", "log"])?;
        let response: LogResponse = self.send_json(node, request).await?;
        Ok(response.memory_log)
    }

    async fn list_tasks(&self, node: NodeId) -> Result<Vec<Task>> {
        let request = self.request(Method::GET, node, &["api", "tasks"])?;
        let response: TasksResponse = self.send_json(node, request).await?;
        Ok(response.tasks)
    }

    async fn get_task(&self, node: NodeId, task_id: &str) -> Result<Task> {
        let request = self.request(Method::GET, node, &["api", "tasks", task_id])?;
        self.send_json(node, request).await
    }

    async fn create_task(&self, node: NodeId, task: &NewTask) -> Result<Task> {
        let request = self.request(Method::POST, node, &["api", "tasks"])?.json(task);
        self.send_json(node, request).await
    }

    async fn update_task(&self, node: NodeId, task_id: &str, update: &TaskUpdate) -> Result<Task> {
        let request = self
            .request(Method::PUT, node, &["api", "tasks", task_id])?
            .json(update);
        self.send_json(node, request).await
    }

    async fn delete_task(&self, node: NodeId, task_id: &str) -> Result<()> {
        let request = self.request(Method::DELETE, node, &["api", "tasks", task_id])?;
        self.send(node, request).await?;
        Ok(())
    }

    async fn toggle_node(&self, node: NodeId) -> Result<ToggleResponse> {
        let id = node.to_string();
        let request = self.request(Method::POST, node, &["api", "raft", "node", &id, "toggle"])?;
        self.send_json(node, request).await
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod transport_tests;
