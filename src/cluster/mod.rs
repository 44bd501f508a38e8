//! Cluster state synchronization and leader-following client layer
//!
//! Polls, push frames and write redirects from every node are reconciled
//! into one [`StateStore`]; task writes are routed through the
//! [`LeaderTracker`] and repaired by the [`RedirectExecutor`].

pub mod aggregator;
pub mod channel;
pub mod executor;
pub mod history;
pub mod leader;
pub mod metrics;
pub mod poller;
pub mod registry;
pub mod replication;
pub mod store;
pub mod subscriber;
pub mod tasks;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{ClusterAggregator, RefreshReport};
pub use channel::{PushChannel, PushConnector, WsConnector};
pub use executor::{RedirectExecutor, TaskOperation, TaskOutcome};
pub use history::{EventHistory, DEFAULT_EVENT_CAPACITY};
pub use leader::LeaderTracker;
pub use metrics::{SyncMetrics, SyncMetricsCollector};
pub use registry::{EndpointRegistry, NodeEndpoint};
pub use replication::{compose, ReplicationCell, ReplicationComposer, ReplicationRow, ReplicationView};
pub use store::{ClusterState, StateStore};
pub use subscriber::{EventStreamSubscriber, ReconnectPolicy, SubscriptionHandle};
pub use tasks::TaskService;
pub use transport::{HttpTransport, NodeTransport};
pub use types::*;
