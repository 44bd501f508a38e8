use crate::cluster::{
    poller, ClusterAggregator, ClusterState, EndpointRegistry, EventHistory, EventStreamSubscriber,
    HttpTransport, LeaderTracker, NodeTransport, PushConnector, ReconnectPolicy,
    ReplicationComposer, RedirectExecutor, StateStore, SubscriptionHandle, SyncMetricsCollector,
    TaskService, WsConnector,
};
use crate::config::AppConfig;
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Application handle wiring every cluster component to one shared store
///
/// Building the handle opens nothing; [`ClusterObserver::start`] spawns the
/// refresh loops and the push channel.
#[derive(Clone)]
pub struct ClusterObserver {
    config: AppConfig,
    registry: Arc<EndpointRegistry>,
    store: Arc<StateStore>,
    leader: Arc<LeaderTracker>,
    metrics: Arc<SyncMetricsCollector>,
    aggregator: Arc<ClusterAggregator>,
    composer: Arc<ReplicationComposer>,
    tasks: Arc<TaskService>,
    connector: Arc<dyn PushConnector>,
}

impl ClusterObserver {
    /// Observer talking HTTP and WebSocket to the configured nodes
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(EndpointRegistry::new(config.cluster.nodes.clone())?);
        let transport = Arc::new(HttpTransport::new(
            registry.clone(),
            config.polling.request_timeout(),
        )?);
        let connector = Arc::new(WsConnector::new(config.polling.request_timeout()));
        Ok(Self::assemble(config, registry, transport, connector))
    }

    /// Observer over caller-supplied transport and push connector
    pub fn with_transport(
        config: AppConfig,
        transport: Arc<dyn NodeTransport>,
        connector: Arc<dyn PushConnector>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(EndpointRegistry::new(config.cluster.nodes.clone())?);
        Ok(Self::assemble(config, registry, transport, connector))
    }

    fn assemble(
        config: AppConfig,
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn NodeTransport>,
        connector: Arc<dyn PushConnector>,
    ) -> Self {
        let store = Arc::new(StateStore::new(ClusterState::new(
            EventHistory::with_capacity(config.events.capacity),
        )));
        let leader = Arc::new(LeaderTracker::new(config.cluster.default_leader));
        let metrics = Arc::new(SyncMetricsCollector::new());

        let executor = Arc::new(RedirectExecutor::new(
            registry.clone(),
            transport.clone(),
            leader.clone(),
            metrics.clone(),
        ));
        let aggregator = Arc::new(ClusterAggregator::new(
            registry.clone(),
            transport.clone(),
            store.clone(),
            leader.clone(),
            metrics.clone(),
        ));
        let composer = Arc::new(ReplicationComposer::new(
            registry.clone(),
            transport.clone(),
            store.clone(),
            metrics.clone(),
        ));
        let tasks = Arc::new(TaskService::new(
            registry.clone(),
            transport,
            leader.clone(),
            executor,
            store.clone(),
        ));

        Self {
            config,
            registry,
            store,
            leader,
            metrics,
            aggregator,
            composer,
            tasks,
            connector,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn leader(&self) -> &LeaderTracker {
        &self.leader
    }

    pub fn metrics(&self) -> &SyncMetricsCollector {
        &self.metrics
    }

    pub fn aggregator(&self) -> &ClusterAggregator {
        &self.aggregator
    }

    pub fn composer(&self) -> &ReplicationComposer {
        &self.composer
    }

    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    /// Spawn the refresh loops and, if enabled, the push channel
    pub fn start(&self) -> Result<RunningObserver> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let polling = &self.config.polling;
        let mut loops = Vec::new();

        let aggregator = self.aggregator.clone();
        loops.push(tokio::spawn(poller::run_every(
            "status",
            polling.status_interval(),
            shutdown_rx.clone(),
            move || {
                let aggregator = aggregator.clone();
                async move {
                    let report = aggregator.refresh_all().await;
                    debug!(
                        "Status cycle: {} reachable, {} unreachable",
                        report.reachable.len(),
                        report.unreachable.len()
                    );
                }
            },
        )));

        let composer = self.composer.clone();
        loops.push(tokio::spawn(poller::run_every(
            "log",
            polling.log_interval(),
            shutdown_rx.clone(),
            move || {
                let composer = composer.clone();
                async move {
                    composer.refresh_logs().await;
                }
            },
        )));

        let aggregator = self.aggregator.clone();
        loops.push(tokio::spawn(poller::run_every(
            "events",
            polling.events_interval(),
            shutdown_rx.clone(),
            move || {
                let aggregator = aggregator.clone();
                async move {
                    if let Err(e) = aggregator.refresh_events().await {
                        debug!("Event history refresh skipped: {}", e);
                    }
                }
            },
        )));

        let tasks = self.tasks.clone();
        loops.push(tokio::spawn(poller::run_every(
            "tasks",
            polling.task_interval(),
            shutdown_rx,
            move || {
                let tasks = tasks.clone();
                async move {
                    if let Err(e) = tasks.refresh().await {
                        debug!("Task refresh skipped: {}", e);
                    }
                }
            },
        )));

        let subscription = if self.config.stream.enabled {
            let subscriber = EventStreamSubscriber::new(
                &self.registry,
                self.config.stream.node_id,
                self.connector.clone(),
                self.store.clone(),
                self.metrics.clone(),
                ReconnectPolicy::fixed(self.config.stream.reconnect_delay())
                    .with_idle_timeout(self.config.stream.idle_timeout()),
            )?;
            Some(subscriber.start())
        } else {
            None
        };

        info!(
            "Observing {} nodes (push channel {})",
            self.registry.len(),
            if subscription.is_some() { "on" } else { "off" }
        );

        Ok(RunningObserver {
            shutdown: shutdown_tx,
            loops,
            subscription,
        })
    }
}

/// Background work of a started [`ClusterObserver`]
///
/// Dropping it stops every loop and closes the push channel.
pub struct RunningObserver {
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
    subscription: Option<SubscriptionHandle>,
}

impl RunningObserver {
    pub fn subscription(&self) -> Option<&SubscriptionHandle> {
        self.subscription.as_ref()
    }

    /// Stop the loops, close the push channel and wait for all of it
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(subscription) = self.subscription.take() {
            subscription.shutdown().await;
        }
        for handle in std::mem::take(&mut self.loops) {
            if let Err(e) = handle.await {
                warn!("Refresh loop ended abnormally: {}", e);
            }
        }
        info!("Observer stopped");
    }
}

impl Drop for RunningObserver {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        for handle in &self.loops {
            handle.abort();
        }
    }
}
