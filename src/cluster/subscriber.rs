use crate::cluster::channel::{PushChannel, PushConnector};
use crate::cluster::metrics::SyncMetricsCollector;
use crate::cluster::registry::EndpointRegistry;
use crate::cluster::store::StateStore;
use crate::cluster::types::{ClientFrame, NodeId, PushFrame};
use crate::error::{ObserverError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Silence after which an open push channel is treated as dead
///
/// Nodes push a status update every 500ms.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// When to try again after the push channel drops
///
/// Fixed delay, unlimited attempts: the cluster is expected to come back.
/// An open channel that stays silent for the idle timeout counts as dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
    idle_timeout: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2))
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    /// Replace the idle timeout; zero disables it
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = (!idle.is_zero()).then_some(idle);
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Reconnect without waiting
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Delay before reconnect attempt number `attempt` (1-based)
    pub fn delay_for(&self, _attempt: u64) -> Duration {
        self.delay
    }
}

/// Keeps one push channel to a node open and feeds it into the store
pub struct EventStreamSubscriber {
    node: NodeId,
    url: String,
    connector: Arc<dyn PushConnector>,
    store: Arc<StateStore>,
    metrics: Arc<SyncMetricsCollector>,
    policy: ReconnectPolicy,
}

enum Step {
    Shutdown,
    Outgoing(Option<String>),
    Inbound(Option<Result<String>>),
    Idle,
}

#[derive(Debug, PartialEq, Eq)]
enum PumpExit {
    Shutdown,
    Closed,
}

impl EventStreamSubscriber {
    pub fn new(
        registry: &EndpointRegistry,
        node: NodeId,
        connector: Arc<dyn PushConnector>,
        store: Arc<StateStore>,
        metrics: Arc<SyncMetricsCollector>,
        policy: ReconnectPolicy,
    ) -> Result<Self> {
        let url = registry.ws_url(node)?;
        Ok(Self {
            node,
            url,
            connector,
            store,
            metrics,
            policy,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Spawn the connection driver; it runs until the handle is shut down or dropped
    pub fn start(self) -> SubscriptionHandle {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let open = Arc::new(AtomicBool::new(false));

        let driver_open = open.clone();
        let task = tokio::spawn(async move {
            self.run(outgoing_rx, driver_open, shutdown_rx).await;
        });

        SubscriptionHandle {
            outgoing: outgoing_tx,
            open,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    async fn run(
        self,
        mut outgoing: mpsc::UnboundedReceiver<String>,
        open: Arc<AtomicBool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt: u64 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let connected = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(channel) => {
                    attempt = 0;
                    let exit = self.pump(channel, &mut outgoing, &open, &mut shutdown).await;
                    if exit == PumpExit::Shutdown {
                        break;
                    }
                }
                Err(e) => {
                    self.metrics.record_stream_disconnect();
                    warn!("Push channel to node {} unavailable: {}", self.node, e);
                }
            }

            attempt += 1;
            let delay = self.policy.delay_for(attempt);
            debug!(
                "Reconnecting push channel to node {} in {}ms (attempt {})",
                self.node,
                delay.as_millis(),
                attempt
            );
            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        open.store(false, Ordering::SeqCst);
        self.store.update(|state| state.set_stream_connected(false));
        info!("Push channel subscriber for node {} stopped", self.node);
    }

    async fn pump(
        &self,
        mut channel: Box<dyn PushChannel>,
        outgoing: &mut mpsc::UnboundedReceiver<String>,
        open: &AtomicBool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PumpExit {
        // Commands issued while the channel was down are dropped, not replayed.
        while outgoing.try_recv().is_ok() {}

        open.store(true, Ordering::SeqCst);
        self.store.update(|state| state.set_stream_connected(true));
        self.metrics.record_stream_connect();
        info!("Push channel to node {} open", self.node);

        let idle_timeout = self.policy.idle_timeout();
        let idle = tokio::time::sleep(idle_timeout.unwrap_or_default());
        tokio::pin!(idle);

        let exit = loop {
            let step = tokio::select! {
                _ = shutdown.changed() => Step::Shutdown,
                command = outgoing.recv() => Step::Outgoing(command),
                inbound = channel.recv() => Step::Inbound(inbound),
                _ = &mut idle, if idle_timeout.is_some() => Step::Idle,
            };

            match step {
                Step::Shutdown | Step::Outgoing(None) => break PumpExit::Shutdown,
                Step::Outgoing(Some(frame)) => {
                    if let Err(e) = channel.send(frame).await {
                        warn!("Push channel send to node {} failed: {}", self.node, e);
                        break PumpExit::Closed;
                    }
                }
                Step::Inbound(Some(Ok(text))) => {
                    if let Some(timeout) = idle_timeout {
                        idle.as_mut().reset(Instant::now() + timeout);
                    }
                    self.handle_frame(&text);
                }
                Step::Inbound(Some(Err(e))) => {
                    warn!("Push channel to node {} failed: {}", self.node, e);
                    break PumpExit::Closed;
                }
                Step::Inbound(None) => {
                    info!("Push channel to node {} closed by peer", self.node);
                    break PumpExit::Closed;
                }
                Step::Idle => {
                    warn!(
                        "Push channel to node {} silent for {:?}; reconnecting",
                        self.node,
                        idle_timeout.unwrap_or_default()
                    );
                    break PumpExit::Closed;
                }
            }
        };

        open.store(false, Ordering::SeqCst);
        channel.close().await;
        self.store.update(|state| state.set_stream_connected(false));
        if exit == PumpExit::Closed {
            self.metrics.record_stream_disconnect();
        }
        exit
    }

    /// Apply one inbound frame; malformed frames are skipped
    pub fn handle_frame(&self, text: &str) -> bool {
        let frame = match serde_json::from_str::<PushFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.record_frame(false);
                warn!("Ignoring malformed push frame from node {}: {}", self.node, e);
                return false;
            }
        };
        self.metrics.record_frame(true);

        match frame {
            PushFrame::InitialStatus(status) | PushFrame::StatusUpdate(status) => {
                self.store.update(|state| state.apply_status(status));
            }
            PushFrame::Event(event) => {
                debug!("Event {} from node {}", event.event_type, event.node_id);
                self.store.update(|state| state.push_event(event));
            }
            PushFrame::Events(events) => {
                self.store.update(|state| state.replace_events(events));
            }
            PushFrame::Log(entries) => {
                debug!("Ignoring pushed log of {} entries", entries.len());
            }
        }
        true
    }
}

/// Owner of a running subscriber; dropping it tears the channel down
pub struct SubscriptionHandle {
    outgoing: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Send a command if the channel is open; otherwise it is dropped
    pub fn send(&self, frame: &ClientFrame) -> bool {
        if !self.is_open() {
            debug!("Push channel closed, dropping {:?}", frame);
            return false;
        }
        match serde_json::to_string(frame) {
            Ok(text) => self.outgoing.send(text).is_ok(),
            Err(e) => {
                warn!("Failed to encode push command: {}", ObserverError::from(e));
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Cancel any pending reconnect, close the channel and wait for the driver
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Push channel driver ended abnormally: {}", e);
                }
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "subscriber_tests.rs"]
mod subscriber_tests;
