use crate::cluster::types::NodeId;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Counters describing how well the client keeps up with the cluster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncMetrics {
    /// Status polls that returned a status
    pub status_polls_ok: u64,
    /// Status polls that timed out or failed
    pub status_polls_failed: u64,
    /// Consecutive failed polls per node, reset on success
    pub consecutive_failures: HashMap<NodeId, u64>,
    /// Average status poll latency (milliseconds, exponential moving average)
    pub avg_poll_latency_ms: f64,
    pub log_fetches_ok: u64,
    pub log_fetches_failed: u64,
    /// Redirects followed by the write executor
    pub redirects_followed: u64,
    /// Writes abandoned because the retry was redirected again
    pub redirect_limit_hits: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
    /// Push channel connections established
    pub stream_connects: u64,
    /// Push channel drops or failed connection attempts
    pub stream_disconnects: u64,
    pub frames_received: u64,
    pub frames_malformed: u64,
    /// Time since the collector was created
    pub uptime: Duration,
}

/// Collects [`SyncMetrics`] from all synchronization loops
#[derive(Debug)]
pub struct SyncMetricsCollector {
    metrics: RwLock<SyncMetrics>,
    start_time: Instant,
}

impl Default for SyncMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(SyncMetrics::default()),
            start_time: Instant::now(),
        }
    }

    fn with<F: FnOnce(&mut SyncMetrics)>(&self, f: F) {
        // A poisoned lock only means a panicking writer; the counters are still usable.
        let mut metrics = match self.metrics.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut metrics);
    }

    /// Record one status poll of `node`
    pub fn record_status_poll(&self, node: NodeId, latency: Duration, success: bool) {
        self.with(|m| {
            if success {
                m.status_polls_ok += 1;
                m.consecutive_failures.insert(node, 0);
            } else {
                m.status_polls_failed += 1;
                *m.consecutive_failures.entry(node).or_insert(0) += 1;
            }

            let latency_ms = latency.as_secs_f64() * 1000.0;
            if m.avg_poll_latency_ms == 0.0 {
                m.avg_poll_latency_ms = latency_ms;
            } else {
                m.avg_poll_latency_ms = 0.9 * m.avg_poll_latency_ms + 0.1 * latency_ms;
            }
        });
        debug!(
            "Status poll recorded: node={}, latency={}ms, success={}",
            node,
            latency.as_millis(),
            success
        );
    }

    pub fn record_log_fetch(&self, success: bool) {
        self.with(|m| {
            if success {
                m.log_fetches_ok += 1;
            } else {
                m.log_fetches_failed += 1;
            }
        });
    }

    pub fn record_redirect(&self) {
        self.with(|m| m.redirects_followed += 1);
    }

    pub fn record_redirect_limit(&self) {
        self.with(|m| m.redirect_limit_hits += 1);
    }

    pub fn record_write(&self, success: bool) {
        self.with(|m| {
            if success {
                m.writes_ok += 1;
            } else {
                m.writes_failed += 1;
            }
        });
    }

    pub fn record_stream_connect(&self) {
        self.with(|m| m.stream_connects += 1);
    }

    pub fn record_stream_disconnect(&self) {
        self.with(|m| m.stream_disconnects += 1);
    }

    pub fn record_frame(&self, well_formed: bool) {
        self.with(|m| {
            m.frames_received += 1;
            if !well_formed {
                m.frames_malformed += 1;
            }
        });
    }

    /// Copy of the current counters
    pub fn snapshot(&self) -> SyncMetrics {
        let metrics = match self.metrics.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        SyncMetrics {
            uptime: self.start_time.elapsed(),
            ..metrics
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_poll_counters() {
        let collector = SyncMetricsCollector::new();
        collector.record_status_poll(1, Duration::from_millis(10), true);
        collector.record_status_poll(2, Duration::from_millis(30), false);
        collector.record_status_poll(2, Duration::from_millis(30), false);

        let metrics = collector.snapshot();
        assert_eq!(metrics.status_polls_ok, 1);
        assert_eq!(metrics.status_polls_failed, 2);
        assert_eq!(metrics.consecutive_failures.get(&1), Some(&0));
        assert_eq!(metrics.consecutive_failures.get(&2), Some(&2));
        assert!(metrics.avg_poll_latency_ms > 10.0);

        collector.record_status_poll(2, Duration::from_millis(5), true);
        assert_eq!(collector.snapshot().consecutive_failures.get(&2), Some(&0));
    }

    #[test]
    fn test_write_and_stream_counters() {
        let collector = SyncMetricsCollector::new();
        collector.record_redirect();
        collector.record_redirect_limit();
        collector.record_write(true);
        collector.record_write(false);
        collector.record_stream_connect();
        collector.record_stream_disconnect();
        collector.record_frame(true);
        collector.record_frame(false);

        let metrics = collector.snapshot();
        assert_eq!(metrics.redirects_followed, 1);
        assert_eq!(metrics.redirect_limit_hits, 1);
        assert_eq!((metrics.writes_ok, metrics.writes_failed), (1, 1));
        assert_eq!((metrics.stream_connects, metrics.stream_disconnects), (1, 1));
        assert_eq!((metrics.frames_received, metrics.frames_malformed), (2, 1));
    }
}
