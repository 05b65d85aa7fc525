//! Process metrics for monitoring the pipeline
//!
//! Thread-safe counters using atomic types, rendered as Prometheus text
//! by the `/metrics` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Global metrics collector for an openmesh process
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Registry activity
    nodes_registered: AtomicU64,
    heartbeats_received: AtomicU64,
    status_changes: AtomicU64,

    // Ledger interaction
    ledger_failures: AtomicU64,

    // Reward pipeline
    rewards_created: AtomicU64,
    rewards_distributed: AtomicU64,
    rewards_failed: AtomicU64,

    // Event fan-out
    events_published: AtomicU64,

    // Process start time for uptime calculation
    start_time: SystemTime,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                nodes_registered: AtomicU64::new(0),
                heartbeats_received: AtomicU64::new(0),
                status_changes: AtomicU64::new(0),
                ledger_failures: AtomicU64::new(0),
                rewards_created: AtomicU64::new(0),
                rewards_distributed: AtomicU64::new(0),
                rewards_failed: AtomicU64::new(0),
                events_published: AtomicU64::new(0),
                start_time: SystemTime::now(),
            }),
        }
    }

    pub fn node_registered(&self) {
        self.inner.nodes_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_received(&self) {
        self.inner.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_changed(&self) {
        self.inner.status_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ledger_failure(&self) {
        self.inner.ledger_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reward_created(&self) {
        self.inner.rewards_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reward_distributed(&self) {
        self.inner.rewards_distributed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reward_failed(&self) {
        self.inner.rewards_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_published(&self) {
        self.inner.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nodes_registered(&self) -> u64 {
        self.inner.nodes_registered.load(Ordering::Relaxed)
    }

    pub fn heartbeats_received(&self) -> u64 {
        self.inner.heartbeats_received.load(Ordering::Relaxed)
    }

    pub fn status_changes(&self) -> u64 {
        self.inner.status_changes.load(Ordering::Relaxed)
    }

    pub fn ledger_failures(&self) -> u64 {
        self.inner.ledger_failures.load(Ordering::Relaxed)
    }

    pub fn rewards_created(&self) -> u64 {
        self.inner.rewards_created.load(Ordering::Relaxed)
    }

    pub fn rewards_distributed(&self) -> u64 {
        self.inner.rewards_distributed.load(Ordering::Relaxed)
    }

    pub fn rewards_failed(&self) -> u64 {
        self.inner.rewards_failed.load(Ordering::Relaxed)
    }

    pub fn events_published(&self) -> u64 {
        self.inner.events_published.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.inner.start_time)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Generate Prometheus-formatted metrics text
    pub fn to_prometheus(&self, total_nodes: u64, active_nodes: u64) -> String {
        format!(
            "# HELP openmesh_nodes_total Total number of registered nodes\n\
             # TYPE openmesh_nodes_total gauge\n\
             openmesh_nodes_total {}\n\
             \n\
             # HELP openmesh_nodes_active Current number of active nodes\n\
             # TYPE openmesh_nodes_active gauge\n\
             openmesh_nodes_active {}\n\
             \n\
             # HELP openmesh_uptime_seconds Time since process start in seconds\n\
             # TYPE openmesh_uptime_seconds counter\n\
             openmesh_uptime_seconds {}\n\
             \n\
             # HELP openmesh_registrations_total Nodes registered since start\n\
             # TYPE openmesh_registrations_total counter\n\
             openmesh_registrations_total {}\n\
             \n\
             # HELP openmesh_heartbeats_total Heartbeats ingested since start\n\
             # TYPE openmesh_heartbeats_total counter\n\
             openmesh_heartbeats_total {}\n\
             \n\
             # HELP openmesh_status_changes_total Node status transitions since start\n\
             # TYPE openmesh_status_changes_total counter\n\
             openmesh_status_changes_total {}\n\
             \n\
             # HELP openmesh_ledger_failures_total Failed ledger calls since start\n\
             # TYPE openmesh_ledger_failures_total counter\n\
             openmesh_ledger_failures_total {}\n\
             \n\
             # HELP openmesh_rewards_created_total Pending rewards created since start\n\
             # TYPE openmesh_rewards_created_total counter\n\
             openmesh_rewards_created_total {}\n\
             \n\
             # HELP openmesh_rewards_distributed_total Rewards settled on the ledger since start\n\
             # TYPE openmesh_rewards_distributed_total counter\n\
             openmesh_rewards_distributed_total {}\n\
             \n\
             # HELP openmesh_rewards_failed_total Reward distributions that failed since start\n\
             # TYPE openmesh_rewards_failed_total counter\n\
             openmesh_rewards_failed_total {}\n\
             \n\
             # HELP openmesh_events_published_total Events fanned out since start\n\
             # TYPE openmesh_events_published_total counter\n\
             openmesh_events_published_total {}\n",
            total_nodes,
            active_nodes,
            self.uptime_seconds(),
            self.nodes_registered(),
            self.heartbeats_received(),
            self.status_changes(),
            self.ledger_failures(),
            self.rewards_created(),
            self.rewards_distributed(),
            self.rewards_failed(),
            self.events_published(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
