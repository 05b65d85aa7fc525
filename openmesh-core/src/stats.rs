//! Network-wide statistics
//!
//! Periodically snapshots aggregate counters derived from the current
//! node set and persists them append-only for historical queries. The
//! "current" view additionally folds in counters read from the ledger;
//! that leg degrades gracefully when the gateway is unreachable.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ledger::Ledger;
use crate::store::{NodeFilter, Store, StoreError};
use crate::types::{
    LedgerCounters, NetworkStatsSnapshot, Node, NodeStatus, PerformanceMetrics, Position,
};

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("Invalid timeframe: {0}")]
    Timeframe(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// History window for activity queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl Timeframe {
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::Hour => Duration::hours(1),
            Timeframe::Day => Duration::hours(24),
            Timeframe::Week => Duration::days(7),
            Timeframe::Month => Duration::days(30),
        }
    }

    pub fn lower_bound(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

impl FromStr for Timeframe {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Timeframe::Hour),
            "24h" => Ok(Timeframe::Day),
            "7d" => Ok(Timeframe::Week),
            "30d" => Ok(Timeframe::Month),
            other => Err(StatsError::Timeframe(other.to_string())),
        }
    }
}

/// Current stats response: local aggregates plus ledger counters
#[derive(Debug, Clone, Serialize)]
pub struct CurrentStats {
    #[serde(flatten)]
    pub snapshot: NetworkStatsSnapshot,
    /// Absent when the ledger gateway is unreachable
    pub blockchain: Option<LedgerCounters>,
}

/// Per-node entry in the recent-activity report
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub node_id: String,
    pub name: String,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub metrics: PerformanceMetrics,
    pub position: Position,
}

/// Historical snapshots plus recent node activity for one timeframe
#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub timeframe: Timeframe,
    pub historical: Vec<NetworkStatsSnapshot>,
    pub recent: Vec<ActivityEntry>,
    pub data_points: u64,
    pub active_nodes_now: u64,
    pub recent_heartbeats: u64,
}

/// Pure aggregation over a node collection
pub fn aggregate(nodes: &[Node], now: DateTime<Utc>) -> NetworkStatsSnapshot {
    let total_nodes = nodes.len() as u64;
    let active_nodes = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Active)
        .count() as u64;
    let total_users: u64 = nodes.iter().filter_map(|n| n.metrics.users_served).sum();
    let bytes_transferred: u64 = nodes.iter().filter_map(|n| n.metrics.bytes_transferred).sum();

    let uptimes: Vec<f64> = nodes
        .iter()
        .filter_map(|n| n.metrics.uptime_percentage)
        .collect();
    let avg_uptime = if uptimes.is_empty() {
        0.0
    } else {
        uptimes.iter().sum::<f64>() / uptimes.len() as f64
    };

    NetworkStatsSnapshot {
        snapshot_id: generate_snapshot_id(),
        recorded_at: now,
        total_nodes,
        active_nodes,
        total_users,
        bytes_transferred,
        avg_uptime,
    }
}

/// Derives and persists network-wide counters
pub struct StatsAggregator {
    store: Arc<dyn Store>,
    ledger: Arc<dyn Ledger>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<dyn Ledger>) -> Self {
        Self { store, ledger }
    }

    /// Take and persist one snapshot of the whole network
    pub async fn snapshot(&self) -> Result<NetworkStatsSnapshot, StatsError> {
        let nodes = self.store.list_nodes(NodeFilter::default()).await?;
        let snapshot = aggregate(&nodes, Utc::now());
        self.store.insert_snapshot(snapshot.clone()).await?;

        info!(
            "Stats snapshot {}: {}/{} nodes active",
            snapshot.snapshot_id, snapshot.active_nodes, snapshot.total_nodes
        );
        Ok(snapshot)
    }

    /// Current counters combined with ledger counters
    ///
    /// Also persists the snapshot, so polling the current stats leaves
    /// a historical trail. The ledger leg is read-only and best-effort.
    pub async fn current(&self) -> Result<CurrentStats, StatsError> {
        let snapshot = self.snapshot().await?;

        let blockchain = match self.ledger.network_counters().await {
            Ok(counters) => Some(counters),
            Err(e) => {
                warn!("Ledger counters unavailable: {}", e);
                None
            }
        };

        Ok(CurrentStats {
            snapshot,
            blockchain,
        })
    }

    /// Snapshots within the timeframe, oldest first
    pub async fn query_history(
        &self,
        timeframe: Timeframe,
    ) -> Result<Vec<NetworkStatsSnapshot>, StatsError> {
        let since = timeframe.lower_bound(Utc::now());
        Ok(self.store.snapshots_since(since).await?)
    }

    /// History plus recent heartbeat activity for the timeframe
    pub async fn activity(&self, timeframe: Timeframe) -> Result<ActivityReport, StatsError> {
        let since = timeframe.lower_bound(Utc::now());

        let historical = self.store.snapshots_since(since).await?;

        let filter = NodeFilter {
            heartbeat_since: Some(since),
            ..Default::default()
        };
        let mut recently_seen = self.store.list_nodes(filter).await?;
        // Newest heartbeat first
        recently_seen.sort_by(|a, b| b.last_heartbeat.cmp(&a.last_heartbeat));

        let active_nodes_now = recently_seen
            .iter()
            .filter(|n| n.status == NodeStatus::Active)
            .count() as u64;
        let recent_heartbeats = recently_seen.len() as u64;
        let data_points = historical.len() as u64;

        let recent = recently_seen
            .into_iter()
            .map(|n| ActivityEntry {
                node_id: n.node_id,
                name: n.name,
                status: n.status,
                last_heartbeat: n.last_heartbeat,
                metrics: n.metrics,
                position: n.position,
            })
            .collect();

        Ok(ActivityReport {
            timeframe,
            historical,
            recent,
            data_points,
            active_nodes_now,
            recent_heartbeats,
        })
    }
}

fn generate_snapshot_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("snap_{}_{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NullLedger;
    use crate::store::MemStore;
    use crate::types::Hardware;

    fn node_with_metrics(
        node_id: &str,
        status: NodeStatus,
        metrics: PerformanceMetrics,
        last_heartbeat: Option<DateTime<Utc>>,
    ) -> Node {
        let now = Utc::now();
        Node {
            node_id: node_id.to_string(),
            owner_id: "owner-1".to_string(),
            name: format!("{} AP", node_id),
            description: None,
            position: Position {
                lat: 37.7749,
                lng: -122.4194,
                city: "San Francisco".to_string(),
                country: "US".to_string(),
            },
            hardware: Hardware {
                kind: "test".to_string(),
                specs: String::new(),
                capabilities: vec![],
            },
            status,
            metrics,
            created_at: now,
            updated_at: now,
            last_heartbeat,
        }
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("1h".parse::<Timeframe>().unwrap(), Timeframe::Hour);
        assert_eq!("24h".parse::<Timeframe>().unwrap(), Timeframe::Day);
        assert_eq!("7d".parse::<Timeframe>().unwrap(), Timeframe::Week);
        assert_eq!("30d".parse::<Timeframe>().unwrap(), Timeframe::Month);
        assert!("90d".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_lower_bound() {
        let now = Utc::now();
        assert_eq!(now - Timeframe::Hour.lower_bound(now), Duration::hours(1));
        assert_eq!(now - Timeframe::Month.lower_bound(now), Duration::days(30));
    }

    #[test]
    fn test_aggregate_counts_and_averages() {
        let now = Utc::now();
        let nodes = vec![
            node_with_metrics(
                "a",
                NodeStatus::Active,
                PerformanceMetrics {
                    uptime_percentage: Some(90.0),
                    bytes_transferred: Some(100),
                    users_served: Some(3),
                    ..Default::default()
                },
                Some(now),
            ),
            node_with_metrics(
                "b",
                NodeStatus::Active,
                PerformanceMetrics {
                    uptime_percentage: Some(70.0),
                    bytes_transferred: Some(50),
                    users_served: Some(2),
                    ..Default::default()
                },
                Some(now),
            ),
            // Never reported: excluded from the uptime average
            node_with_metrics("c", NodeStatus::Inactive, PerformanceMetrics::default(), None),
        ];

        let snapshot = aggregate(&nodes, now);
        assert_eq!(snapshot.total_nodes, 3);
        assert_eq!(snapshot.active_nodes, 2);
        assert_eq!(snapshot.total_users, 5);
        assert_eq!(snapshot.bytes_transferred, 150);
        assert!((snapshot.avg_uptime - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_empty_network() {
        let snapshot = aggregate(&[], Utc::now());
        assert_eq!(snapshot.total_nodes, 0);
        assert_eq!(snapshot.avg_uptime, 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_persists() {
        let store = Arc::new(MemStore::new());
        let aggregator = StatsAggregator::new(store.clone(), Arc::new(NullLedger));

        store
            .insert_node(node_with_metrics(
                "a",
                NodeStatus::Active,
                PerformanceMetrics {
                    uptime_percentage: Some(95.0),
                    ..Default::default()
                },
                Some(Utc::now()),
            ))
            .await
            .unwrap();

        let snapshot = aggregator.snapshot().await.unwrap();
        assert_eq!(snapshot.total_nodes, 1);

        let history = aggregator.query_history(Timeframe::Hour).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].snapshot_id, snapshot.snapshot_id);
    }

    #[tokio::test]
    async fn test_current_includes_ledger_counters() {
        let store = Arc::new(MemStore::new());
        let aggregator = StatsAggregator::new(store, Arc::new(NullLedger));

        let current = aggregator.current().await.unwrap();
        assert!(current.blockchain.is_some());
    }

    #[tokio::test]
    async fn test_activity_report() {
        let store = Arc::new(MemStore::new());
        let aggregator = StatsAggregator::new(store.clone(), Arc::new(NullLedger));
        let now = Utc::now();

        store
            .insert_node(node_with_metrics(
                "fresh",
                NodeStatus::Active,
                PerformanceMetrics::default(),
                Some(now),
            ))
            .await
            .unwrap();
        store
            .insert_node(node_with_metrics(
                "stale",
                NodeStatus::Active,
                PerformanceMetrics::default(),
                Some(now - Duration::days(2)),
            ))
            .await
            .unwrap();
        store
            .insert_node(node_with_metrics(
                "silent",
                NodeStatus::Inactive,
                PerformanceMetrics::default(),
                None,
            ))
            .await
            .unwrap();

        let report = aggregator.activity(Timeframe::Day).await.unwrap();
        assert_eq!(report.recent_heartbeats, 1);
        assert_eq!(report.recent[0].node_id, "fresh");
        assert_eq!(report.active_nodes_now, 1);
    }
}
