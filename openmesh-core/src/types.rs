//! Core record types for the node pipeline
//!
//! Nodes, rewards and stats snapshots are the three durable record
//! families; connections are derived on demand and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a registered node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Inactive,
    Active,
    Maintenance,
    Suspended,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Inactive => "inactive",
            NodeStatus::Active => "active",
            NodeStatus::Maintenance => "maintenance",
            NodeStatus::Suspended => "suspended",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(NodeStatus::Inactive),
            "active" => Ok(NodeStatus::Active),
            "maintenance" => Ok(NodeStatus::Maintenance),
            "suspended" => Ok(NodeStatus::Suspended),
            other => Err(format!("unknown node status: {}", other)),
        }
    }
}

/// Geographic position of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    pub city: String,
    pub country: String,
}

/// Hardware descriptor reported at registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hardware {
    /// Free-form device type, e.g. "raspberry-pi-4"
    pub kind: String,
    /// Free-form spec string
    pub specs: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Performance metrics reported with each heartbeat
///
/// All fields are absent until the first heartbeat. A heartbeat
/// replaces the whole struct; unreported fields come back as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub uptime_percentage: Option<f64>,
    pub bytes_transferred: Option<u64>,
    pub users_served: Option<u64>,
    pub avg_response_time_ms: Option<f64>,
    pub reliability_score: Option<f64>,
}

impl PerformanceMetrics {
    /// True when no metric has been reported yet
    pub fn is_empty(&self) -> bool {
        self.uptime_percentage.is_none()
            && self.bytes_transferred.is_none()
            && self.users_served.is_none()
            && self.avg_response_time_ms.is_none()
            && self.reliability_score.is_none()
    }
}

/// A registered community access point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable, externally addressable identifier
    pub node_id: String,
    /// Owning account; ownership checks are an equality test on this field
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub position: Position,
    pub hardware: Hardware,
    pub status: NodeStatus,
    #[serde(default)]
    pub metrics: PerformanceMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Derived edge between two nodes on the network map
///
/// Never persisted; recomputed from node positions on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from: String,
    pub to: String,
    pub distance_km: f64,
    pub strength: f64,
}

/// Derived neighbor entry for a single node's surroundings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborLink {
    pub node_id: String,
    pub name: String,
    pub distance_km: f64,
    pub signal_strength: f64,
    pub position: Position,
}

/// Why a reward was granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardCategory {
    Coverage,
    Traffic,
    Reliability,
    Bonus,
}

/// Settlement state of a reward
///
/// `Distributed` and `Failed` are terminal; a reward never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    Pending,
    Distributed,
    Failed,
}

impl RewardStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RewardStatus::Distributed | RewardStatus::Failed)
    }
}

/// Value owed or paid to a node's owner for a performance period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub reward_id: String,
    pub node_id: String,
    pub owner_id: String,
    pub amount: f64,
    pub category: RewardCategory,
    pub status: RewardStatus,
    /// Ledger transaction reference, set once distribution confirms
    #[serde(default)]
    pub signature: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Immutable point-in-time aggregate of network-wide counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatsSnapshot {
    pub snapshot_id: String,
    pub recorded_at: DateTime<Utc>,
    pub total_nodes: u64,
    pub active_nodes: u64,
    pub total_users: u64,
    pub bytes_transferred: u64,
    pub avg_uptime: f64,
}

/// Counters read from the external ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerCounters {
    pub block_height: u64,
    pub total_nodes_on_chain: u64,
    pub active_nodes_on_chain: u64,
}

/// On-chain view of a node account, attached to node detail responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerNodeAccount {
    pub owner: String,
    pub status: NodeStatus,
    pub registered_at: i64,
    pub last_heartbeat: i64,
    pub reputation_score: u32,
    pub total_rewards: f64,
}
