//! Durable row store for nodes, rewards and stats snapshots
//!
//! The store is the single source of truth for the pipeline. Every
//! committed mutation is echoed on a broadcast change stream so the
//! event bus can fan out node/reward/snapshot changes without polling.
//!
//! Two backends: `RocksStore` (persistent, RocksDB) and `MemStore`
//! (ephemeral, for tests and `--ephemeral` dev runs).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{Options, DB};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::types::{NetworkStatsSnapshot, Node, NodeStatus, Reward};

/// Capacity of the change-stream channel; laggy subscribers drop
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Row already exists: {0}")]
    AlreadyExists(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Change emitted after every committed mutation
///
/// Updates carry both the old and new row so consumers can diff them.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    NodeInserted(Node),
    NodeUpdated { old: Box<Node>, new: Box<Node> },
    NodeDeleted(Node),
    RewardInserted(Reward),
    RewardUpdated { old: Box<Reward>, new: Box<Reward> },
    SnapshotInserted(NetworkStatsSnapshot),
}

/// Geographic bounding box for map queries
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoBounds {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.south && lat <= self.north && lng >= self.west && lng <= self.east
    }
}

/// Row filter for node listings
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub status: Option<NodeStatus>,
    pub bounds: Option<GeoBounds>,
    pub heartbeat_since: Option<DateTime<Utc>>,
}

impl NodeFilter {
    fn matches(&self, node: &Node) -> bool {
        if let Some(status) = self.status {
            if node.status != status {
                return false;
            }
        }
        if let Some(bounds) = &self.bounds {
            if !bounds.contains(node.position.lat, node.position.lng) {
                return false;
            }
        }
        if let Some(since) = self.heartbeat_since {
            match node.last_heartbeat {
                Some(hb) if hb >= since => {}
                _ => return false,
            }
        }
        true
    }
}

/// Durable store contract consumed by the pipeline components
///
/// Single-row writes are atomic; the pipeline never relies on
/// multi-table transactions.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_node(&self, node: Node) -> Result<(), StoreError>;
    async fn update_node(&self, node: Node) -> Result<(), StoreError>;
    async fn get_node(&self, node_id: &str) -> Result<Option<Node>, StoreError>;
    async fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>, StoreError>;

    async fn insert_reward(&self, reward: Reward) -> Result<(), StoreError>;
    async fn update_reward(&self, reward: Reward) -> Result<(), StoreError>;
    async fn get_reward(&self, reward_id: &str) -> Result<Option<Reward>, StoreError>;
    /// Rewards for one node, newest first, with the pre-pagination total
    async fn rewards_for_node(
        &self,
        node_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Reward>, u64), StoreError>;

    async fn insert_snapshot(&self, snapshot: NetworkStatsSnapshot) -> Result<(), StoreError>;
    /// Snapshots recorded at or after `since`, oldest first
    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<NetworkStatsSnapshot>, StoreError>;

    /// Subscribe to the change stream
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Ephemeral in-memory store
pub struct MemStore {
    nodes: RwLock<HashMap<String, Node>>,
    rewards: RwLock<HashMap<String, Reward>>,
    snapshots: RwLock<Vec<NetworkStatsSnapshot>>,
    changes: broadcast::Sender<StoreEvent>,
}

impl MemStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            nodes: RwLock::new(HashMap::new()),
            rewards: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(Vec::new()),
            changes,
        }
    }

    fn publish(&self, event: StoreEvent) {
        // Fire-and-forget; no subscribers is fine
        let _ = self.changes.send(event);
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_node(&self, node: Node) -> Result<(), StoreError> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.node_id) {
            return Err(StoreError::AlreadyExists(node.node_id));
        }
        nodes.insert(node.node_id.clone(), node.clone());
        drop(nodes);

        self.publish(StoreEvent::NodeInserted(node));
        Ok(())
    }

    async fn update_node(&self, node: Node) -> Result<(), StoreError> {
        let mut nodes = self.nodes.write().await;
        let old = nodes
            .get(&node.node_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(node.node_id.clone()))?;
        nodes.insert(node.node_id.clone(), node.clone());
        drop(nodes);

        self.publish(StoreEvent::NodeUpdated {
            old: Box::new(old),
            new: Box::new(node),
        });
        Ok(())
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<Node>, StoreError> {
        Ok(self.nodes.read().await.get(node_id).cloned())
    }

    async fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>, StoreError> {
        let nodes = self.nodes.read().await;
        let mut out: Vec<Node> = nodes.values().filter(|n| filter.matches(n)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn insert_reward(&self, reward: Reward) -> Result<(), StoreError> {
        let mut rewards = self.rewards.write().await;
        if rewards.contains_key(&reward.reward_id) {
            return Err(StoreError::AlreadyExists(reward.reward_id));
        }
        rewards.insert(reward.reward_id.clone(), reward.clone());
        drop(rewards);

        self.publish(StoreEvent::RewardInserted(reward));
        Ok(())
    }

    async fn update_reward(&self, reward: Reward) -> Result<(), StoreError> {
        let mut rewards = self.rewards.write().await;
        let old = rewards
            .get(&reward.reward_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reward.reward_id.clone()))?;
        rewards.insert(reward.reward_id.clone(), reward.clone());
        drop(rewards);

        self.publish(StoreEvent::RewardUpdated {
            old: Box::new(old),
            new: Box::new(reward),
        });
        Ok(())
    }

    async fn get_reward(&self, reward_id: &str) -> Result<Option<Reward>, StoreError> {
        Ok(self.rewards.read().await.get(reward_id).cloned())
    }

    async fn rewards_for_node(
        &self,
        node_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Reward>, u64), StoreError> {
        let rewards = self.rewards.read().await;
        let mut matching: Vec<Reward> = rewards
            .values()
            .filter(|r| r.node_id == node_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let page = matching.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn insert_snapshot(&self, snapshot: NetworkStatsSnapshot) -> Result<(), StoreError> {
        self.snapshots.write().await.push(snapshot.clone());
        self.publish(StoreEvent::SnapshotInserted(snapshot));
        Ok(())
    }

    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<NetworkStatsSnapshot>, StoreError> {
        let snapshots = self.snapshots.read().await;
        let mut out: Vec<NetworkStatsSnapshot> = snapshots
            .iter()
            .filter(|s| s.recorded_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(out)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.changes.subscribe()
    }
}

// ---------------------------------------------------------------------------
// RocksDB backend
// ---------------------------------------------------------------------------

const NODE_PREFIX: &str = "node/";
const REWARD_PREFIX: &str = "reward/";
const STATS_PREFIX: &str = "stats/";

/// RocksDB-backed persistent store
///
/// Rows are serde_json values under prefixed keys. Snapshot keys embed
/// a zero-padded millisecond timestamp so prefix iteration yields them
/// in chronological order.
pub struct RocksStore {
    db: Arc<DB>,
    changes: broadcast::Sender<StoreEvent>,
}

impl RocksStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Point lookups by row key dominate the workload
        opts.optimize_for_point_lookup(64);
        opts.set_enable_pipelined_write(true);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_max_background_jobs(2);

        let db = DB::open(&opts, path.as_ref())?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        info!("Opened RocksDB store at {:?}", path.as_ref());
        Ok(Self {
            db: Arc::new(db),
            changes,
        })
    }

    fn publish(&self, event: StoreEvent) {
        let _ = self.changes.send(event);
    }

    async fn put_row(
        &self,
        key: String,
        value: Vec<u8>,
        expect_existing: Option<bool>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let old = db.get(&key)?;
            match expect_existing {
                Some(true) if old.is_none() => return Err(StoreError::NotFound(key)),
                Some(false) if old.is_some() => return Err(StoreError::AlreadyExists(key)),
                _ => {}
            }
            db.put(&key, &value)?;
            Ok(old)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn get_row(&self, key: String) -> Result<Option<Vec<u8>>, StoreError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.get(&key).map_err(StoreError::from))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn scan_prefix(&self, prefix: &'static str) -> Result<Vec<Vec<u8>>, StoreError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut rows = Vec::new();
            let iter = db.iterator(rocksdb::IteratorMode::From(
                prefix.as_bytes(),
                rocksdb::Direction::Forward,
            ));
            for item in iter {
                let (key, value) = item?;
                if !key.starts_with(prefix.as_bytes()) {
                    break;
                }
                rows.push(value.to_vec());
            }
            Ok(rows)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?
    }
}

fn node_key(node_id: &str) -> String {
    format!("{}{}", NODE_PREFIX, node_id)
}

fn reward_key(reward_id: &str) -> String {
    format!("{}{}", REWARD_PREFIX, reward_id)
}

fn stats_key(snapshot: &NetworkStatsSnapshot) -> String {
    format!(
        "{}{:020}/{}",
        STATS_PREFIX,
        snapshot.recorded_at.timestamp_millis(),
        snapshot.snapshot_id
    )
}

#[async_trait]
impl Store for RocksStore {
    async fn insert_node(&self, node: Node) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&node)?;
        self.put_row(node_key(&node.node_id), value, Some(false)).await?;
        debug!("Inserted node {}", node.node_id);
        self.publish(StoreEvent::NodeInserted(node));
        Ok(())
    }

    async fn update_node(&self, node: Node) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&node)?;
        let old_raw = self
            .put_row(node_key(&node.node_id), value, Some(true))
            .await?
            .ok_or_else(|| StoreError::NotFound(node.node_id.clone()))?;
        let old: Node = serde_json::from_slice(&old_raw)?;

        self.publish(StoreEvent::NodeUpdated {
            old: Box::new(old),
            new: Box::new(node),
        });
        Ok(())
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<Node>, StoreError> {
        match self.get_row(node_key(node_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>, StoreError> {
        let rows = self.scan_prefix(NODE_PREFIX).await?;
        let mut nodes = Vec::with_capacity(rows.len());
        for raw in rows {
            let node: Node = serde_json::from_slice(&raw)?;
            if filter.matches(&node) {
                nodes.push(node);
            }
        }
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(nodes)
    }

    async fn insert_reward(&self, reward: Reward) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&reward)?;
        self.put_row(reward_key(&reward.reward_id), value, Some(false))
            .await?;
        self.publish(StoreEvent::RewardInserted(reward));
        Ok(())
    }

    async fn update_reward(&self, reward: Reward) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&reward)?;
        let old_raw = self
            .put_row(reward_key(&reward.reward_id), value, Some(true))
            .await?
            .ok_or_else(|| StoreError::NotFound(reward.reward_id.clone()))?;
        let old: Reward = serde_json::from_slice(&old_raw)?;

        self.publish(StoreEvent::RewardUpdated {
            old: Box::new(old),
            new: Box::new(reward),
        });
        Ok(())
    }

    async fn get_reward(&self, reward_id: &str) -> Result<Option<Reward>, StoreError> {
        match self.get_row(reward_key(reward_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn rewards_for_node(
        &self,
        node_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Reward>, u64), StoreError> {
        let rows = self.scan_prefix(REWARD_PREFIX).await?;
        let mut matching = Vec::new();
        for raw in rows {
            let reward: Reward = serde_json::from_slice(&raw)?;
            if reward.node_id == node_id {
                matching.push(reward);
            }
        }
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let page = matching.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn insert_snapshot(&self, snapshot: NetworkStatsSnapshot) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&snapshot)?;
        self.put_row(stats_key(&snapshot), value, Some(false)).await?;
        self.publish(StoreEvent::SnapshotInserted(snapshot));
        Ok(())
    }

    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<NetworkStatsSnapshot>, StoreError> {
        // Keys sort chronologically, so the scan is already ordered
        let rows = self.scan_prefix(STATS_PREFIX).await?;
        let mut out = Vec::new();
        for raw in rows {
            let snapshot: NetworkStatsSnapshot = serde_json::from_slice(&raw)?;
            if snapshot.recorded_at >= since {
                out.push(snapshot);
            }
        }
        Ok(out)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.changes.subscribe()
    }
}
