//! Event fan-out for live network viewers
//!
//! A single dispatcher per process consumes the store's change stream,
//! classifies each mutation, and republishes it on per-entity broadcast
//! channels plus a general all-updates channel. Delivery is
//! fire-and-forget: best-effort at-most-once per subscriber, per-channel
//! FIFO, and a lagging subscriber drops messages rather than applying
//! backpressure to the pipeline.

use serde::Serialize;
use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::store::StoreEvent;
use crate::types::{NetworkStatsSnapshot, Node, NodeStatus, PerformanceMetrics, Reward};

/// Capacity of each fan-out channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is already running")]
    AlreadyRunning,
}

/// Classified network event delivered to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkEvent {
    NodeCreated {
        node: Node,
    },
    NodeStatusChanged {
        node: Node,
        old_status: NodeStatus,
        new_status: NodeStatus,
    },
    NodePerformanceUpdated {
        node: Node,
        metrics: PerformanceMetrics,
    },
    NodeDeleted {
        node: Node,
    },
    RewardCreated {
        reward: Reward,
    },
    RewardDistributed {
        reward: Reward,
    },
    StatsUpdated {
        snapshot: NetworkStatsSnapshot,
    },
}

impl NetworkEvent {
    fn is_node_event(&self) -> bool {
        matches!(
            self,
            NetworkEvent::NodeCreated { .. }
                | NetworkEvent::NodeStatusChanged { .. }
                | NetworkEvent::NodePerformanceUpdated { .. }
                | NetworkEvent::NodeDeleted { .. }
        )
    }

    fn is_reward_event(&self) -> bool {
        matches!(
            self,
            NetworkEvent::RewardCreated { .. } | NetworkEvent::RewardDistributed { .. }
        )
    }
}

/// Direct notification addressed to one user's channel
#[derive(Debug, Clone, Serialize)]
pub struct UserNotification {
    pub user_id: String,
    pub payload: serde_json::Value,
}

/// Classify one store mutation into zero or more network events
///
/// A single write that changes both status and metrics produces two
/// separate events, so status-only consumers never see performance
/// noise. A reward update emits only on the transition into
/// `distributed`; failures and no-op rewrites stay silent.
pub fn classify(event: StoreEvent) -> Vec<NetworkEvent> {
    match event {
        StoreEvent::NodeInserted(node) => vec![NetworkEvent::NodeCreated { node }],
        StoreEvent::NodeUpdated { old, new } => {
            let mut events = Vec::new();
            if old.status != new.status {
                events.push(NetworkEvent::NodeStatusChanged {
                    node: (*new).clone(),
                    old_status: old.status,
                    new_status: new.status,
                });
            }
            if old.metrics != new.metrics {
                events.push(NetworkEvent::NodePerformanceUpdated {
                    metrics: new.metrics.clone(),
                    node: *new,
                });
            }
            events
        }
        StoreEvent::NodeDeleted(node) => vec![NetworkEvent::NodeDeleted { node }],
        StoreEvent::RewardInserted(reward) => vec![NetworkEvent::RewardCreated { reward }],
        StoreEvent::RewardUpdated { old, new } => {
            if old.status != new.status && new.status == crate::types::RewardStatus::Distributed {
                vec![NetworkEvent::RewardDistributed { reward: *new }]
            } else {
                vec![]
            }
        }
        StoreEvent::SnapshotInserted(snapshot) => vec![NetworkEvent::StatsUpdated { snapshot }],
    }
}

/// Process-wide event dispatcher
///
/// Constructed once at startup, started with the store's change stream,
/// torn down on shutdown. No lazy global state: the application context
/// owns the instance and hands out references.
pub struct EventBus {
    nodes_tx: broadcast::Sender<NetworkEvent>,
    rewards_tx: broadcast::Sender<NetworkEvent>,
    stats_tx: broadcast::Sender<NetworkEvent>,
    all_tx: broadcast::Sender<NetworkEvent>,
    user_channels: RwLock<HashMap<String, broadcast::Sender<UserNotification>>>,
    pump: RwLock<Option<JoinHandle<()>>>,
    metrics: Metrics,
}

impl EventBus {
    pub fn new(metrics: Metrics) -> Self {
        let (nodes_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (rewards_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stats_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (all_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            nodes_tx,
            rewards_tx,
            stats_tx,
            all_tx,
            user_channels: RwLock::new(HashMap::new()),
            pump: RwLock::new(None),
            metrics,
        }
    }

    /// Start pumping the store change stream into the fan-out channels
    pub async fn start(
        &self,
        mut changes: broadcast::Receiver<StoreEvent>,
    ) -> Result<(), EventBusError> {
        let mut pump = self.pump.write().await;
        if pump.is_some() {
            return Err(EventBusError::AlreadyRunning);
        }

        let nodes_tx = self.nodes_tx.clone();
        let rewards_tx = self.rewards_tx.clone();
        let stats_tx = self.stats_tx.clone();
        let all_tx = self.all_tx.clone();
        let metrics = self.metrics.clone();

        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        for event in classify(change) {
                            let channel = if event.is_node_event() {
                                &nodes_tx
                            } else if event.is_reward_event() {
                                &rewards_tx
                            } else {
                                &stats_tx
                            };
                            // No subscribers is not an error
                            let _ = channel.send(event.clone());
                            let _ = all_tx.send(event);
                            metrics.event_published();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event bus lagged behind the change stream, skipped {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Store change stream closed, stopping event pump");
                        break;
                    }
                }
            }
        });

        *pump = Some(handle);
        info!("Event bus started");
        Ok(())
    }

    /// Stop the pump and close all subscriptions
    pub async fn shutdown(&self) {
        if let Some(handle) = self.pump.write().await.take() {
            handle.abort();
        }
        self.user_channels.write().await.clear();
        info!("Event bus stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.pump.read().await.is_some()
    }

    /// Node lifecycle and performance events
    pub fn subscribe_nodes(&self) -> broadcast::Receiver<NetworkEvent> {
        self.nodes_tx.subscribe()
    }

    /// Reward creation and settlement events
    pub fn subscribe_rewards(&self) -> broadcast::Receiver<NetworkEvent> {
        self.rewards_tx.subscribe()
    }

    /// Stats snapshot insertions
    pub fn subscribe_stats(&self) -> broadcast::Receiver<NetworkEvent> {
        self.stats_tx.subscribe()
    }

    /// Every event, regardless of entity
    pub fn subscribe_all(&self) -> broadcast::Receiver<NetworkEvent> {
        self.all_tx.subscribe()
    }

    /// Subscribe to one user's direct notification channel
    pub async fn subscribe_user(&self, user_id: &str) -> broadcast::Receiver<UserNotification> {
        self.user_sender(user_id).await.subscribe()
    }

    /// Send a direct notification to one user's channel
    ///
    /// Fire-and-forget: consumed by the external notification layer,
    /// no delivery guarantee.
    pub async fn notify_user(&self, user_id: &str, payload: serde_json::Value) {
        let sender = self.user_sender(user_id).await;
        let notification = UserNotification {
            user_id: user_id.to_string(),
            payload,
        };
        if sender.send(notification).is_ok() {
            self.metrics.event_published();
        }
        debug!("User notification queued for {}", user_id);
    }

    async fn user_sender(&self, user_id: &str) -> broadcast::Sender<UserNotification> {
        if let Some(sender) = self.user_channels.read().await.get(user_id) {
            return sender.clone();
        }
        let mut channels = self.user_channels.write().await;
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, Store};
    use crate::types::{Hardware, Position, RewardCategory, RewardStatus};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sample_node(node_id: &str) -> Node {
        let now = Utc::now();
        Node {
            node_id: node_id.to_string(),
            owner_id: "owner-1".to_string(),
            name: "Test AP".to_string(),
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
            status: NodeStatus::Inactive,
            metrics: PerformanceMetrics::default(),
            created_at: now,
            updated_at: now,
            last_heartbeat: None,
        }
    }

    fn sample_reward(status: RewardStatus) -> Reward {
        let now = Utc::now();
        Reward {
            reward_id: "reward-1".to_string(),
            node_id: "node-1".to_string(),
            owner_id: "owner-1".to_string(),
            amount: 10.0,
            category: RewardCategory::Coverage,
            status,
            signature: None,
            period_start: now,
            period_end: now,
            created_at: now,
        }
    }

    #[test]
    fn test_classify_insert_and_delete() {
        let node = sample_node("node-1");
        let events = classify(StoreEvent::NodeInserted(node.clone()));
        assert!(matches!(events.as_slice(), [NetworkEvent::NodeCreated { .. }]));

        let events = classify(StoreEvent::NodeDeleted(node));
        assert!(matches!(events.as_slice(), [NetworkEvent::NodeDeleted { .. }]));
    }

    #[test]
    fn test_classify_combined_update_emits_two_events() {
        let old = sample_node("node-1");
        let mut new = old.clone();
        new.status = NodeStatus::Active;
        new.metrics.uptime_percentage = Some(99.0);

        let events = classify(StoreEvent::NodeUpdated {
            old: Box::new(old),
            new: Box::new(new),
        });
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], NetworkEvent::NodeStatusChanged { .. }));
        assert!(matches!(events[1], NetworkEvent::NodePerformanceUpdated { .. }));
    }

    #[test]
    fn test_classify_touch_update_is_silent() {
        let old = sample_node("node-1");
        let mut new = old.clone();
        new.updated_at = Utc::now();

        let events = classify(StoreEvent::NodeUpdated {
            old: Box::new(old),
            new: Box::new(new),
        });
        assert!(events.is_empty());
    }

    #[test]
    fn test_classify_reward_distributed_only() {
        // pending -> distributed fires
        let old = sample_reward(RewardStatus::Pending);
        let mut new = old.clone();
        new.status = RewardStatus::Distributed;
        let events = classify(StoreEvent::RewardUpdated {
            old: Box::new(old.clone()),
            new: Box::new(new),
        });
        assert!(matches!(events.as_slice(), [NetworkEvent::RewardDistributed { .. }]));

        // pending -> failed stays silent
        let mut failed = old.clone();
        failed.status = RewardStatus::Failed;
        let events = classify(StoreEvent::RewardUpdated {
            old: Box::new(old.clone()),
            new: Box::new(failed),
        });
        assert!(events.is_empty());

        // rewrite without a status change stays silent
        let events = classify(StoreEvent::RewardUpdated {
            old: Box::new(old.clone()),
            new: Box::new(old),
        });
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_pump_routes_store_changes() {
        let store = MemStore::new();
        let bus = EventBus::new(Metrics::new());
        bus.start(store.subscribe()).await.unwrap();

        let mut nodes_rx = bus.subscribe_nodes();
        let mut all_rx = bus.subscribe_all();

        let node = sample_node("node-1");
        store.insert_node(node.clone()).await.unwrap();

        let event = timeout(Duration::from_secs(1), nodes_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, NetworkEvent::NodeCreated { .. }));

        let event = timeout(Duration::from_secs(1), all_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, NetworkEvent::NodeCreated { .. }));

        bus.shutdown().await;
        assert!(!bus.is_running().await);
    }

    #[tokio::test]
    async fn test_pump_separates_status_and_performance() {
        let store = MemStore::new();
        let bus = EventBus::new(Metrics::new());
        bus.start(store.subscribe()).await.unwrap();

        let mut nodes_rx = bus.subscribe_nodes();

        let node = sample_node("node-1");
        store.insert_node(node.clone()).await.unwrap();

        let mut updated = node;
        updated.status = NodeStatus::Active;
        updated.metrics.users_served = Some(4);
        store.update_node(updated).await.unwrap();

        // created, then the two split events from the single write
        let first = timeout(Duration::from_secs(1), nodes_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, NetworkEvent::NodeCreated { .. }));
        let second = timeout(Duration::from_secs(1), nodes_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(second, NetworkEvent::NodeStatusChanged { .. }));
        let third = timeout(Duration::from_secs(1), nodes_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(third, NetworkEvent::NodePerformanceUpdated { .. }));

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let store = MemStore::new();
        let bus = EventBus::new(Metrics::new());
        bus.start(store.subscribe()).await.unwrap();

        let result = bus.start(store.subscribe()).await;
        assert!(matches!(result, Err(EventBusError::AlreadyRunning)));
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_notify_user_targets_one_channel() {
        let bus = EventBus::new(Metrics::new());

        let mut alice_rx = bus.subscribe_user("alice").await;
        let mut bob_rx = bus.subscribe_user("bob").await;

        bus.notify_user("alice", serde_json::json!({ "kind": "reward", "amount": 5 }))
            .await;

        let notification = timeout(Duration::from_secs(1), alice_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.user_id, "alice");
        assert_eq!(notification.payload["amount"], 5);

        // Bob's channel stays empty
        assert!(timeout(Duration::from_millis(50), bob_rx.recv()).await.is_err());
    }
}
