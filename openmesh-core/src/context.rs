//! Application context: explicit service construction and lifecycle
//!
//! One instance per process, built at startup and torn down on
//! shutdown. Services are passed by reference into request handlers;
//! nothing in the pipeline reaches for implicit module state.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::events::{EventBus, EventBusError};
use crate::ledger::{GatewayLedger, Ledger, LedgerError, NullLedger};
use crate::metrics::Metrics;
use crate::registry::NodeRegistry;
use crate::rewards::RewardEngine;
use crate::stats::StatsAggregator;
use crate::store::{MemStore, RocksStore, Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    EventBus(#[from] EventBusError),
}

/// Owns every service for the lifetime of the process
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub ledger: Arc<dyn Ledger>,
    pub registry: Arc<NodeRegistry>,
    pub rewards: Arc<RewardEngine>,
    pub stats: Arc<StatsAggregator>,
    pub events: Arc<EventBus>,
    pub metrics: Metrics,
}

impl AppContext {
    /// Build all services from the configuration and start the event bus
    pub async fn start(config: Config) -> Result<Arc<Self>, ContextError> {
        let store: Arc<dyn Store> = if config.ephemeral {
            info!("Using ephemeral in-memory store");
            Arc::new(MemStore::new())
        } else {
            Arc::new(RocksStore::open(&config.data_dir)?)
        };

        let ledger: Arc<dyn Ledger> = match &config.ledger_url {
            Some(url) => {
                info!("Using ledger gateway at {}", url);
                Arc::new(GatewayLedger::new(
                    url.clone(),
                    Duration::from_secs(config.ledger_timeout_secs),
                )?)
            }
            None => {
                info!("No ledger gateway configured, fabricating signatures locally");
                Arc::new(NullLedger)
            }
        };

        let metrics = Metrics::new();
        let registry = Arc::new(NodeRegistry::new(
            store.clone(),
            ledger.clone(),
            metrics.clone(),
        ));
        let rewards = Arc::new(RewardEngine::new(
            store.clone(),
            ledger.clone(),
            config.reward_policy.clone(),
            metrics.clone(),
        ));
        let stats = Arc::new(StatsAggregator::new(store.clone(), ledger.clone()));

        let events = Arc::new(EventBus::new(metrics.clone()));
        events.start(store.subscribe()).await?;

        Ok(Arc::new(Self {
            config,
            store,
            ledger,
            registry,
            rewards,
            stats,
            events,
            metrics,
        }))
    }

    /// Tear down background work; the store closes on drop
    pub async fn shutdown(&self) {
        self.events.shutdown().await;
        info!("Application context shut down");
    }
}
