//! OpenMesh Core
//!
//! Node lifecycle, topology and reward pipeline for the OpenMesh
//! community WiFi network.

pub mod api;
pub mod config;
pub mod context;
pub mod events;
pub mod geo;
pub mod ledger;
pub mod metrics;
pub mod registry;
pub mod rewards;
pub mod runtime;
pub mod stats;
pub mod store;
pub mod topology;
pub mod types;

pub use api::create_router;
pub use config::{Config, ConfigError};
pub use context::{AppContext, ContextError};
pub use events::{classify, EventBus, EventBusError, NetworkEvent, UserNotification};
pub use ledger::{
    hardware_fingerprint, GatewayLedger, Ledger, LedgerError, NullLedger, TransactionStatus,
};
pub use metrics::Metrics;
pub use registry::{
    BestEffortOutcome, LedgerHealth, NodeRegistry, RegisterNode, RegistryError, StatusOutcome,
};
pub use rewards::{DistributionOutcome, RewardEngine, RewardError, RewardPolicy};
pub use runtime::{run_node, RuntimeError};
pub use stats::{ActivityReport, CurrentStats, StatsAggregator, StatsError, Timeframe};
pub use store::{
    GeoBounds, MemStore, NodeFilter, RocksStore, Store, StoreError, StoreEvent,
};
pub use types::{
    Connection, Hardware, LedgerCounters, LedgerNodeAccount, NeighborLink, NetworkStatsSnapshot,
    Node, NodeStatus, PerformanceMetrics, Position, Reward, RewardCategory, RewardStatus,
};
