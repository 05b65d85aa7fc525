//! Node registry: registration, heartbeats, status transitions
//!
//! Two failure-tolerance policies live side by side here on purpose.
//! Heartbeats are frequent and must never block on ledger latency, so
//! the local write commits first and the ledger call is best-effort.
//! Status changes are rare and feed reward eligibility, so the ledger
//! call is a gate: if it fails, the local status does not move. Do not
//! unify these paths behind a shared helper.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::geo::is_valid_coordinate;
use crate::ledger::{hardware_fingerprint, Ledger, LedgerError};
use crate::metrics::Metrics;
use crate::store::{NodeFilter, Store, StoreError};
use crate::types::{Hardware, Node, NodeStatus, PerformanceMetrics, Position};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Covers both a missing node and a caller that does not own it,
    /// so existence of another user's node is never leaked
    #[error("Node not found or unauthorized")]
    NotFoundOrUnauthorized,

    #[error("Ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of the best-effort ledger leg of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerHealth {
    Ok,
    Degraded,
}

/// Registration input
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegisterNode {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub position: Position,
    pub hardware: Hardware,
}

/// Result of an operation whose ledger leg is best-effort
#[derive(Debug, Clone)]
pub struct BestEffortOutcome {
    pub node: Node,
    pub signature: Option<String>,
    pub ledger: LedgerHealth,
}

/// Result of a ledger-gated status update
#[derive(Debug, Clone)]
pub struct StatusOutcome {
    pub node: Node,
    /// Absent when the requested status equals the current one
    pub signature: Option<String>,
}

/// Owns node records and all status transitions
pub struct NodeRegistry {
    store: Arc<dyn Store>,
    ledger: Arc<dyn Ledger>,
    metrics: Metrics,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<dyn Ledger>, metrics: Metrics) -> Self {
        Self {
            store,
            ledger,
            metrics,
        }
    }

    /// Register a new node for `owner_id`
    ///
    /// The database write commits regardless of the ledger outcome; a
    /// failed on-chain registration is reported as `Degraded`, not as
    /// an error.
    pub async fn register(
        &self,
        owner_id: &str,
        req: RegisterNode,
    ) -> Result<BestEffortOutcome, RegistryError> {
        validate_registration(&req)?;
        if owner_id.trim().is_empty() {
            return Err(RegistryError::Validation("owner id must not be empty".into()));
        }

        let now = Utc::now();
        let node = Node {
            node_id: generate_node_id(),
            owner_id: owner_id.to_string(),
            name: req.name,
            description: req.description,
            position: req.position,
            hardware: req.hardware,
            status: NodeStatus::Inactive,
            metrics: PerformanceMetrics::default(),
            created_at: now,
            updated_at: now,
            last_heartbeat: None,
        };

        self.store.insert_node(node.clone()).await?;
        self.metrics.node_registered();
        info!("Registered node {} for owner {}", node.node_id, owner_id);

        let fingerprint = hardware_fingerprint(&node.hardware);
        let (signature, ledger) = match self
            .ledger
            .register_node(&node.node_id, owner_id, &node.position, &fingerprint)
            .await
        {
            Ok(signature) => (Some(signature), LedgerHealth::Ok),
            Err(e) => {
                self.metrics.ledger_failure();
                warn!("Ledger registration failed for {}: {}", node.node_id, e);
                (None, LedgerHealth::Degraded)
            }
        };

        Ok(BestEffortOutcome {
            node,
            signature,
            ledger,
        })
    }

    /// Ingest a heartbeat for a node owned by `caller`
    ///
    /// Metrics are replaced wholesale, `last_heartbeat` never moves
    /// backwards, and an `inactive` node is promoted to `active`. The
    /// local write is authoritative; the ledger call afterwards is
    /// best-effort.
    pub async fn submit_heartbeat(
        &self,
        node_id: &str,
        caller: &str,
        metrics: PerformanceMetrics,
    ) -> Result<BestEffortOutcome, RegistryError> {
        let node = self.owned_node(node_id, caller).await?;
        validate_metrics(&metrics)?;

        let now = Utc::now();
        let mut updated = node;
        updated.metrics = metrics;
        updated.last_heartbeat = Some(match updated.last_heartbeat {
            Some(previous) if previous > now => previous,
            _ => now,
        });
        if updated.status == NodeStatus::Inactive {
            updated.status = NodeStatus::Active;
        }
        updated.updated_at = now;

        self.store.update_node(updated.clone()).await?;
        self.metrics.heartbeat_received();

        let (signature, ledger) = match self
            .ledger
            .submit_heartbeat(node_id, caller, &updated.metrics)
            .await
        {
            Ok(signature) => (Some(signature), LedgerHealth::Ok),
            Err(e) => {
                self.metrics.ledger_failure();
                warn!("Ledger heartbeat failed for {}: {}", node_id, e);
                (None, LedgerHealth::Degraded)
            }
        };

        Ok(BestEffortOutcome {
            node: updated,
            signature,
            ledger,
        })
    }

    /// Transition a node to `new_status`
    ///
    /// Ledger-gated: the on-chain update must confirm before the local
    /// record moves. A ledger failure (including timeout) leaves the
    /// stored status untouched and surfaces as `LedgerUnavailable`.
    pub async fn update_status(
        &self,
        node_id: &str,
        caller: &str,
        new_status: NodeStatus,
    ) -> Result<StatusOutcome, RegistryError> {
        let node = self.owned_node(node_id, caller).await?;

        if node.status == new_status {
            return Ok(StatusOutcome {
                node,
                signature: None,
            });
        }

        let signature = self
            .ledger
            .update_node_status(node_id, caller, new_status)
            .await
            .map_err(|e| {
                self.metrics.ledger_failure();
                warn!(
                    "Ledger refused status change {} -> {} for {}: {}",
                    node.status, new_status, node_id, e
                );
                RegistryError::Ledger(e)
            })?;

        let mut updated = node;
        let old_status = updated.status;
        updated.status = new_status;
        updated.updated_at = Utc::now();
        self.store.update_node(updated.clone()).await?;
        self.metrics.status_changed();

        info!(
            "Node {} status {} -> {} ({})",
            node_id, old_status, new_status, signature
        );
        Ok(StatusOutcome {
            node: updated,
            signature: Some(signature),
        })
    }

    /// Soft delete: set the node `inactive`
    pub async fn deactivate(
        &self,
        node_id: &str,
        caller: &str,
    ) -> Result<StatusOutcome, RegistryError> {
        self.update_status(node_id, caller, NodeStatus::Inactive).await
    }

    /// Fetch one node; absent maps to `NotFoundOrUnauthorized`
    pub async fn get(&self, node_id: &str) -> Result<Node, RegistryError> {
        self.store
            .get_node(node_id)
            .await?
            .ok_or(RegistryError::NotFoundOrUnauthorized)
    }

    /// List nodes matching `filter`, with offset/limit pagination
    pub async fn list(
        &self,
        filter: NodeFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Node>, u64), RegistryError> {
        let nodes = self.store.list_nodes(filter).await?;
        let total = nodes.len() as u64;
        let page = nodes.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    /// Fetch a node and verify ownership in one step
    ///
    /// Performed before any write or external call so unauthorized
    /// requests leave no trace.
    async fn owned_node(&self, node_id: &str, caller: &str) -> Result<Node, RegistryError> {
        match self.store.get_node(node_id).await? {
            Some(node) if node.owner_id == caller => Ok(node),
            _ => Err(RegistryError::NotFoundOrUnauthorized),
        }
    }
}

fn generate_node_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("node_{}_{}", Utc::now().timestamp_millis(), suffix)
}

fn validate_registration(req: &RegisterNode) -> Result<(), RegistryError> {
    if req.name.trim().is_empty() {
        return Err(RegistryError::Validation("name must not be empty".into()));
    }
    if !is_valid_coordinate(req.position.lat, req.position.lng) {
        return Err(RegistryError::Validation(format!(
            "invalid coordinates: ({}, {})",
            req.position.lat, req.position.lng
        )));
    }
    if req.hardware.kind.trim().is_empty() {
        return Err(RegistryError::Validation(
            "hardware descriptor must not be empty".into(),
        ));
    }
    Ok(())
}

fn validate_metrics(metrics: &PerformanceMetrics) -> Result<(), RegistryError> {
    if let Some(uptime) = metrics.uptime_percentage {
        if !(0.0..=100.0).contains(&uptime) {
            return Err(RegistryError::Validation(format!(
                "uptime_percentage out of range: {}",
                uptime
            )));
        }
    }
    if let Some(score) = metrics.reliability_score {
        if !(0.0..=100.0).contains(&score) {
            return Err(RegistryError::Validation(format!(
                "reliability_score out of range: {}",
                score
            )));
        }
    }
    if let Some(rt) = metrics.avg_response_time_ms {
        if !rt.is_finite() || rt < 0.0 {
            return Err(RegistryError::Validation(format!(
                "avg_response_time_ms out of range: {}",
                rt
            )));
        }
    }
    Ok(())
}
