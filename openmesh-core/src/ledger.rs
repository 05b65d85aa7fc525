//! External ledger collaborator
//!
//! The chain itself is opaque to this pipeline: all on-chain writes go
//! through a signing gateway sidecar speaking JSON over HTTP, and every
//! call returns an opaque transaction signature. Calls are bounded by a
//! configurable timeout; callers decide per operation whether a failure
//! is fatal (status updates, reward transfers) or merely degrades the
//! response (registration, heartbeats).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use crate::types::{
    Hardware, LedgerCounters, LedgerNodeAccount, NodeStatus, PerformanceMetrics, Position,
};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger call timed out")]
    Timeout,

    #[error("Ledger transport error: {0}")]
    Transport(String),

    #[error("Ledger rejected the call: {0}")]
    Rejected(String),

    #[error("Malformed gateway response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Timeout
        } else {
            LedgerError::Transport(err.to_string())
        }
    }
}

/// Confirmation state of a previously submitted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub fee: Option<u64>,
}

/// Ledger contract consumed by the registry and reward engine
///
/// All calls may fail independently; success returns an opaque
/// transaction signature.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn register_node(
        &self,
        node_id: &str,
        owner_id: &str,
        position: &Position,
        hardware_fingerprint: &str,
    ) -> Result<String, LedgerError>;

    async fn update_node_status(
        &self,
        node_id: &str,
        owner_id: &str,
        status: NodeStatus,
    ) -> Result<String, LedgerError>;

    async fn submit_heartbeat(
        &self,
        node_id: &str,
        owner_id: &str,
        metrics: &PerformanceMetrics,
    ) -> Result<String, LedgerError>;

    async fn get_node_account(&self, node_id: &str)
        -> Result<Option<LedgerNodeAccount>, LedgerError>;

    /// Transfer rewards; `node_ids` and `amounts` are parallel arrays
    async fn distribute_rewards(
        &self,
        node_ids: &[String],
        amounts: &[f64],
    ) -> Result<Vec<String>, LedgerError>;

    async fn get_transaction_status(
        &self,
        signature: &str,
    ) -> Result<TransactionStatus, LedgerError>;

    /// Network-wide counters used by the stats aggregator
    async fn network_counters(&self) -> Result<LedgerCounters, LedgerError>;
}

/// Hardware fingerprint submitted with on-chain registration
pub fn hardware_fingerprint(hardware: &Hardware) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hardware.kind.as_bytes());
    hasher.update(hardware.specs.as_bytes());
    for capability in &hardware.capabilities {
        hasher.update(capability.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ---------------------------------------------------------------------------
// HTTP gateway client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RegisterRequest<'a> {
    node_id: &'a str,
    owner: &'a str,
    lat: f64,
    lng: f64,
    country: &'a str,
    hardware_fingerprint: &'a str,
}

#[derive(Serialize)]
struct StatusRequest<'a> {
    node_id: &'a str,
    owner: &'a str,
    status: NodeStatus,
}

#[derive(Serialize)]
struct HeartbeatRequest<'a> {
    node_id: &'a str,
    owner: &'a str,
    metrics: &'a PerformanceMetrics,
}

#[derive(Serialize)]
struct DistributeRequest<'a> {
    node_ids: &'a [String],
    amounts: &'a [f64],
}

#[derive(Deserialize)]
struct SignatureResponse {
    signature: String,
}

#[derive(Deserialize)]
struct SignaturesResponse {
    signatures: Vec<String>,
}

/// Client for the chain signing gateway
pub struct GatewayLedger {
    base_url: String,
    client: reqwest::Client,
}

impl GatewayLedger {
    /// Build a client with all requests bounded by `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { base_url, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_for_signature<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, LedgerError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("{}: {}", status, detail)));
        }

        let parsed: SignatureResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Response(e.to_string()))?;
        Ok(parsed.signature)
    }
}

#[async_trait]
impl Ledger for GatewayLedger {
    async fn register_node(
        &self,
        node_id: &str,
        owner_id: &str,
        position: &Position,
        hardware_fingerprint: &str,
    ) -> Result<String, LedgerError> {
        let body = RegisterRequest {
            node_id,
            owner: owner_id,
            lat: position.lat,
            lng: position.lng,
            country: &position.country,
            hardware_fingerprint,
        };
        let signature = self.post_for_signature("/v1/nodes/register", &body).await?;
        debug!("Ledger registered node {} ({})", node_id, signature);
        Ok(signature)
    }

    async fn update_node_status(
        &self,
        node_id: &str,
        owner_id: &str,
        status: NodeStatus,
    ) -> Result<String, LedgerError> {
        let body = StatusRequest {
            node_id,
            owner: owner_id,
            status,
        };
        let signature = self.post_for_signature("/v1/nodes/status", &body).await?;
        debug!("Ledger status update for {} -> {} ({})", node_id, status, signature);
        Ok(signature)
    }

    async fn submit_heartbeat(
        &self,
        node_id: &str,
        owner_id: &str,
        metrics: &PerformanceMetrics,
    ) -> Result<String, LedgerError> {
        let body = HeartbeatRequest {
            node_id,
            owner: owner_id,
            metrics,
        };
        self.post_for_signature("/v1/nodes/heartbeat", &body).await
    }

    async fn get_node_account(
        &self,
        node_id: &str,
    ) -> Result<Option<LedgerNodeAccount>, LedgerError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/accounts/{}", node_id)))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LedgerError::Rejected(response.status().to_string()));
        }

        let account = response
            .json()
            .await
            .map_err(|e| LedgerError::Response(e.to_string()))?;
        Ok(Some(account))
    }

    async fn distribute_rewards(
        &self,
        node_ids: &[String],
        amounts: &[f64],
    ) -> Result<Vec<String>, LedgerError> {
        if node_ids.len() != amounts.len() {
            return Err(LedgerError::Rejected(
                "node_ids and amounts must have the same length".to_string(),
            ));
        }

        let body = DistributeRequest { node_ids, amounts };
        let response = self
            .client
            .post(self.url("/v1/rewards/distribute"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("{}: {}", status, detail)));
        }

        let parsed: SignaturesResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Response(e.to_string()))?;
        Ok(parsed.signatures)
    }

    async fn get_transaction_status(
        &self,
        signature: &str,
    ) -> Result<TransactionStatus, LedgerError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/transactions/{}", signature)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LedgerError::Rejected(response.status().to_string()));
        }

        response
            .json()
            .await
            .map_err(|e| LedgerError::Response(e.to_string()))
    }

    async fn network_counters(&self) -> Result<LedgerCounters, LedgerError> {
        let response = self.client.get(self.url("/v1/network")).send().await?;

        if !response.status().is_success() {
            return Err(LedgerError::Rejected(response.status().to_string()));
        }

        response
            .json()
            .await
            .map_err(|e| LedgerError::Response(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Local dev ledger
// ---------------------------------------------------------------------------

/// Ledger stand-in for running without a gateway
///
/// Fabricates signatures locally and never fails. Selected when no
/// `ledger_url` is configured; also convenient in tests.
pub struct NullLedger;

impl NullLedger {
    fn fabricate_signature(prefix: &str) -> String {
        format!("{}-{:016x}", prefix, rand::random::<u64>())
    }
}

#[async_trait]
impl Ledger for NullLedger {
    async fn register_node(
        &self,
        _node_id: &str,
        _owner_id: &str,
        _position: &Position,
        _hardware_fingerprint: &str,
    ) -> Result<String, LedgerError> {
        Ok(Self::fabricate_signature("register"))
    }

    async fn update_node_status(
        &self,
        _node_id: &str,
        _owner_id: &str,
        _status: NodeStatus,
    ) -> Result<String, LedgerError> {
        Ok(Self::fabricate_signature("status"))
    }

    async fn submit_heartbeat(
        &self,
        _node_id: &str,
        _owner_id: &str,
        _metrics: &PerformanceMetrics,
    ) -> Result<String, LedgerError> {
        Ok(Self::fabricate_signature("heartbeat"))
    }

    async fn get_node_account(
        &self,
        _node_id: &str,
    ) -> Result<Option<LedgerNodeAccount>, LedgerError> {
        Ok(None)
    }

    async fn distribute_rewards(
        &self,
        node_ids: &[String],
        amounts: &[f64],
    ) -> Result<Vec<String>, LedgerError> {
        if node_ids.len() != amounts.len() {
            return Err(LedgerError::Rejected(
                "node_ids and amounts must have the same length".to_string(),
            ));
        }
        Ok(node_ids
            .iter()
            .map(|_| Self::fabricate_signature("transfer"))
            .collect())
    }

    async fn get_transaction_status(
        &self,
        _signature: &str,
    ) -> Result<TransactionStatus, LedgerError> {
        Ok(TransactionStatus {
            confirmed: true,
            block_height: Some(0),
            fee: Some(0),
        })
    }

    async fn network_counters(&self) -> Result<LedgerCounters, LedgerError> {
        Ok(LedgerCounters::default())
    }
}
