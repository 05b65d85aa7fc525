//! Reward computation and distribution
//!
//! Converts accumulated performance metrics into token amounts and
//! drives batch settlement through the ledger. The engine orchestrates
//! only: it does not retry failed transfers (a later batch run picks
//! them up) and it never sends a malformed reward to the ledger.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::ledger::{Ledger, LedgerError};
use crate::metrics::Metrics;
use crate::store::{NodeFilter, Store, StoreError};
use crate::types::{Node, NodeStatus, PerformanceMetrics, Reward, RewardCategory, RewardStatus};

const GIB: f64 = (1u64 << 30) as f64;

#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    #[error("Invalid reward: {0}")]
    Validation(String),

    #[error("Ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reward formula parameters
///
/// The defaults reproduce the historical formula exactly and must stay
/// byte-compatible with it: swap the policy, not the arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardPolicy {
    /// Base amount, scaled by uptime percentage
    pub base: f64,
    /// Tokens per GiB transferred
    pub per_gib: f64,
    /// Tokens per user served
    pub per_user: f64,
    /// Flat bonus when reliability exceeds the threshold
    pub reliability_bonus: f64,
    pub reliability_threshold: f64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            base: 100.0,
            per_gib: 1.0,
            per_user: 10.0,
            reliability_bonus: 50.0,
            reliability_threshold: 95.0,
        }
    }
}

impl RewardPolicy {
    /// Reward amount for one period of metrics, floored at zero
    ///
    /// Absent fields contribute nothing; in particular a node that has
    /// never reported uptime earns no base amount.
    pub fn calculate(&self, metrics: &PerformanceMetrics) -> f64 {
        let uptime = metrics.uptime_percentage.unwrap_or(0.0);
        let mut amount = self.base * (uptime / 100.0);

        amount += metrics.bytes_transferred.unwrap_or(0) as f64 / GIB * self.per_gib;
        amount += metrics.users_served.unwrap_or(0) as f64 * self.per_user;

        if metrics.reliability_score.unwrap_or(0.0) > self.reliability_threshold {
            amount += self.reliability_bonus;
        }

        amount.max(0.0)
    }

    /// Category label for a cycle-generated reward: the dominant
    /// formula component wins
    pub fn dominant_category(&self, metrics: &PerformanceMetrics) -> RewardCategory {
        if metrics.reliability_score.unwrap_or(0.0) > self.reliability_threshold {
            return RewardCategory::Reliability;
        }
        let uptime_component = self.base * metrics.uptime_percentage.unwrap_or(0.0) / 100.0;
        let traffic_component = metrics.bytes_transferred.unwrap_or(0) as f64 / GIB * self.per_gib
            + metrics.users_served.unwrap_or(0) as f64 * self.per_user;
        if traffic_component > uptime_component {
            RewardCategory::Traffic
        } else {
            RewardCategory::Coverage
        }
    }
}

/// Per-reward result of a distribution batch
#[derive(Debug, Clone, Serialize)]
pub struct DistributionOutcome {
    pub reward_id: String,
    pub node_id: String,
    pub status: RewardStatus,
    pub signature: Option<String>,
    pub error: Option<String>,
}

/// Computes reward amounts and settles them through the ledger
pub struct RewardEngine {
    store: Arc<dyn Store>,
    ledger: Arc<dyn Ledger>,
    policy: RewardPolicy,
    metrics: Metrics,
}

impl RewardEngine {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn Ledger>,
        policy: RewardPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            ledger,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &RewardPolicy {
        &self.policy
    }

    /// Create a pending reward for a node
    pub async fn create_pending(
        &self,
        node: &Node,
        amount: f64,
        category: RewardCategory,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Reward, RewardError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(RewardError::Validation(format!(
                "amount must be non-negative, got {}",
                amount
            )));
        }
        if period_end < period_start {
            return Err(RewardError::Validation(
                "period_end precedes period_start".into(),
            ));
        }

        let reward = Reward {
            reward_id: generate_reward_id(),
            node_id: node.node_id.clone(),
            owner_id: node.owner_id.clone(),
            amount,
            category,
            status: RewardStatus::Pending,
            signature: None,
            period_start,
            period_end,
            created_at: Utc::now(),
        };

        self.store.insert_reward(reward.clone()).await?;
        self.metrics.reward_created();
        Ok(reward)
    }

    /// Settle a batch of rewards through the ledger
    ///
    /// Rewards are processed one at a time with respect to the ledger
    /// (it is capacity-constrained), and one failure never aborts the
    /// rest of the batch. After the batch completes no reward in it is
    /// left `pending`: every item ends `distributed` or `failed`.
    /// Already-terminal rewards are reported as-is and never re-sent.
    pub async fn distribute_batch(
        &self,
        rewards: Vec<Reward>,
    ) -> Result<Vec<DistributionOutcome>, RewardError> {
        let mut outcomes = Vec::with_capacity(rewards.len());

        for reward in rewards {
            if reward.status.is_terminal() {
                outcomes.push(DistributionOutcome {
                    reward_id: reward.reward_id.clone(),
                    node_id: reward.node_id.clone(),
                    status: reward.status,
                    signature: reward.signature.clone(),
                    error: Some("already settled".to_string()),
                });
                continue;
            }

            // Local validation failures never reach the ledger
            if let Err(reason) = self.validate_for_transfer(&reward).await? {
                outcomes.push(self.mark_failed(reward, reason).await?);
                continue;
            }

            let node_ids = [reward.node_id.clone()];
            let amounts = [reward.amount];
            match self.ledger.distribute_rewards(&node_ids, &amounts).await {
                Ok(signatures) => match signatures.into_iter().next() {
                    Some(signature) => {
                        outcomes.push(self.mark_distributed(reward, signature).await?);
                    }
                    None => {
                        outcomes.push(
                            self.mark_failed(reward, "ledger returned no signature".to_string())
                                .await?,
                        );
                    }
                },
                Err(e) => {
                    self.metrics.ledger_failure();
                    warn!("Reward transfer failed for {}: {}", reward.reward_id, e);
                    outcomes.push(self.mark_failed(reward, e.to_string()).await?);
                }
            }
        }

        Ok(outcomes)
    }

    /// One full reward period: compute, create pending rewards for all
    /// active nodes with reported metrics, then distribute the batch
    pub async fn run_reward_cycle(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<DistributionOutcome>, RewardError> {
        let filter = NodeFilter {
            status: Some(NodeStatus::Active),
            ..Default::default()
        };
        let nodes = self.store.list_nodes(filter).await?;

        let mut pending = Vec::new();
        for node in &nodes {
            if node.metrics.is_empty() {
                continue;
            }
            let amount = self.policy.calculate(&node.metrics);
            if amount <= 0.0 {
                continue;
            }
            let category = self.policy.dominant_category(&node.metrics);
            let reward = self
                .create_pending(node, amount, category, period_start, period_end)
                .await?;
            pending.push(reward);
        }

        info!(
            "Reward cycle: {} pending rewards over {} active nodes",
            pending.len(),
            nodes.len()
        );
        self.distribute_batch(pending).await
    }

    /// Rewards for one node, newest first, with pagination metadata
    pub async fn list_node_rewards(
        &self,
        node_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Reward>, u64), RewardError> {
        Ok(self.store.rewards_for_node(node_id, limit, offset).await?)
    }

    /// Check a pending reward is well-formed and its node still resolves
    ///
    /// Returns `Ok(Err(reason))` for a local validation failure so the
    /// caller can mark the reward failed without touching the ledger.
    async fn validate_for_transfer(
        &self,
        reward: &Reward,
    ) -> Result<Result<(), String>, RewardError> {
        if !reward.amount.is_finite() || reward.amount < 0.0 {
            return Ok(Err(format!("invalid amount: {}", reward.amount)));
        }
        if reward.owner_id.trim().is_empty() {
            return Ok(Err("missing owner".to_string()));
        }
        match self.store.get_node(&reward.node_id).await? {
            Some(_) => Ok(Ok(())),
            None => Ok(Err(format!("node {} no longer exists", reward.node_id))),
        }
    }

    async fn mark_distributed(
        &self,
        mut reward: Reward,
        signature: String,
    ) -> Result<DistributionOutcome, RewardError> {
        reward.status = RewardStatus::Distributed;
        reward.signature = Some(signature.clone());
        self.store.update_reward(reward.clone()).await?;
        self.metrics.reward_distributed();

        info!(
            "Reward {} distributed to {} ({})",
            reward.reward_id, reward.owner_id, signature
        );
        Ok(DistributionOutcome {
            reward_id: reward.reward_id,
            node_id: reward.node_id,
            status: RewardStatus::Distributed,
            signature: Some(signature),
            error: None,
        })
    }

    async fn mark_failed(
        &self,
        mut reward: Reward,
        reason: String,
    ) -> Result<DistributionOutcome, RewardError> {
        reward.status = RewardStatus::Failed;
        self.store.update_reward(reward.clone()).await?;
        self.metrics.reward_failed();

        Ok(DistributionOutcome {
            reward_id: reward.reward_id,
            node_id: reward.node_id,
            status: RewardStatus::Failed,
            signature: None,
            error: Some(reason),
        })
    }
}

fn generate_reward_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("reward_{}_{}", Utc::now().timestamp_millis(), suffix)
}
