//! Service runtime: background loops and the API server
//!
//! Wires the application context to the HTTP listener, drives the
//! periodic stats and reward loops, and forwards settled rewards to
//! their owners' notification channels.

use chrono::{Duration as ChronoDuration, Utc};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::create_router;
use crate::config::Config;
use crate::context::{AppContext, ContextError};
use crate::events::NetworkEvent;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the pipeline service with the given configuration
pub async fn run_node(config: Config) -> Result<(), RuntimeError> {
    let ctx = AppContext::start(config).await?;

    let snapshot_loop = spawn_snapshot_loop(ctx.clone());
    let reward_loop = spawn_reward_loop(ctx.clone());
    let notifier = spawn_reward_notifier(ctx.clone());

    let router = create_router(ctx.clone());
    let addr = format!("0.0.0.0:{}", ctx.config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on {}", addr);

    tokio::select! {
        result = axum::serve(listener, router).into_future() => {
            if let Err(e) = result {
                error!("API server exited: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    snapshot_loop.abort();
    reward_loop.abort();
    notifier.abort();
    ctx.shutdown().await;

    info!("Node stopped");
    Ok(())
}

/// Periodically snapshot network-wide stats
fn spawn_snapshot_loop(ctx: Arc<AppContext>) -> JoinHandle<()> {
    let period = Duration::from_secs(ctx.config.snapshot_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The immediate first tick would snapshot an empty store
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = ctx.stats.snapshot().await {
                warn!("Stats snapshot failed: {}", e);
            }
        }
    })
}

/// Periodically compute and distribute rewards for the elapsed period
fn spawn_reward_loop(ctx: Arc<AppContext>) -> JoinHandle<()> {
    let interval_secs = ctx.config.reward_interval_secs;
    tokio::spawn(async move {
        if interval_secs == 0 {
            info!("Reward cycles disabled");
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let period_end = Utc::now();
            let period_start = period_end - ChronoDuration::seconds(interval_secs as i64);
            match ctx.rewards.run_reward_cycle(period_start, period_end).await {
                Ok(outcomes) => {
                    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
                    info!(
                        "Reward cycle settled {} rewards ({} failed)",
                        outcomes.len(),
                        failed
                    );
                }
                Err(e) => warn!("Reward cycle failed: {}", e),
            }
        }
    })
}

/// Forward settled rewards to their owners' notification channels
fn spawn_reward_notifier(ctx: Arc<AppContext>) -> JoinHandle<()> {
    let mut rewards_rx = ctx.events.subscribe_rewards();
    tokio::spawn(async move {
        loop {
            match rewards_rx.recv().await {
                Ok(NetworkEvent::RewardDistributed { reward }) => {
                    let payload = serde_json::json!({
                        "kind": "reward",
                        "title": "Reward distributed",
                        "node_id": reward.node_id,
                        "amount": reward.amount,
                        "signature": reward.signature,
                    });
                    ctx.events.notify_user(&reward.owner_id, payload).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Reward notifier lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
