//! The advancement ticker: one periodic driver per process.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::LiveEngine;

/// Advances the engine once per target duration until cancelled.
///
/// Transient failures (no leader, apply timeout) are logged and dropped;
/// the next tick simply tries again. On a clustered follower the advance is
/// already a no-op inside the engine, so every node can run the ticker.
pub async fn run_ticker(engine: Arc<LiveEngine>, cancel: CancellationToken) {
    let period = engine.tick_interval();
    info!(interval_secs = period.as_secs(), "starting window advance ticker");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the window starts moving one
    // full period after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("stopping window advance ticker");
                return;
            }
            _ = ticker.tick() => {
                if let Err(error) = engine.tick_advance().await {
                    warn!(%error, "window advance failed, retrying at next tick");
                }
            }
        }
    }
}
