//! Counter reconciliation background job
//!
//! Cached like, dislike, share and viewer counters move in the same atomic
//! unit as their rows, so drift should never happen. This job recomputes them
//! for every live stream on an interval and logs any repair it had to make.

use crate::services::StreamSessionCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// How often to recount live streams (every 60 seconds)
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for counter reconciliation
#[derive(Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: RECONCILE_INTERVAL,
        }
    }
}

impl ReconcilerConfig {
    /// A zero interval disables the job.
    pub fn from_interval_secs(secs: u64) -> Self {
        Self {
            enabled: secs > 0,
            interval: Duration::from_secs(secs.max(1)),
        }
    }
}

/// Run one pass; returns how many streams had drifted.
pub async fn reconcile_once(coordinator: &StreamSessionCoordinator) -> crate::error::Result<usize> {
    let repairs = coordinator.reconcile_live().await?;
    let drifted = repairs.iter().filter(|r| r.drifted()).count();
    tracing::debug!(
        streams = repairs.len(),
        drifted,
        "Counter reconciliation pass complete"
    );
    Ok(drifted)
}

/// Start the counter reconciliation background job
pub async fn start_counter_reconciler(
    coordinator: Arc<StreamSessionCoordinator>,
    config: ReconcilerConfig,
) {
    if !config.enabled {
        tracing::info!("Counter reconciler disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        "Starting counter reconciler for stream-session-service"
    );

    let mut consecutive_failures = 0;
    let max_consecutive_failures = 5;

    loop {
        sleep(config.interval).await;

        match reconcile_once(&coordinator).await {
            Ok(drifted) => {
                if consecutive_failures > 0 {
                    tracing::info!(
                        previous_failures = consecutive_failures,
                        "Counter reconciler recovered"
                    );
                }
                consecutive_failures = 0;
                if drifted > 0 {
                    tracing::warn!(drifted, "Counter reconciler repaired drifted streams");
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures >= max_consecutive_failures {
                    tracing::error!(
                        consecutive_failures = consecutive_failures,
                        error = %e,
                        "Counter reconciler: CRITICAL - multiple consecutive failures"
                    );
                } else {
                    tracing::warn!(
                        consecutive_failures = consecutive_failures,
                        error = %e,
                        "Counter reconciler: FAILED"
                    );
                }
            }
        }
    }
}
