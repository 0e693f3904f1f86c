//! # Sync Scheduler
//!
//! Background task that invokes the sync coordinator on a fixed interval plus a random
//! jitter, so several deployments polling the same provider drift apart. A tick that finds
//! a run already in progress is skipped, not queued.

use std::time::Duration;

use metrics::{counter, histogram};
use rand::Rng;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::models::SyncTrigger;
use crate::sync::{SyncCoordinator, SyncError};

/// Background scheduler service.
pub struct SyncScheduler {
    coordinator: SyncCoordinator,
    interval_seconds: u64,
    jitter_pct_max: f64,
}

impl SyncScheduler {
    pub fn new(coordinator: SyncCoordinator, config: &SyncConfig) -> Self {
        Self {
            coordinator,
            interval_seconds: config.interval_seconds,
            jitter_pct_max: config.jitter_pct_max,
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_seconds = self.interval_seconds,
            jitter_pct_max = self.jitter_pct_max,
            "Starting sync scheduler"
        );

        loop {
            let jitter = sample_jitter_seconds(self.jitter_pct_max, self.interval_seconds);
            histogram!("telematics_scheduler_jitter_seconds").record(jitter as f64);
            let delay = Duration::from_secs(self.interval_seconds + jitter);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(delay) => {
                    self.tick().await;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn tick(&self) {
        let started = Instant::now();
        match self.coordinator.run_sync(SyncTrigger::Scheduled).await {
            Ok(summary) => {
                info!(run_id = %summary.id, status = %summary.status, "Scheduled sync completed");
            }
            Err(SyncError::AlreadyRunning { lock_key }) => {
                counter!("telematics_scheduler_skipped_total").increment(1);
                warn!(lock_key = %lock_key, "Skipping scheduled sync; a run is already in progress");
            }
            Err(err) => {
                error!(error = %err, "Scheduled sync failed");
            }
        }
        histogram!("telematics_scheduler_tick_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);
    }
}

fn sample_jitter_seconds(jitter_pct_max: f64, base_interval_seconds: u64) -> u64 {
    let mut rng = rand::thread_rng();
    compute_jitter_seconds(jitter_pct_max, base_interval_seconds, &mut rng)
}

fn compute_jitter_seconds<R: Rng + ?Sized>(
    jitter_pct_max: f64,
    base_interval_seconds: u64,
    rng: &mut R,
) -> u64 {
    let max = jitter_pct_max.clamp(0.0, 1.0);
    if max == 0.0 {
        return 0;
    }
    let jitter_pct = rng.gen_range(0.0..=max);
    (base_interval_seconds as f64 * jitter_pct).round() as u64
}
