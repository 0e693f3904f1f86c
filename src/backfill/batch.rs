//! One bounded backfill batch.
//!
//! A batch is recorded as a `backfill` run. It walks windows from the planner until the
//! window budget is spent, every pair has caught up, or a pause is observed. Each window is
//! one provider call, one idempotent history insert, and a checkpoint advance; a window
//! whose checkpoint could not be written counts as failed and is fetched again next batch.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::window::{PlannedWindow, WindowPlanner};
use crate::models::{Dataset, RunErrorEntry, RunStatus, SyncTrigger};
use crate::provider::history_body;
use crate::provider::parse::{CanReading, FuelReading, GpsReading, parse_distance, parse_history};
use crate::repositories::{
    CallOutcome, CallRecord, CheckpointRepository, HistoryRepository, JobControlRepository,
    RunTotals, VehicleMapRepository,
};
use crate::sync::{RunSummary, SyncContext, SyncError};
use crate::telemetry::BACKFILL_WINDOWS_TOTAL;

/// Parameters of one batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_windows: u32,
    pub window: Duration,
    /// Cursor for pairs without a checkpoint
    pub historical_start: DateTime<Utc>,
    /// Stop before the next window once the pause flag is raised
    pub honor_pause: bool,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchReport {
    pub run: RunSummary,
    pub windows_attempted: u32,
    pub windows_succeeded: u32,
    pub windows_failed: u32,
    /// The batch stopped early because of a pause
    pub paused: bool,
}

/// Status of a batch: nothing to walk or nothing succeeded is a failure, any error is partial.
pub fn classify_batch(vehicles: usize, succeeded: u32, failed: u32, error_count: usize) -> RunStatus {
    if vehicles == 0 || (failed > 0 && succeeded == 0) {
        RunStatus::Failed
    } else if error_count > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Success
    }
}

#[derive(Clone)]
pub struct BackfillRunner {
    ctx: SyncContext,
    pause: Arc<AtomicBool>,
}

impl BackfillRunner {
    pub fn new(ctx: SyncContext, pause: Arc<AtomicBool>) -> Self {
        Self { ctx, pause }
    }

    #[instrument(skip(self), fields(max_windows = opts.max_windows, honor_pause = opts.honor_pause))]
    pub async fn run_batch(&self, opts: &BatchOptions) -> Result<BatchReport, SyncError> {
        let ledger = &self.ctx.ledger;
        let run = ledger
            .begin_run(SyncTrigger::Backfill, self.ctx.settings.stale_run_after)
            .await?;
        let run_id = run.id;
        let jobs = JobControlRepository::new(self.ctx.db.clone());

        let mut errors = Vec::new();
        let vehicles = match VehicleMapRepository::new(self.ctx.db.clone())
            .active_vehicle_nos()
            .await
        {
            Ok(vehicles) => vehicles,
            Err(err) => {
                errors.push(internal_error("vehicle_device_maps", err.to_string()));
                Vec::new()
            }
        };
        let checkpoints = match CheckpointRepository::new(self.ctx.db.clone()).all().await {
            Ok(checkpoints) => checkpoints,
            Err(err) => {
                errors.push(internal_error("history_checkpoints", err.to_string()));
                Default::default()
            }
        };

        let mut planner = WindowPlanner::new(opts.window, Utc::now());
        if errors.is_empty() {
            for vehicle_no in &vehicles {
                for dataset in Dataset::HISTORY {
                    let cursor = checkpoints
                        .get(&(vehicle_no.clone(), dataset))
                        .copied()
                        .unwrap_or(opts.historical_start);
                    planner.push(vehicle_no.clone(), dataset, cursor);
                }
            }
        }

        let mut attempted = 0u32;
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut paused = false;
        let mut records_written = 0i32;
        let mut touched = HashSet::new();
        let mut window_start: Option<DateTime<Utc>> = None;
        let mut window_end: Option<DateTime<Utc>> = None;

        while attempted < opts.max_windows {
            if opts.honor_pause && self.pause.load(Ordering::SeqCst) {
                info!(run_id = %run_id, attempted, "Backfill paused; stopping batch");
                paused = true;
                break;
            }
            let Some(planned) = planner.next_window() else {
                break;
            };

            attempted += 1;
            touched.insert(planned.vehicle_no.clone());
            window_start = Some(window_start.map_or(planned.window.start, |s| s.min(planned.window.start)));
            window_end = Some(window_end.map_or(planned.window.end, |e| e.max(planned.window.end)));

            match self.process_window(run_id, &planned).await {
                Ok(written) => {
                    succeeded += 1;
                    records_written = records_written.saturating_add(written);
                    counter!(BACKFILL_WINDOWS_TOTAL, "dataset" => planned.dataset.as_str(), "outcome" => "success")
                        .increment(1);
                    planner.complete(planned);
                }
                Err(err) => {
                    failed += 1;
                    warn!(
                        run_id = %run_id,
                        vehicle_no = %planned.vehicle_no,
                        dataset = %planned.dataset,
                        window_start = %planned.window.start,
                        error = %err,
                        "Backfill window failed"
                    );
                    counter!(BACKFILL_WINDOWS_TOTAL, "dataset" => planned.dataset.as_str(), "outcome" => "failure")
                        .increment(1);
                    errors.push(RunErrorEntry {
                        endpoint: planned.dataset.history_endpoint().to_string(),
                        vehicle_no: Some(planned.vehicle_no.clone()),
                        message: err.to_string(),
                    });
                }
            }

            if let Err(err) = jobs.heartbeat(run_id).await {
                warn!(run_id = %run_id, error = %err, "Failed to write backfill heartbeat");
            }
        }

        if attempted == 0
            && let Err(err) = jobs.heartbeat(run_id).await
        {
            warn!(run_id = %run_id, error = %err, "Failed to write backfill heartbeat");
        }

        let status = classify_batch(vehicles.len(), succeeded, failed, errors.len());
        let totals = RunTotals {
            status,
            vehicles_discovered: i32::try_from(vehicles.len()).unwrap_or(i32::MAX),
            vehicles_processed: i32::try_from(touched.len()).unwrap_or(i32::MAX),
            endpoints_called: i32::try_from(attempted).unwrap_or(i32::MAX),
            records_written,
            errors,
            window_start,
            window_end,
        };
        let finished = match ledger.finish_run(run_id, &totals).await {
            Ok(run) => run,
            Err(err) => {
                let reason = format!("run could not be closed: {err}");
                if let Err(fallback) = ledger.abandon_run(run_id, &reason).await {
                    warn!(run_id = %run_id, error = %fallback, "Failed to mark backfill run as failed");
                }
                return Err(err.into());
            }
        };

        info!(
            run_id = %run_id,
            status = %status,
            attempted,
            succeeded,
            failed,
            paused,
            records_written,
            "Backfill batch finished"
        );

        Ok(BatchReport {
            run: RunSummary::from(finished),
            windows_attempted: attempted,
            windows_succeeded: succeeded,
            windows_failed: failed,
            paused,
        })
    }

    /// Fetch, store, and checkpoint one window. Returns the number of new history rows.
    async fn process_window(&self, run_id: Uuid, planned: &PlannedWindow) -> Result<i32, SyncError> {
        let endpoint = planned.dataset.history_endpoint();
        let body = history_body(&planned.vehicle_no, planned.window.start, planned.window.end);
        let reply = self.ctx.fetch(endpoint, body).await;

        let result = match reply.data {
            Ok(data) => self.store(planned, endpoint, &data).await,
            Err(err) => Err(err.into()),
        };

        let result = match result {
            Ok(written) => CheckpointRepository::new(self.ctx.db.clone())
                .advance(&planned.vehicle_no, planned.dataset, planned.window.end)
                .await
                .map(|_| written)
                .map_err(SyncError::from),
            Err(err) => Err(err),
        };

        let record = match &result {
            Ok(written) => CallRecord {
                run_id,
                endpoint: endpoint.to_string(),
                vehicle_no: Some(planned.vehicle_no.clone()),
                outcome: CallOutcome::Success,
                records_written: *written,
                payload: reply.raw,
                error: None,
            },
            Err(err) => CallRecord {
                run_id,
                endpoint: endpoint.to_string(),
                vehicle_no: Some(planned.vehicle_no.clone()),
                outcome: CallOutcome::Failure,
                records_written: 0,
                payload: reply.raw,
                error: Some(err.to_string()),
            },
        };
        self.ctx.record(record).await;

        result
    }

    async fn store(&self, planned: &PlannedWindow, endpoint: &str, data: &Value) -> Result<i32, SyncError> {
        let history = HistoryRepository::new(self.ctx.db.clone());
        let vehicle_no = planned.vehicle_no.as_str();
        let inserted = match planned.dataset {
            Dataset::Gps => {
                let readings: Vec<GpsReading> = parse_history(endpoint, data)?;
                history.insert_gps(vehicle_no, &readings).await?
            }
            Dataset::Can => {
                let readings: Vec<CanReading> = parse_history(endpoint, data)?;
                history.insert_can(vehicle_no, &readings).await?
            }
            Dataset::Fuel => {
                let readings: Vec<FuelReading> = parse_history(endpoint, data)?;
                history.insert_fuel(vehicle_no, &readings).await?
            }
            Dataset::Distance => {
                let reading = parse_distance(endpoint, data)?;
                history
                    .insert_distance(vehicle_no, planned.window.start, planned.window.end, &reading)
                    .await?
            }
        };
        Ok(i32::try_from(inserted).unwrap_or(i32::MAX))
    }
}

fn internal_error(step: &str, message: String) -> RunErrorEntry {
    RunErrorEntry {
        endpoint: step.to_string(),
        vehicle_no: None,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_status_rules() {
        assert_eq!(classify_batch(0, 0, 0, 0), RunStatus::Failed);
        assert_eq!(classify_batch(3, 0, 2, 2), RunStatus::Failed);
        assert_eq!(classify_batch(3, 5, 1, 1), RunStatus::Partial);
        assert_eq!(classify_batch(3, 5, 0, 0), RunStatus::Success);
        // Everything already caught up.
        assert_eq!(classify_batch(3, 0, 0, 0), RunStatus::Success);
    }
}
