//! Sync Run Coordinator
//!
//! Drives one live polling cycle end to end: open the run row, resolve the roster, pull the
//! three latest datasets for every vehicle with bounded concurrency, then close the run with
//! its aggregate counters and classified status.
//!
//! Overlapping runs are rejected rather than queued. Inside one process a mutex is tried
//! without waiting; across processes the `running` row's partial unique index does the same.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::{Mutex, Semaphore};
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;

use super::latest::pull_and_upsert_latest;
use super::mapping::resolve_mapping;
use super::{RunSummary, SyncContext, SyncError, classify_run};
use crate::models::{Dataset, RunErrorEntry, SyncTrigger};
use crate::provider::ROSTER_ENDPOINT;
use crate::repositories::RunTotals;
use crate::telemetry::{SYNC_RUN_DURATION_MS, SYNC_RUNS_TOTAL};

/// Tally of one vehicle's three latest pulls.
#[derive(Debug, Default)]
struct VehicleOutcome {
    calls: i32,
    records_written: i32,
    errors: Vec<RunErrorEntry>,
}

#[derive(Clone)]
pub struct SyncCoordinator {
    ctx: SyncContext,
    guard: Arc<Mutex<()>>,
}

impl SyncCoordinator {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Run one full sync cycle and return the stored summary.
    ///
    /// Returns [`SyncError::AlreadyRunning`] when another live run holds the lock. Provider
    /// failures never surface here; they are folded into the run's error list.
    ///
    /// The cycle runs on its own task, so dropping the returned future (a disconnected HTTP
    /// client, a caller timeout) never leaves the run row open.
    #[instrument(skip(self), fields(trigger = %trigger))]
    pub async fn run_sync(&self, trigger: SyncTrigger) -> Result<RunSummary, SyncError> {
        let Ok(guard) = self.guard.clone().try_lock_owned() else {
            return Err(SyncError::AlreadyRunning {
                lock_key: trigger.lock_key().to_string(),
            });
        };

        let coordinator = self.clone();
        let cycle = tokio::spawn(
            async move {
                let _guard = guard;
                coordinator.run_cycle(trigger).await
            }
            .in_current_span(),
        );

        cycle.await.map_err(|err| {
            error!(error = %err, "Sync run task aborted");
            SyncError::TaskAborted(err.to_string())
        })?
    }

    async fn run_cycle(&self, trigger: SyncTrigger) -> Result<RunSummary, SyncError> {
        let started = Instant::now();
        let run = self
            .ctx
            .ledger
            .begin_run(trigger, self.ctx.settings.stale_run_after)
            .await?;
        let run_id = run.id;
        info!(run_id = %run_id, "Sync run started");

        let mut errors = Vec::new();
        let mut endpoints_called = 1;
        let mut records_written = 0;

        let vehicles = match resolve_mapping(&self.ctx, run_id).await {
            Ok(roster) => {
                records_written += roster.records_written;
                roster.vehicles
            }
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "Vehicle roster unavailable");
                errors.push(RunErrorEntry {
                    endpoint: ROSTER_ENDPOINT.to_string(),
                    vehicle_no: None,
                    message: err.to_string(),
                });
                Vec::new()
            }
        };

        for outcome in self.process_vehicles(run_id, &vehicles).await {
            endpoints_called += outcome.calls;
            records_written += outcome.records_written;
            errors.extend(outcome.errors);
        }

        let status = classify_run(vehicles.len(), errors.len());
        let vehicle_count = i32::try_from(vehicles.len()).unwrap_or(i32::MAX);
        let totals = RunTotals {
            status,
            vehicles_discovered: vehicle_count,
            vehicles_processed: vehicle_count,
            endpoints_called,
            records_written,
            errors,
            window_start: None,
            window_end: None,
        };

        let finished = match self.ctx.ledger.finish_run(run_id, &totals).await {
            Ok(run) => run,
            Err(err) => {
                error!(run_id = %run_id, error = %err, "Failed to close sync run");
                let reason = format!("run could not be closed: {err}");
                if let Err(fallback) = self.ctx.ledger.abandon_run(run_id, &reason).await {
                    error!(run_id = %run_id, error = %fallback, "Failed to mark sync run as failed");
                }
                return Err(err.into());
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        counter!(SYNC_RUNS_TOTAL, "trigger" => trigger.as_str(), "status" => status.as_str())
            .increment(1);
        histogram!(SYNC_RUN_DURATION_MS, "trigger" => trigger.as_str()).record(elapsed_ms);

        info!(
            run_id = %run_id,
            status = %status,
            vehicles = totals.vehicles_discovered,
            endpoints_called = totals.endpoints_called,
            records_written = totals.records_written,
            errors = totals.errors.len(),
            elapsed_ms,
            "Sync run finished"
        );

        Ok(RunSummary::from(finished))
    }

    /// Pull every vehicle's datasets, at most `vehicle_concurrency` vehicles at a time.
    /// Results come back in roster order.
    async fn process_vehicles(&self, run_id: Uuid, vehicles: &[String]) -> Vec<VehicleOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.ctx.settings.vehicle_concurrency));
        let mut handles = Vec::with_capacity(vehicles.len());

        for vehicle_no in vehicles {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let ctx = self.ctx.clone();
            let task_vehicle = vehicle_no.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                pull_vehicle(&ctx, run_id, &task_vehicle).await
            });
            handles.push((vehicle_no.clone(), handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (vehicle_no, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!(run_id = %run_id, vehicle_no = %vehicle_no, error = %err, "Vehicle task aborted");
                    outcomes.push(VehicleOutcome {
                        calls: 0,
                        records_written: 0,
                        errors: vec![RunErrorEntry {
                            endpoint: "internal".to_string(),
                            vehicle_no: Some(vehicle_no),
                            message: format!("vehicle task aborted: {err}"),
                        }],
                    });
                }
            }
        }
        outcomes
    }
}

/// GPS, then CAN, then fuel. A failed dataset never stops the next one.
async fn pull_vehicle(ctx: &SyncContext, run_id: Uuid, vehicle_no: &str) -> VehicleOutcome {
    let mut outcome = VehicleOutcome::default();
    for dataset in Dataset::LATEST {
        outcome.calls += 1;
        match pull_and_upsert_latest(ctx, run_id, vehicle_no, dataset).await {
            Ok(upsert) => outcome.records_written += upsert.rows_written(),
            Err(err) => {
                warn!(run_id = %run_id, vehicle_no, dataset = %dataset, error = %err, "Latest pull failed");
                outcome.errors.push(RunErrorEntry {
                    endpoint: dataset
                        .latest_endpoint()
                        .unwrap_or(dataset.as_str())
                        .to_string(),
                    vehicle_no: Some(vehicle_no.to_string()),
                    message: err.to_string(),
                });
            }
        }
    }
    outcome
}
