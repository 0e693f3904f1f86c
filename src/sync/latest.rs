//! Latest-state upserter: one provider call and one keyed upsert per vehicle and dataset.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{SyncContext, SyncError};
use crate::models::Dataset;
use crate::provider::latest_body;
use crate::provider::parse::{CanReading, FuelReading, GpsReading, parse_latest};
use crate::repositories::{CallOutcome, CallRecord, LatestStateRepository, UpsertOutcome};

/// Pull the newest snapshot of `dataset` for one vehicle and overwrite its latest row.
///
/// A rejected envelope, a missing or malformed payload, and a failed write are all errors.
/// A reading older than the stored one is not written and reported as
/// [`UpsertOutcome::Stale`].
pub async fn pull_and_upsert_latest(
    ctx: &SyncContext,
    run_id: Uuid,
    vehicle_no: &str,
    dataset: Dataset,
) -> Result<UpsertOutcome, SyncError> {
    let Some(endpoint) = dataset.latest_endpoint() else {
        return Err(SyncError::UnsupportedDataset(dataset));
    };

    let reply = ctx.fetch(endpoint, latest_body(vehicle_no)).await;
    let result = match reply.data {
        Ok(data) => upsert(ctx, run_id, vehicle_no, dataset, endpoint, &data).await,
        Err(err) => Err(err.into()),
    };

    let record = match &result {
        Ok(outcome) => CallRecord {
            run_id,
            endpoint: endpoint.to_string(),
            vehicle_no: Some(vehicle_no.to_string()),
            outcome: if *outcome == UpsertOutcome::Stale {
                CallOutcome::Stale
            } else {
                CallOutcome::Success
            },
            records_written: outcome.rows_written(),
            payload: reply.raw,
            error: None,
        },
        Err(err) => CallRecord {
            run_id,
            endpoint: endpoint.to_string(),
            vehicle_no: Some(vehicle_no.to_string()),
            outcome: CallOutcome::Failure,
            records_written: 0,
            payload: reply.raw,
            error: Some(err.to_string()),
        },
    };
    ctx.record(record).await;

    if let Ok(UpsertOutcome::Stale) = result {
        debug!(vehicle_no, dataset = %dataset, "Skipped latest reading older than the stored one");
    }
    result
}

async fn upsert(
    ctx: &SyncContext,
    run_id: Uuid,
    vehicle_no: &str,
    dataset: Dataset,
    endpoint: &str,
    data: &Value,
) -> Result<UpsertOutcome, SyncError> {
    let repo = LatestStateRepository::new(ctx.db.clone());
    let outcome = match dataset {
        Dataset::Gps => {
            let reading: GpsReading = parse_latest(endpoint, data)?;
            repo.upsert_gps(vehicle_no, run_id, &reading).await?
        }
        Dataset::Can => {
            let reading: CanReading = parse_latest(endpoint, data)?;
            repo.upsert_can(vehicle_no, run_id, &reading).await?
        }
        Dataset::Fuel => {
            let reading: FuelReading = parse_latest(endpoint, data)?;
            repo.upsert_fuel(vehicle_no, run_id, &reading).await?
        }
        Dataset::Distance => return Err(SyncError::UnsupportedDataset(dataset)),
    };
    Ok(outcome)
}
