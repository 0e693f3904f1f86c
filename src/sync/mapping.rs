//! Vehicle/device mapping resolver: the discovery step of a run.

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{SyncContext, SyncError};
use crate::provider::parse::parse_roster;
use crate::provider::{ROSTER_ENDPOINT, roster_body};
use crate::repositories::{CallOutcome, CallRecord, VehicleMapRepository};

/// Vehicles discovered by one roster call.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRoster {
    pub vehicles: Vec<String>,
    /// Roster rows inserted or refreshed
    pub records_written: i32,
}

/// Fetch the roster once, upsert it, and return the vehicles to poll.
///
/// The call is recorded whatever happens. Errors propagate so the coordinator can treat
/// them as zero discovered vehicles.
#[instrument(skip(ctx), fields(endpoint = ROSTER_ENDPOINT))]
pub async fn resolve_mapping(ctx: &SyncContext, run_id: Uuid) -> Result<ResolvedRoster, SyncError> {
    let reply = ctx.fetch(ROSTER_ENDPOINT, roster_body()).await;
    let parsed = reply
        .data
        .and_then(|data| parse_roster(ROSTER_ENDPOINT, &data));

    let entries = match parsed {
        Ok(entries) => entries,
        Err(err) => {
            ctx.record(failure(run_id, reply.raw, err.to_string())).await;
            return Err(err.into());
        }
    };

    let repo = VehicleMapRepository::new(ctx.db.clone());
    let seen_at = Utc::now();
    let upserted = match repo.upsert_roster(run_id, &entries, seen_at).await {
        Ok(stats) => stats,
        Err(err) => {
            ctx.record(failure(run_id, reply.raw, err.to_string())).await;
            return Err(err.into());
        }
    };

    let vehicles: Vec<String> = entries.into_iter().map(|e| e.vehicle_no).collect();

    if ctx.settings.retire_missing_vehicles && !vehicles.is_empty() {
        match repo.retire_missing(&vehicles, seen_at).await {
            Ok(0) => {}
            Ok(retired) => info!(retired, "Marked vehicles missing from the roster inactive"),
            Err(err) => warn!(error = %err, "Failed to retire vehicles missing from the roster"),
        }
    }

    let records_written = i32::try_from(upserted.written()).unwrap_or(i32::MAX);
    info!(
        vehicles = vehicles.len(),
        inserted = upserted.inserted,
        updated = upserted.updated,
        device_changes = upserted.device_changes,
        "Resolved vehicle roster"
    );

    ctx.record(CallRecord {
        run_id,
        endpoint: ROSTER_ENDPOINT.to_string(),
        vehicle_no: None,
        outcome: CallOutcome::Success,
        records_written,
        payload: reply.raw,
        error: None,
    })
    .await;

    Ok(ResolvedRoster {
        vehicles,
        records_written,
    })
}

fn failure(run_id: Uuid, raw: Option<serde_json::Value>, error: String) -> CallRecord {
    CallRecord {
        run_id,
        endpoint: ROSTER_ENDPOINT.to_string(),
        vehicle_no: None,
        outcome: CallOutcome::Failure,
        records_written: 0,
        payload: raw,
        error: Some(error),
    }
}
