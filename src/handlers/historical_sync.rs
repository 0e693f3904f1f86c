//! # Historical Sync Handlers
//!
//! Status of the backfill plus the operator controls. Every control is forwarded to the
//! backfill controller actor, which applies the state transition and replies.

use axum::{body::Bytes, extract::State, response::Json};
use chrono::{DateTime, Utc};
use serde_json::json;

use super::types::{CheckpointInfo, HistoricalSyncStatus, StartHistoricalSyncRequest};
use crate::backfill::{BatchReport, JobControlView, StartRequest};
use crate::error::{ApiError, validation_error};
use crate::models::SyncTrigger;
use crate::repositories::{CheckpointRepository, JobControlRepository};
use crate::server::AppState;
use crate::sync::RunSummary;

const RECENT_CHECKPOINTS: u64 = 20;
const MAX_WINDOWS_PER_RUN: u32 = 10_000;

/// Job control row, per-dataset progress, and the most recently advanced checkpoints
#[utoipa::path(
    get,
    path = "/telematics/historical-sync/status",
    responses(
        (status = 200, description = "Backfill status", body = HistoricalSyncStatus),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "historical-sync"
)]
pub async fn status(State(state): State<AppState>) -> Result<Json<HistoricalSyncStatus>, ApiError> {
    let job = JobControlRepository::new(state.db.clone()).load().await?;
    let checkpoints = CheckpointRepository::new(state.db.clone());
    let progress = checkpoints.progress().await?;
    let recent_checkpoints = checkpoints
        .recent(RECENT_CHECKPOINTS)
        .await?
        .into_iter()
        .map(CheckpointInfo::from)
        .collect();
    let last_batch = state
        .coordinator
        .context()
        .ledger
        .list_runs(Some(SyncTrigger::Backfill), 1)
        .await?
        .into_iter()
        .next()
        .map(RunSummary::from);

    Ok(Json(HistoricalSyncStatus {
        job: job.into(),
        pause_requested: state.backfill.is_pause_requested(),
        progress,
        recent_checkpoints,
        last_batch,
    }))
}

/// Body is optional; an empty body keeps the stored settings.
fn parse_start_request(body: &[u8]) -> Result<StartRequest, ApiError> {
    let request: StartHistoricalSyncRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartHistoricalSyncRequest::default()
    } else {
        serde_json::from_slice(body).map_err(|err| {
            validation_error("Invalid request body", json!({ "body": err.to_string() }))
        })?
    };

    let from_millis = match request.historical_start_ms {
        None => None,
        Some(ms) => Some(DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
            validation_error(
                "Invalid historical start",
                json!({ "historicalStartMs": "out of range epoch milliseconds" }),
            )
        })?),
    };
    let historical_start = request.historical_start.or(from_millis);
    if let Some(start) = historical_start
        && start > Utc::now()
    {
        return Err(validation_error(
            "Invalid historical start",
            json!({ "historical_start": "must not be in the future" }),
        ));
    }

    if let Some(max) = request.max_windows_per_run
        && !(1..=MAX_WINDOWS_PER_RUN).contains(&max)
    {
        return Err(validation_error(
            "Invalid window budget",
            json!({ "max_windows_per_run": format!("must be between 1 and {MAX_WINDOWS_PER_RUN}") }),
        ));
    }

    Ok(StartRequest {
        historical_start,
        max_windows_per_run: request.max_windows_per_run,
    })
}

/// Start (or restart) the backfill; the first batch begins right away
#[utoipa::path(
    post,
    path = "/telematics/historical-sync/start",
    request_body(content = StartHistoricalSyncRequest, description = "Optional overrides; an empty body keeps stored settings", content_type = "application/json"),
    responses(
        (status = 200, description = "Backfill running", body = JobControlView),
        (status = 400, description = "Invalid body or no historical start available", body = ApiError),
        (status = 503, description = "Controller not running", body = ApiError)
    ),
    tag = "historical-sync"
)]
pub async fn start(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<JobControlView>, ApiError> {
    let request = parse_start_request(&body)?;
    Ok(Json(state.backfill.start(request).await?))
}

/// Pause after the in-flight window
#[utoipa::path(
    post,
    path = "/telematics/historical-sync/pause",
    responses(
        (status = 200, description = "Backfill paused", body = JobControlView),
        (status = 409, description = "Backfill was never started", body = ApiError)
    ),
    tag = "historical-sync"
)]
pub async fn pause(State(state): State<AppState>) -> Result<Json<JobControlView>, ApiError> {
    Ok(Json(state.backfill.pause().await?))
}

/// Resume scheduled batches
#[utoipa::path(
    post,
    path = "/telematics/historical-sync/resume",
    responses(
        (status = 200, description = "Backfill running", body = JobControlView),
        (status = 409, description = "Backfill was never started", body = ApiError)
    ),
    tag = "historical-sync"
)]
pub async fn resume(State(state): State<AppState>) -> Result<Json<JobControlView>, ApiError> {
    Ok(Json(state.backfill.resume().await?))
}

/// Run exactly one bounded batch, whatever the job status
#[utoipa::path(
    post,
    path = "/telematics/historical-sync/run-once",
    responses(
        (status = 200, description = "Batch finished", body = BatchReport),
        (status = 400, description = "No historical start available", body = ApiError),
        (status = 409, description = "A batch is already in progress", body = ApiError)
    ),
    tag = "historical-sync"
)]
pub async fn run_once(State(state): State<AppState>) -> Result<Json<BatchReport>, ApiError> {
    Ok(Json(state.backfill.run_once().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_keeps_stored_settings() {
        let request = parse_start_request(b"").unwrap();
        assert!(request.historical_start.is_none());
        assert!(request.max_windows_per_run.is_none());
    }

    #[test]
    fn millis_start_is_accepted() {
        let request = parse_start_request(br#"{"historicalStartMs": 1700000000000, "max_windows_per_run": 48}"#).unwrap();
        assert_eq!(
            request.historical_start,
            DateTime::from_timestamp(1_700_000_000, 0)
        );
        assert_eq!(request.max_windows_per_run, Some(48));
    }

    #[test]
    fn invalid_bodies_are_rejected() {
        assert!(parse_start_request(b"{not json").is_err());
        assert!(parse_start_request(br#"{"max_windows_per_run": 0}"#).is_err());
        let future = (Utc::now() + chrono::Duration::days(1)).to_rfc3339();
        let body = format!(r#"{{"historical_start": "{future}"}}"#);
        assert!(parse_start_request(body.as_bytes()).is_err());
    }
}
