//! # Telematics API Handlers
//!
//! Operator-facing reads over runs, the roster, latest state and history, plus the manual
//! sync trigger.

use std::convert::Infallible;
use std::future::ready;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::types::{
    HistoryResponse, LatestPreview, OverviewResponse, RunDetailResponse, RunItemInfo,
    RunsResponse, VehicleInfo, VehiclesResponse,
};
use crate::error::{ApiError, validation_error};
use crate::models::{Dataset, SyncTrigger};
use crate::repositories::{
    HistoryQuery, HistoryRepository, HistoryRow, LatestStateRepository, VehicleMapRepository,
    table_stats,
};
use crate::server::AppState;
use crate::sync::RunSummary;

const PREVIEW_ROWS: u64 = 10;
const DEFAULT_RUNS_LIMIT: u64 = 20;
const MAX_RUNS_LIMIT: u64 = 200;
const DEFAULT_HISTORY_LIMIT: u64 = 500;
const MAX_HISTORY_LIMIT: u64 = 5_000;
const RUN_ITEMS_LIMIT: u64 = 1_000;

/// Dashboard overview: last runs, table counts, and latest-state previews
#[utoipa::path(
    get,
    path = "/telematics/overview",
    responses(
        (status = 200, description = "Overview", body = OverviewResponse),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "telematics"
)]
pub async fn overview(State(state): State<AppState>) -> Result<Json<OverviewResponse>, ApiError> {
    let ledger = &state.coordinator.context().ledger;
    let last_run = ledger.latest_live_run().await?.map(RunSummary::from);
    let last_backfill_run = ledger
        .list_runs(Some(SyncTrigger::Backfill), 1)
        .await?
        .into_iter()
        .next()
        .map(RunSummary::from);

    let tables = table_stats(&state.db).await?;

    let latest = LatestStateRepository::new(state.db.clone());
    let mut previews: Vec<LatestPreview> = Vec::new();
    previews.extend(latest.recent_gps(PREVIEW_ROWS).await?.into_iter().map(LatestPreview::from));
    previews.extend(latest.recent_can(PREVIEW_ROWS).await?.into_iter().map(LatestPreview::from));
    previews.extend(latest.recent_fuel(PREVIEW_ROWS).await?.into_iter().map(LatestPreview::from));

    Ok(Json(OverviewResponse {
        last_run,
        last_backfill_run,
        tables,
        previews,
    }))
}

/// Run one live sync now and wait for its summary
#[utoipa::path(
    post,
    path = "/telematics/trigger-sync",
    responses(
        (status = 200, description = "Run finished", body = RunSummary),
        (status = 409, description = "A live run is already in progress", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "telematics"
)]
pub async fn trigger_sync(State(state): State<AppState>) -> Result<Json<RunSummary>, ApiError> {
    let summary = state.coordinator.run_sync(SyncTrigger::Manual).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    /// scheduled, manual, or backfill
    pub trigger: Option<String>,
    pub limit: Option<u64>,
}

/// Recent runs, newest first
#[utoipa::path(
    get,
    path = "/telematics/runs",
    params(
        ("trigger" = Option<String>, Query, description = "Filter by trigger (scheduled, manual, backfill)"),
        ("limit" = Option<u64>, Query, description = "Maximum runs to return (default 20, max 200)")
    ),
    responses(
        (status = 200, description = "Runs", body = RunsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError)
    ),
    tag = "telematics"
)]
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<RunsQuery>,
) -> Result<Json<RunsResponse>, ApiError> {
    let trigger = match params.trigger.as_deref() {
        None => None,
        Some(raw) => Some(raw.parse::<SyncTrigger>().map_err(|msg| {
            validation_error("Invalid trigger", json!({ "trigger": msg }))
        })?),
    };
    let limit = bounded_limit("limit", params.limit, DEFAULT_RUNS_LIMIT, MAX_RUNS_LIMIT)?;

    let runs = state
        .coordinator
        .context()
        .ledger
        .list_runs(trigger, limit)
        .await?
        .into_iter()
        .map(RunSummary::from)
        .collect();
    Ok(Json(RunsResponse { runs }))
}

/// One run with every provider call it made
#[utoipa::path(
    get,
    path = "/telematics/runs/{id}",
    params(("id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run detail", body = RunDetailResponse),
        (status = 404, description = "Unknown run", body = ApiError)
    ),
    tag = "telematics"
)]
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunDetailResponse>, ApiError> {
    let ledger = &state.coordinator.context().ledger;
    let run = ledger
        .find_run(id)
        .await?
        .ok_or_else(|| ApiError::not_found(&format!("sync run {id} not found")))?;
    let items = ledger
        .items_for_run(id, RUN_ITEMS_LIMIT)
        .await?
        .into_iter()
        .map(RunItemInfo::from)
        .collect();
    Ok(Json(RunDetailResponse {
        run: run.into(),
        items,
    }))
}

#[derive(Debug, Deserialize)]
pub struct VehiclesQuery {
    /// Only vehicles present in the latest roster
    pub active: Option<bool>,
}

/// Current vehicle/device roster
#[utoipa::path(
    get,
    path = "/telematics/vehicles",
    params(("active" = Option<bool>, Query, description = "Only active vehicles")),
    responses((status = 200, description = "Roster", body = VehiclesResponse)),
    tag = "telematics"
)]
pub async fn list_vehicles(
    State(state): State<AppState>,
    Query(params): Query<VehiclesQuery>,
) -> Result<Json<VehiclesResponse>, ApiError> {
    let vehicles = VehicleMapRepository::new(state.db.clone())
        .list(params.active.unwrap_or(false))
        .await?
        .into_iter()
        .map(VehicleInfo::from)
        .collect();
    Ok(Json(VehiclesResponse { vehicles }))
}

/// Query string shared by the history and export endpoints
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub vehicle: Option<String>,
    #[serde(rename = "startMs")]
    pub start_ms: Option<i64>,
    #[serde(rename = "endMs")]
    pub end_ms: Option<i64>,
    /// Comma separated datasets, or `all`
    pub dataset: Option<String>,
    pub limit: Option<u64>,
    /// csv (default) or json; export only
    pub format: Option<String>,
}

/// Validated history read.
#[derive(Debug)]
struct HistoryRequest {
    datasets: Vec<Dataset>,
    query: HistoryQuery,
}

fn parse_history_params(params: &HistoryParams) -> Result<HistoryRequest, ApiError> {
    let vehicle_no = params
        .vehicle
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| validation_error("Missing vehicle", json!({ "vehicle": "required" })))?
        .to_string();

    let start = parse_millis("startMs", params.start_ms)?;
    let end = parse_millis("endMs", params.end_ms)?;
    if let (Some(start), Some(end)) = (start, end)
        && start > end
    {
        return Err(validation_error(
            "Invalid time range",
            json!({ "startMs": "must not be after endMs" }),
        ));
    }

    let datasets = parse_datasets(params.dataset.as_deref())?;
    let limit = bounded_limit("limit", params.limit, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT)?;

    Ok(HistoryRequest {
        datasets,
        query: HistoryQuery {
            vehicle_no,
            start,
            end,
            limit,
        },
    })
}

fn parse_millis(field: &str, value: Option<i64>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match value {
        None => Ok(None),
        Some(ms) => DateTime::from_timestamp_millis(ms).map(Some).ok_or_else(|| {
            validation_error("Invalid timestamp", json!({ field: "out of range epoch milliseconds" }))
        }),
    }
}

fn parse_datasets(raw: Option<&str>) -> Result<Vec<Dataset>, ApiError> {
    let raw = raw.map(str::trim).unwrap_or("all");
    if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
        return Ok(Dataset::HISTORY.to_vec());
    }

    let mut datasets = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let dataset = name
            .parse::<Dataset>()
            .map_err(|err| validation_error("Invalid dataset", json!({ "dataset": err.to_string() })))?;
        if !datasets.contains(&dataset) {
            datasets.push(dataset);
        }
    }
    Ok(datasets)
}

fn bounded_limit(field: &str, value: Option<u64>, default: u64, max: u64) -> Result<u64, ApiError> {
    match value {
        None => Ok(default),
        Some(0) => Err(validation_error(
            "Invalid limit",
            json!({ field: "Minimum allowed limit is 1" }),
        )),
        Some(v) if v > max => Err(validation_error(
            "Invalid limit",
            json!({ field: format!("Maximum allowed limit is {max}") }),
        )),
        Some(v) => Ok(v),
    }
}

/// Time-bounded history for one vehicle
#[utoipa::path(
    get,
    path = "/telematics/history",
    params(
        ("vehicle" = String, Query, description = "Vehicle number"),
        ("startMs" = Option<i64>, Query, description = "Inclusive start, epoch milliseconds"),
        ("endMs" = Option<i64>, Query, description = "Inclusive end, epoch milliseconds"),
        ("dataset" = Option<String>, Query, description = "gps, can, fuel, distance (comma separated) or all"),
        ("limit" = Option<u64>, Query, description = "Rows per dataset (default 500, max 5000)")
    ),
    responses(
        (status = 200, description = "History rows, oldest first", body = HistoryResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError)
    ),
    tag = "telematics"
)]
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let request = parse_history_params(&params)?;
    let rows = HistoryRepository::new(state.db.clone())
        .query_many(&request.datasets, &request.query)
        .await?;

    Ok(Json(HistoryResponse {
        vehicle_no: request.query.vehicle_no,
        datasets: request.datasets,
        start: request.query.start,
        end: request.query.end,
        rows,
    }))
}

/// History as a downloadable CSV or JSON file
#[utoipa::path(
    get,
    path = "/telematics/export",
    params(
        ("vehicle" = String, Query, description = "Vehicle number"),
        ("startMs" = Option<i64>, Query, description = "Inclusive start, epoch milliseconds"),
        ("endMs" = Option<i64>, Query, description = "Inclusive end, epoch milliseconds"),
        ("dataset" = Option<String>, Query, description = "gps, can, fuel, distance (comma separated) or all"),
        ("limit" = Option<u64>, Query, description = "Rows per dataset (default 500, max 5000)"),
        ("format" = Option<String>, Query, description = "csv (default) or json")
    ),
    responses(
        (status = 200, description = "Export file", content_type = "text/csv"),
        (status = 400, description = "Invalid query parameters", body = ApiError)
    ),
    tag = "telematics"
)]
pub async fn export(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let format = params
        .format
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "csv".to_string());
    if format != "csv" && format != "json" {
        return Err(validation_error(
            "Invalid format",
            json!({ "format": "expected csv or json" }),
        ));
    }

    let request = parse_history_params(&params)?;
    let rows = HistoryRepository::new(state.db.clone())
        .query_many(&request.datasets, &request.query)
        .await?;

    let stem = export_file_stem(&request.query.vehicle_no, &request.datasets);
    let content_type = if format == "json" {
        "application/json"
    } else {
        "text/csv; charset=utf-8"
    };

    let disposition = format!("attachment; filename=\"{stem}.{format}\"");
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export_body(rows, format == "json"),
    )
        .into_response())
}

/// Streams the export one row per chunk. The row count is bounded by the per-dataset limit.
fn export_body(rows: Vec<HistoryRow>, as_json: bool) -> Body {
    if as_json {
        let items = stream::iter(rows.into_iter().enumerate()).map(|(index, row)| {
            let separator = if index == 0 { "" } else { "," };
            serde_json::to_string(&row).map(|item| format!("{separator}{item}"))
        });
        let chunks = stream::once(ready(Ok("[".to_string())))
            .chain(items)
            .chain(stream::once(ready(Ok::<_, serde_json::Error>("]".to_string()))));
        Body::from_stream(chunks)
    } else {
        let lines = stream::iter(rows).map(|row| Ok::<_, Infallible>(csv_line(&row)));
        Body::from_stream(stream::once(ready(Ok(csv_header()))).chain(lines))
    }
}

fn export_file_stem(vehicle_no: &str, datasets: &[Dataset]) -> String {
    let vehicle: String = vehicle_no
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let datasets: Vec<&str> = datasets.iter().map(Dataset::as_str).collect();
    format!("telemetry-{vehicle}-{}", datasets.join("_"))
}

/// CSV header with one column per known value.
fn csv_header() -> String {
    let mut out = String::from("dataset,vehicle_no,recorded_at");
    for column in HistoryRow::VALUE_COLUMNS {
        out.push(',');
        out.push_str(column);
    }
    out.push('\n');
    out
}

fn csv_line(row: &HistoryRow) -> String {
    let mut out = String::new();
    out.push_str(row.dataset.as_str());
    out.push(',');
    out.push_str(&csv_field(&row.vehicle_no));
    out.push(',');
    out.push_str(&row.recorded_at.to_rfc3339());
    for column in HistoryRow::VALUE_COLUMNS {
        out.push(',');
        let cell = match row.values.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        };
        out.push_str(&csv_field(&cell));
    }
    out.push('\n');
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
