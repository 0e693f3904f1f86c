//! # Common API Types
//!
//! Response and request bodies shared by the telematics and historical-sync handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::backfill::JobControlView;
use crate::models::{
    Dataset, history_checkpoint, latest_can, latest_fuel, latest_gps, sync_run_item,
    vehicle_device_map,
};
use crate::repositories::{DatasetProgress, HistoryRow, TableStat};
use crate::sync::RunSummary;

/// Dashboard overview
#[derive(Debug, Serialize, ToSchema)]
pub struct OverviewResponse {
    /// Most recent live polling run
    pub last_run: Option<RunSummary>,
    /// Most recent backfill batch
    pub last_backfill_run: Option<RunSummary>,
    pub tables: Vec<TableStat>,
    /// Freshest latest-state rows per dataset
    pub previews: Vec<LatestPreview>,
}

/// One latest-state row
#[derive(Debug, Serialize, ToSchema)]
pub struct LatestPreview {
    pub dataset: Dataset,
    pub vehicle_no: String,
    pub recorded_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub values: Map<String, Value>,
    pub run_id: Option<Uuid>,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl From<latest_gps::Model> for LatestPreview {
    fn from(row: latest_gps::Model) -> Self {
        Self {
            dataset: Dataset::Gps,
            vehicle_no: row.vehicle_no,
            recorded_at: row.recorded_at.with_timezone(&Utc),
            values: object(json!({
                "latitude": row.latitude,
                "longitude": row.longitude,
                "speed_kmh": row.speed_kmh,
                "heading": row.heading,
                "ignition": row.ignition,
                "odometer_km": row.odometer_km,
            })),
            run_id: row.run_id,
        }
    }
}

impl From<latest_can::Model> for LatestPreview {
    fn from(row: latest_can::Model) -> Self {
        Self {
            dataset: Dataset::Can,
            vehicle_no: row.vehicle_no,
            recorded_at: row.recorded_at.with_timezone(&Utc),
            values: object(json!({
                "soc_pct": row.soc_pct,
                "battery_voltage": row.battery_voltage,
                "battery_current": row.battery_current,
                "battery_temp_c": row.battery_temp_c,
                "odometer_km": row.odometer_km,
            })),
            run_id: row.run_id,
        }
    }
}

impl From<latest_fuel::Model> for LatestPreview {
    fn from(row: latest_fuel::Model) -> Self {
        Self {
            dataset: Dataset::Fuel,
            vehicle_no: row.vehicle_no,
            recorded_at: row.recorded_at.with_timezone(&Utc),
            values: object(json!({
                "fuel_level": row.fuel_level,
                "unit": row.unit,
            })),
            run_id: row.run_id,
        }
    }
}

/// Run listing
#[derive(Debug, Serialize, ToSchema)]
pub struct RunsResponse {
    pub runs: Vec<RunSummary>,
}

/// One provider call made during a run
#[derive(Debug, Serialize, ToSchema)]
pub struct RunItemInfo {
    pub id: Uuid,
    pub endpoint: String,
    pub vehicle_no: Option<String>,
    /// success, stale, or failure
    pub outcome: String,
    pub records_written: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<sync_run_item::Model> for RunItemInfo {
    fn from(item: sync_run_item::Model) -> Self {
        Self {
            id: item.id,
            endpoint: item.endpoint,
            vehicle_no: item.vehicle_no,
            outcome: item.outcome,
            records_written: item.records_written,
            error: item.error,
            created_at: item.created_at.with_timezone(&Utc),
        }
    }
}

/// A run with its call log
#[derive(Debug, Serialize, ToSchema)]
pub struct RunDetailResponse {
    pub run: RunSummary,
    pub items: Vec<RunItemInfo>,
}

/// Roster entry
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VehicleInfo {
    #[schema(example = "B 1234 XYZ")]
    pub vehicle_no: String,
    pub device_no: String,
    pub active: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_run_id: Option<Uuid>,
}

impl From<vehicle_device_map::Model> for VehicleInfo {
    fn from(row: vehicle_device_map::Model) -> Self {
        Self {
            vehicle_no: row.vehicle_no,
            device_no: row.device_no,
            active: row.active,
            first_seen_at: row.first_seen_at.with_timezone(&Utc),
            last_seen_at: row.last_seen_at.with_timezone(&Utc),
            last_run_id: row.last_run_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VehiclesResponse {
    pub vehicles: Vec<VehicleInfo>,
}

/// Time-bounded history read
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub vehicle_no: String,
    pub datasets: Vec<Dataset>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub rows: Vec<HistoryRow>,
}

/// One checkpoint row
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckpointInfo {
    pub vehicle_no: String,
    pub dataset: String,
    pub last_synced_end: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<history_checkpoint::Model> for CheckpointInfo {
    fn from(row: history_checkpoint::Model) -> Self {
        Self {
            vehicle_no: row.vehicle_no,
            dataset: row.dataset,
            last_synced_end: row.last_synced_end.with_timezone(&Utc),
            updated_at: row.updated_at.with_timezone(&Utc),
        }
    }
}

/// Backfill status for operators
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoricalSyncStatus {
    pub job: JobControlView,
    /// A pause was requested and may still be settling into an in-flight batch
    pub pause_requested: bool,
    pub progress: Vec<DatasetProgress>,
    pub recent_checkpoints: Vec<CheckpointInfo>,
    pub last_batch: Option<RunSummary>,
}

/// Optional body of `historical-sync/start`
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StartHistoricalSyncRequest {
    /// RFC3339 start of the backfill
    #[schema(example = "2025-01-01T00:00:00Z")]
    pub historical_start: Option<DateTime<Utc>>,
    /// Same as `historical_start`, as epoch milliseconds
    #[serde(rename = "historicalStartMs")]
    pub historical_start_ms: Option<i64>,
    /// Window budget per batch (1..=10000)
    pub max_windows_per_run: Option<u32>,
}

/// Database health
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// ok or degraded
    pub status: String,
    pub database: String,
}
