//! History repository: append-only archives for every backfilled dataset.
//!
//! Inserts go through `ON CONFLICT DO NOTHING` on each table's natural key, so replaying an
//! overlapping window is a no-op for rows already stored. The returned counts are rows that
//! were actually new.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Dataset, history_can, history_distance, history_fuel, history_gps, to_db_time};
use crate::provider::parse::{CanReading, DistanceReading, FuelReading, GpsReading};

/// Rows per INSERT statement; keeps SQLite under its bound-parameter limit.
const INSERT_CHUNK: usize = 500;

/// Time-bounded read of one vehicle's history.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub vehicle_no: String,
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub end: Option<DateTime<Utc>>,
    pub limit: u64,
}

/// One history record flattened for the API and exports.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryRow {
    pub dataset: Dataset,
    pub vehicle_no: String,
    /// Reading timestamp; window start for distance rows
    pub recorded_at: DateTime<Utc>,
    /// Typed fields of the reading keyed by column name
    #[schema(value_type = Object)]
    pub values: Map<String, JsonValue>,
}

impl HistoryRow {
    /// Union of value columns across datasets, in export order.
    pub const VALUE_COLUMNS: [&'static str; 14] = [
        "latitude",
        "longitude",
        "speed_kmh",
        "heading",
        "ignition",
        "odometer_km",
        "soc_pct",
        "battery_voltage",
        "battery_current",
        "battery_temp_c",
        "fuel_level",
        "unit",
        "window_end",
        "distance_km",
    ];
}

fn values(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

impl From<history_gps::Model> for HistoryRow {
    fn from(row: history_gps::Model) -> Self {
        Self {
            dataset: Dataset::Gps,
            vehicle_no: row.vehicle_no,
            recorded_at: row.recorded_at.with_timezone(&Utc),
            values: values(json!({
                "latitude": row.latitude,
                "longitude": row.longitude,
                "speed_kmh": row.speed_kmh,
                "heading": row.heading,
                "ignition": row.ignition,
                "odometer_km": row.odometer_km,
            })),
        }
    }
}

impl From<history_can::Model> for HistoryRow {
    fn from(row: history_can::Model) -> Self {
        Self {
            dataset: Dataset::Can,
            vehicle_no: row.vehicle_no,
            recorded_at: row.recorded_at.with_timezone(&Utc),
            values: values(json!({
                "soc_pct": row.soc_pct,
                "battery_voltage": row.battery_voltage,
                "battery_current": row.battery_current,
                "battery_temp_c": row.battery_temp_c,
                "odometer_km": row.odometer_km,
            })),
        }
    }
}

impl From<history_fuel::Model> for HistoryRow {
    fn from(row: history_fuel::Model) -> Self {
        Self {
            dataset: Dataset::Fuel,
            vehicle_no: row.vehicle_no,
            recorded_at: row.recorded_at.with_timezone(&Utc),
            values: values(json!({
                "fuel_level": row.fuel_level,
                "unit": row.unit,
            })),
        }
    }
}

impl From<history_distance::Model> for HistoryRow {
    fn from(row: history_distance::Model) -> Self {
        Self {
            dataset: Dataset::Distance,
            vehicle_no: row.vehicle_no,
            recorded_at: row.window_start.with_timezone(&Utc),
            values: values(json!({
                "window_end": row.window_end.with_timezone(&Utc).to_rfc3339(),
                "distance_km": row.distance_km,
            })),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryRepository {
    db: DatabaseConnection,
}

impl HistoryRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn insert_gps(&self, vehicle_no: &str, readings: &[GpsReading]) -> Result<u64, DbErr> {
        let now = to_db_time(Utc::now());
        let mut seen = HashSet::new();
        let rows: Vec<history_gps::ActiveModel> = readings
            .iter()
            .filter(|r| seen.insert(r.recorded_at))
            .map(|r| history_gps::ActiveModel {
                id: Set(Uuid::new_v4()),
                vehicle_no: Set(vehicle_no.to_string()),
                recorded_at: Set(to_db_time(r.recorded_at)),
                latitude: Set(r.latitude),
                longitude: Set(r.longitude),
                speed_kmh: Set(r.speed_kmh),
                heading: Set(r.heading),
                ignition: Set(r.ignition),
                odometer_km: Set(r.odometer_km.clone()),
                raw: Set(r.raw.clone()),
                created_at: Set(now),
            })
            .collect();

        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK) {
            inserted += history_gps::Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        history_gps::Column::VehicleNo,
                        history_gps::Column::RecordedAt,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(&self.db)
                .await?;
        }
        Ok(inserted)
    }

    pub async fn insert_can(&self, vehicle_no: &str, readings: &[CanReading]) -> Result<u64, DbErr> {
        let now = to_db_time(Utc::now());
        let mut seen = HashSet::new();
        let rows: Vec<history_can::ActiveModel> = readings
            .iter()
            .filter(|r| seen.insert(r.recorded_at))
            .map(|r| history_can::ActiveModel {
                id: Set(Uuid::new_v4()),
                vehicle_no: Set(vehicle_no.to_string()),
                recorded_at: Set(to_db_time(r.recorded_at)),
                soc_pct: Set(r.soc_pct.clone()),
                battery_voltage: Set(r.battery_voltage.clone()),
                battery_current: Set(r.battery_current.clone()),
                battery_temp_c: Set(r.battery_temp_c.clone()),
                odometer_km: Set(r.odometer_km.clone()),
                raw: Set(r.raw.clone()),
                created_at: Set(now),
            })
            .collect();

        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK) {
            inserted += history_can::Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        history_can::Column::VehicleNo,
                        history_can::Column::RecordedAt,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(&self.db)
                .await?;
        }
        Ok(inserted)
    }

    pub async fn insert_fuel(&self, vehicle_no: &str, readings: &[FuelReading]) -> Result<u64, DbErr> {
        let now = to_db_time(Utc::now());
        let mut seen = HashSet::new();
        let rows: Vec<history_fuel::ActiveModel> = readings
            .iter()
            .filter(|r| seen.insert((r.recorded_at, r.unit.clone())))
            .map(|r| history_fuel::ActiveModel {
                id: Set(Uuid::new_v4()),
                vehicle_no: Set(vehicle_no.to_string()),
                recorded_at: Set(to_db_time(r.recorded_at)),
                fuel_level: Set(r.fuel_level.clone()),
                unit: Set(r.unit.clone()),
                raw: Set(r.raw.clone()),
                created_at: Set(now),
            })
            .collect();

        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK) {
            inserted += history_fuel::Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        history_fuel::Column::VehicleNo,
                        history_fuel::Column::RecordedAt,
                        history_fuel::Column::Unit,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(&self.db)
                .await?;
        }
        Ok(inserted)
    }

    /// Store the distance travelled over one window. Returns 0 when the window was
    /// already recorded.
    pub async fn insert_distance(
        &self,
        vehicle_no: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        reading: &DistanceReading,
    ) -> Result<u64, DbErr> {
        let row = history_distance::ActiveModel {
            id: Set(Uuid::new_v4()),
            vehicle_no: Set(vehicle_no.to_string()),
            window_start: Set(to_db_time(window_start)),
            window_end: Set(to_db_time(window_end)),
            distance_km: Set(reading.distance_km.clone()),
            raw: Set(reading.raw.clone()),
            created_at: Set(to_db_time(Utc::now())),
        };

        history_distance::Entity::insert_many([row])
            .on_conflict(
                OnConflict::columns([
                    history_distance::Column::VehicleNo,
                    history_distance::Column::WindowStart,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
    }

    /// Read one dataset for a vehicle, oldest first.
    pub async fn query(&self, dataset: Dataset, q: &HistoryQuery) -> Result<Vec<HistoryRow>, DbErr> {
        let start = q.start.map(to_db_time);
        let end = q.end.map(to_db_time);

        let rows = match dataset {
            Dataset::Gps => {
                let mut select = history_gps::Entity::find()
                    .filter(history_gps::Column::VehicleNo.eq(q.vehicle_no.as_str()));
                if let Some(start) = start {
                    select = select.filter(history_gps::Column::RecordedAt.gte(start));
                }
                if let Some(end) = end {
                    select = select.filter(history_gps::Column::RecordedAt.lte(end));
                }
                select
                    .order_by_asc(history_gps::Column::RecordedAt)
                    .limit(q.limit)
                    .all(&self.db)
                    .await?
                    .into_iter()
                    .map(HistoryRow::from)
                    .collect()
            }
            Dataset::Can => {
                let mut select = history_can::Entity::find()
                    .filter(history_can::Column::VehicleNo.eq(q.vehicle_no.as_str()));
                if let Some(start) = start {
                    select = select.filter(history_can::Column::RecordedAt.gte(start));
                }
                if let Some(end) = end {
                    select = select.filter(history_can::Column::RecordedAt.lte(end));
                }
                select
                    .order_by_asc(history_can::Column::RecordedAt)
                    .limit(q.limit)
                    .all(&self.db)
                    .await?
                    .into_iter()
                    .map(HistoryRow::from)
                    .collect()
            }
            Dataset::Fuel => {
                let mut select = history_fuel::Entity::find()
                    .filter(history_fuel::Column::VehicleNo.eq(q.vehicle_no.as_str()));
                if let Some(start) = start {
                    select = select.filter(history_fuel::Column::RecordedAt.gte(start));
                }
                if let Some(end) = end {
                    select = select.filter(history_fuel::Column::RecordedAt.lte(end));
                }
                select
                    .order_by_asc(history_fuel::Column::RecordedAt)
                    .limit(q.limit)
                    .all(&self.db)
                    .await?
                    .into_iter()
                    .map(HistoryRow::from)
                    .collect()
            }
            Dataset::Distance => {
                let mut select = history_distance::Entity::find()
                    .filter(history_distance::Column::VehicleNo.eq(q.vehicle_no.as_str()));
                if let Some(start) = start {
                    select = select.filter(history_distance::Column::WindowStart.gte(start));
                }
                if let Some(end) = end {
                    select = select.filter(history_distance::Column::WindowStart.lte(end));
                }
                select
                    .order_by_asc(history_distance::Column::WindowStart)
                    .limit(q.limit)
                    .all(&self.db)
                    .await?
                    .into_iter()
                    .map(HistoryRow::from)
                    .collect()
            }
        };
        Ok(rows)
    }

    /// Read several datasets and merge them by timestamp; `limit` applies per dataset.
    pub async fn query_many(
        &self,
        datasets: &[Dataset],
        q: &HistoryQuery,
    ) -> Result<Vec<HistoryRow>, DbErr> {
        let mut rows = Vec::new();
        for dataset in datasets {
            rows.extend(self.query(*dataset, q).await?);
        }
        rows.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.dataset.cmp(&b.dataset))
        });
        Ok(rows)
    }
}
