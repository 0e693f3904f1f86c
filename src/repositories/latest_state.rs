//! Latest-state repository: one row per vehicle per dataset.
//!
//! Writes are keyed by vehicle number and overwrite the stored snapshot, except when the
//! incoming reading is older than the stored one. Those are reported as
//! [`UpsertOutcome::Stale`] and leave the row untouched so the stored timestamp stays the
//! newest ever observed.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::models::{latest_can, latest_fuel, latest_gps, to_db_time};
use crate::provider::parse::{CanReading, FuelReading, GpsReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Incoming reading predates the stored one; nothing written
    Stale,
}

impl UpsertOutcome {
    pub fn rows_written(&self) -> i32 {
        match self {
            UpsertOutcome::Inserted | UpsertOutcome::Updated => 1,
            UpsertOutcome::Stale => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatestStateRepository {
    db: DatabaseConnection,
}

impl LatestStateRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn upsert_gps(
        &self,
        vehicle_no: &str,
        run_id: Uuid,
        reading: &GpsReading,
    ) -> Result<UpsertOutcome, DbErr> {
        let now = to_db_time(Utc::now());
        let recorded_at = to_db_time(reading.recorded_at);
        let existing = latest_gps::Entity::find_by_id(vehicle_no.to_string())
            .one(&self.db)
            .await?;

        let (mut am, outcome) = match existing {
            Some(row) if row.recorded_at > recorded_at => return Ok(UpsertOutcome::Stale),
            Some(row) => (row.into_active_model(), UpsertOutcome::Updated),
            None => (
                latest_gps::ActiveModel {
                    vehicle_no: Set(vehicle_no.to_string()),
                    ..Default::default()
                },
                UpsertOutcome::Inserted,
            ),
        };

        am.recorded_at = Set(recorded_at);
        am.latitude = Set(reading.latitude);
        am.longitude = Set(reading.longitude);
        am.speed_kmh = Set(reading.speed_kmh);
        am.heading = Set(reading.heading);
        am.ignition = Set(reading.ignition);
        am.odometer_km = Set(reading.odometer_km.clone());
        am.raw = Set(reading.raw.clone());
        am.run_id = Set(Some(run_id));
        am.updated_at = Set(now);

        if outcome == UpsertOutcome::Inserted {
            am.insert(&self.db).await?;
        } else {
            am.update(&self.db).await?;
        }
        Ok(outcome)
    }

    pub async fn upsert_can(
        &self,
        vehicle_no: &str,
        run_id: Uuid,
        reading: &CanReading,
    ) -> Result<UpsertOutcome, DbErr> {
        let now = to_db_time(Utc::now());
        let recorded_at = to_db_time(reading.recorded_at);
        let existing = latest_can::Entity::find_by_id(vehicle_no.to_string())
            .one(&self.db)
            .await?;

        let (mut am, outcome) = match existing {
            Some(row) if row.recorded_at > recorded_at => return Ok(UpsertOutcome::Stale),
            Some(row) => (row.into_active_model(), UpsertOutcome::Updated),
            None => (
                latest_can::ActiveModel {
                    vehicle_no: Set(vehicle_no.to_string()),
                    ..Default::default()
                },
                UpsertOutcome::Inserted,
            ),
        };

        am.recorded_at = Set(recorded_at);
        am.soc_pct = Set(reading.soc_pct.clone());
        am.battery_voltage = Set(reading.battery_voltage.clone());
        am.battery_current = Set(reading.battery_current.clone());
        am.battery_temp_c = Set(reading.battery_temp_c.clone());
        am.odometer_km = Set(reading.odometer_km.clone());
        am.raw = Set(reading.raw.clone());
        am.run_id = Set(Some(run_id));
        am.updated_at = Set(now);

        if outcome == UpsertOutcome::Inserted {
            am.insert(&self.db).await?;
        } else {
            am.update(&self.db).await?;
        }
        Ok(outcome)
    }

    pub async fn upsert_fuel(
        &self,
        vehicle_no: &str,
        run_id: Uuid,
        reading: &FuelReading,
    ) -> Result<UpsertOutcome, DbErr> {
        let now = to_db_time(Utc::now());
        let recorded_at = to_db_time(reading.recorded_at);
        let existing = latest_fuel::Entity::find_by_id(vehicle_no.to_string())
            .one(&self.db)
            .await?;

        let (mut am, outcome) = match existing {
            Some(row) if row.recorded_at > recorded_at => return Ok(UpsertOutcome::Stale),
            Some(row) => (row.into_active_model(), UpsertOutcome::Updated),
            None => (
                latest_fuel::ActiveModel {
                    vehicle_no: Set(vehicle_no.to_string()),
                    ..Default::default()
                },
                UpsertOutcome::Inserted,
            ),
        };

        am.recorded_at = Set(recorded_at);
        am.fuel_level = Set(reading.fuel_level.clone());
        am.unit = Set(reading.unit.clone());
        am.raw = Set(reading.raw.clone());
        am.run_id = Set(Some(run_id));
        am.updated_at = Set(now);

        if outcome == UpsertOutcome::Inserted {
            am.insert(&self.db).await?;
        } else {
            am.update(&self.db).await?;
        }
        Ok(outcome)
    }

    pub async fn gps_for(&self, vehicle_no: &str) -> Result<Option<latest_gps::Model>, DbErr> {
        latest_gps::Entity::find_by_id(vehicle_no.to_string())
            .one(&self.db)
            .await
    }

    /// Most recently refreshed rows, for dashboard previews.
    pub async fn recent_gps(&self, limit: u64) -> Result<Vec<latest_gps::Model>, DbErr> {
        latest_gps::Entity::find()
            .order_by_desc(latest_gps::Column::RecordedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }

    pub async fn recent_can(&self, limit: u64) -> Result<Vec<latest_can::Model>, DbErr> {
        latest_can::Entity::find()
            .order_by_desc(latest_can::Column::RecordedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }

    pub async fn recent_fuel(&self, limit: u64) -> Result<Vec<latest_fuel::Model>, DbErr> {
        latest_fuel::Entity::find()
            .order_by_desc(latest_fuel::Column::RecordedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }
}
