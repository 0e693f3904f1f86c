//! Vehicle/device roster repository.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::models::to_db_time;
use crate::models::vehicle_device_map::{self, Entity as VehicleDeviceMap};
use crate::provider::parse::RosterEntry;

/// Row counts from one roster upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterUpsert {
    pub inserted: u32,
    pub updated: u32,
    pub device_changes: u32,
}

impl RosterUpsert {
    pub fn written(&self) -> u32 {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone)]
pub struct VehicleMapRepository {
    db: DatabaseConnection,
}

impl VehicleMapRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Inserts new vehicles and refreshes known ones. Each row is its own atomic write.
    pub async fn upsert_roster(
        &self,
        run_id: Uuid,
        entries: &[RosterEntry],
        seen_at: DateTime<Utc>,
    ) -> Result<RosterUpsert, DbErr> {
        let seen_at = to_db_time(seen_at);
        let mut stats = RosterUpsert::default();

        for entry in entries {
            match VehicleDeviceMap::find_by_id(entry.vehicle_no.clone())
                .one(&self.db)
                .await?
            {
                Some(existing) => {
                    if existing.device_no != entry.device_no {
                        tracing::info!(
                            vehicle_no = %entry.vehicle_no,
                            previous_device = %existing.device_no,
                            device_no = %entry.device_no,
                            "Vehicle device changed"
                        );
                        stats.device_changes += 1;
                    }

                    let mut am: vehicle_device_map::ActiveModel = existing.into();
                    am.device_no = Set(entry.device_no.clone());
                    am.active = Set(true);
                    am.last_seen_at = Set(seen_at);
                    am.last_run_id = Set(Some(run_id));
                    am.raw = Set(Some(entry.raw.clone()));
                    am.updated_at = Set(seen_at);
                    am.update(&self.db).await?;
                    stats.updated += 1;
                }
                None => {
                    vehicle_device_map::ActiveModel {
                        vehicle_no: Set(entry.vehicle_no.clone()),
                        device_no: Set(entry.device_no.clone()),
                        active: Set(true),
                        first_seen_at: Set(seen_at),
                        last_seen_at: Set(seen_at),
                        last_run_id: Set(Some(run_id)),
                        raw: Set(Some(entry.raw.clone())),
                        updated_at: Set(seen_at),
                    }
                    .insert(&self.db)
                    .await?;
                    stats.inserted += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Flags active vehicles absent from `present` as inactive. Rows are never deleted.
    pub async fn retire_missing(
        &self,
        present: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        if present.is_empty() {
            return Ok(0);
        }

        let result = VehicleDeviceMap::update_many()
            .col_expr(vehicle_device_map::Column::Active, Expr::value(false))
            .col_expr(vehicle_device_map::Column::UpdatedAt, Expr::value(to_db_time(at)))
            .filter(vehicle_device_map::Column::Active.eq(true))
            .filter(vehicle_device_map::Column::VehicleNo.is_not_in(present.iter().cloned()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<vehicle_device_map::Model>, DbErr> {
        let mut query = VehicleDeviceMap::find().order_by_asc(vehicle_device_map::Column::VehicleNo);
        if active_only {
            query = query.filter(vehicle_device_map::Column::Active.eq(true));
        }
        query.all(&self.db).await
    }

    pub async fn find(&self, vehicle_no: &str) -> Result<Option<vehicle_device_map::Model>, DbErr> {
        VehicleDeviceMap::find_by_id(vehicle_no.to_string())
            .one(&self.db)
            .await
    }

    /// Vehicle numbers walked by the backfill, in stable order.
    pub async fn active_vehicle_nos(&self) -> Result<Vec<String>, DbErr> {
        VehicleDeviceMap::find()
            .select_only()
            .column(vehicle_device_map::Column::VehicleNo)
            .filter(vehicle_device_map::Column::Active.eq(true))
            .order_by_asc(vehicle_device_map::Column::VehicleNo)
            .into_tuple::<String>()
            .all(&self.db)
            .await
    }
}
