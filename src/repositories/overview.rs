//! Per-table row counts and freshness for the operator overview.

use chrono::{DateTime, Utc};
use sea_orm::{
    DatabaseConnection, DbErr, EntityTrait, ModelTrait, PaginatorTrait, QueryOrder, Value,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{
    history_can, history_distance, history_fuel, history_gps, latest_can, latest_fuel,
    latest_gps, pull_audit_log, sync_run, vehicle_device_map,
};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TableStat {
    pub table: &'static str,
    pub row_count: u64,
    /// Newest value of the table's timestamp column
    pub latest_at: Option<DateTime<Utc>>,
}

async fn table_stat<E>(
    db: &DatabaseConnection,
    table: &'static str,
    ts: E::Column,
) -> Result<TableStat, DbErr>
where
    E: EntityTrait,
    E::Model: Send + Sync,
{
    let row_count = E::find().count(db).await?;
    let newest = E::find().order_by_desc(ts).one(db).await?;
    let latest_at = newest.and_then(|model| match model.get(ts) {
        Value::ChronoDateTimeWithTimeZone(Some(at)) => Some(at.with_timezone(&Utc)),
        _ => None,
    });
    Ok(TableStat {
        table,
        row_count,
        latest_at,
    })
}

pub async fn table_stats(db: &DatabaseConnection) -> Result<Vec<TableStat>, DbErr> {
    Ok(vec![
        table_stat::<sync_run::Entity>(db, "sync_runs", sync_run::Column::StartedAt).await?,
        table_stat::<vehicle_device_map::Entity>(
            db,
            "vehicle_device_maps",
            vehicle_device_map::Column::LastSeenAt,
        )
        .await?,
        table_stat::<latest_gps::Entity>(db, "latest_gps", latest_gps::Column::RecordedAt).await?,
        table_stat::<latest_can::Entity>(db, "latest_can", latest_can::Column::RecordedAt).await?,
        table_stat::<latest_fuel::Entity>(db, "latest_fuel", latest_fuel::Column::RecordedAt)
            .await?,
        table_stat::<history_gps::Entity>(db, "history_gps", history_gps::Column::RecordedAt)
            .await?,
        table_stat::<history_can::Entity>(db, "history_can", history_can::Column::RecordedAt)
            .await?,
        table_stat::<history_fuel::Entity>(db, "history_fuel", history_fuel::Column::RecordedAt)
            .await?,
        table_stat::<history_distance::Entity>(
            db,
            "history_distance",
            history_distance::Column::WindowEnd,
        )
        .await?,
        table_stat::<pull_audit_log::Entity>(
            db,
            "pull_audit_logs",
            pull_audit_log::Column::RequestedAt,
        )
        .await?,
    ])
}
