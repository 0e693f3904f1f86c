//! Backfill checkpoints and the singleton job-control row.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::history_job_control::{self, JOB_CONTROL_ID, JobStatus};
use crate::models::{Dataset, history_checkpoint, to_db_time};

/// Seed values matching the migration's singleton row.
pub const DEFAULT_MAX_WINDOWS_PER_RUN: i32 = 48;
pub const DEFAULT_WINDOW_SECONDS: i32 = 300;

/// Checkpoint spread for one dataset.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DatasetProgress {
    pub dataset: Dataset,
    /// Vehicles with a checkpoint for this dataset
    pub vehicles: u64,
    /// Least advanced checkpoint
    pub earliest_synced_end: Option<DateTime<Utc>>,
    /// Most advanced checkpoint
    pub latest_synced_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CheckpointRepository {
    db: DatabaseConnection,
}

impl CheckpointRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(
        &self,
        vehicle_no: &str,
        dataset: Dataset,
    ) -> Result<Option<DateTime<Utc>>, DbErr> {
        let row = history_checkpoint::Entity::find_by_id((
            vehicle_no.to_string(),
            dataset.as_str().to_string(),
        ))
        .one(&self.db)
        .await?;
        Ok(row.map(|r| r.last_synced_end.with_timezone(&Utc)))
    }

    /// Every checkpoint keyed by `(vehicle_no, dataset)`. Rows with an unknown dataset are skipped.
    pub async fn all(&self) -> Result<HashMap<(String, Dataset), DateTime<Utc>>, DbErr> {
        let rows = history_checkpoint::Entity::find().all(&self.db).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let dataset = r.dataset.parse::<Dataset>().ok()?;
                Some((
                    (r.vehicle_no, dataset),
                    r.last_synced_end.with_timezone(&Utc),
                ))
            })
            .collect())
    }

    /// Move the checkpoint forward to `synced_end`. Never moves it backwards: an older value
    /// leaves the stored one in place.
    pub async fn advance(
        &self,
        vehicle_no: &str,
        dataset: Dataset,
        synced_end: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        let now = to_db_time(Utc::now());
        let end = to_db_time(synced_end);

        let seed = history_checkpoint::ActiveModel {
            vehicle_no: Set(vehicle_no.to_string()),
            dataset: Set(dataset.as_str().to_string()),
            last_synced_end: Set(end),
            updated_at: Set(now),
        };
        let inserted = history_checkpoint::Entity::insert_many([seed])
            .on_conflict(
                OnConflict::columns([
                    history_checkpoint::Column::VehicleNo,
                    history_checkpoint::Column::Dataset,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        if inserted > 0 {
            return Ok(());
        }

        history_checkpoint::Entity::update_many()
            .col_expr(history_checkpoint::Column::LastSyncedEnd, Expr::value(end))
            .col_expr(history_checkpoint::Column::UpdatedAt, Expr::value(now))
            .filter(history_checkpoint::Column::VehicleNo.eq(vehicle_no))
            .filter(history_checkpoint::Column::Dataset.eq(dataset.as_str()))
            .filter(history_checkpoint::Column::LastSyncedEnd.lt(end))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn progress(&self) -> Result<Vec<DatasetProgress>, DbErr> {
        let mut out = Vec::with_capacity(Dataset::HISTORY.len());
        for dataset in Dataset::HISTORY {
            let scoped = || {
                history_checkpoint::Entity::find()
                    .filter(history_checkpoint::Column::Dataset.eq(dataset.as_str()))
            };
            let vehicles = scoped().count(&self.db).await?;
            let earliest = scoped()
                .order_by_asc(history_checkpoint::Column::LastSyncedEnd)
                .one(&self.db)
                .await?;
            let latest = scoped()
                .order_by_desc(history_checkpoint::Column::LastSyncedEnd)
                .one(&self.db)
                .await?;
            out.push(DatasetProgress {
                dataset,
                vehicles,
                earliest_synced_end: earliest.map(|r| r.last_synced_end.with_timezone(&Utc)),
                latest_synced_end: latest.map(|r| r.last_synced_end.with_timezone(&Utc)),
            });
        }
        Ok(out)
    }

    /// Most recently advanced checkpoints.
    pub async fn recent(&self, limit: u64) -> Result<Vec<history_checkpoint::Model>, DbErr> {
        history_checkpoint::Entity::find()
            .order_by_desc(history_checkpoint::Column::UpdatedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }
}

/// Settings written by an operator `start`.
#[derive(Debug, Clone, Default)]
pub struct JobSettings {
    pub historical_start: Option<DateTime<Utc>>,
    pub max_windows_per_run: Option<u32>,
    pub window_seconds: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct JobControlRepository {
    db: DatabaseConnection,
}

impl JobControlRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Load the singleton row, recreating it with seed values if it was removed.
    pub async fn load(&self) -> Result<history_job_control::Model, DbErr> {
        if let Some(row) = history_job_control::Entity::find_by_id(JOB_CONTROL_ID)
            .one(&self.db)
            .await?
        {
            return Ok(row);
        }

        tracing::warn!("history job control row missing; reseeding");
        history_job_control::ActiveModel {
            id: Set(JOB_CONTROL_ID),
            status: Set(JobStatus::Idle.as_str().to_string()),
            historical_start_at: Set(None),
            max_windows_per_run: Set(DEFAULT_MAX_WINDOWS_PER_RUN),
            window_seconds: Set(DEFAULT_WINDOW_SECONDS),
            last_heartbeat_at: Set(None),
            last_run_id: Set(None),
            updated_at: Set(to_db_time(Utc::now())),
        }
        .insert(&self.db)
        .await
    }

    pub async fn set_status(&self, status: JobStatus) -> Result<history_job_control::Model, DbErr> {
        let mut am = self.load().await?.into_active_model();
        am.status = Set(status.as_str().to_string());
        am.updated_at = Set(to_db_time(Utc::now()));
        am.update(&self.db).await
    }

    /// Mark the job running and persist any provided settings.
    pub async fn start(&self, settings: &JobSettings) -> Result<history_job_control::Model, DbErr> {
        let mut am = self.load().await?.into_active_model();
        am.status = Set(JobStatus::Running.as_str().to_string());
        if let Some(start) = settings.historical_start {
            am.historical_start_at = Set(Some(to_db_time(start)));
        }
        if let Some(max) = settings.max_windows_per_run {
            am.max_windows_per_run = Set(i32::try_from(max).unwrap_or(i32::MAX));
        }
        if let Some(width) = settings.window_seconds {
            am.window_seconds = Set(i32::try_from(width).unwrap_or(i32::MAX));
        }
        am.updated_at = Set(to_db_time(Utc::now()));
        am.update(&self.db).await
    }

    pub async fn heartbeat(&self, run_id: Uuid) -> Result<(), DbErr> {
        let now = to_db_time(Utc::now());
        history_job_control::Entity::update_many()
            .col_expr(history_job_control::Column::LastHeartbeatAt, Expr::value(now))
            .col_expr(history_job_control::Column::LastRunId, Expr::value(run_id))
            .col_expr(history_job_control::Column::UpdatedAt, Expr::value(now))
            .filter(history_job_control::Column::Id.eq(JOB_CONTROL_ID))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
