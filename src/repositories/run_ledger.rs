//! # Run Ledger
//!
//! Persistence for `sync_runs`, their per-call `sync_run_items`, and the forensic
//! `pull_audit_logs` mirror. A run row doubles as the mutual-exclusion sentinel: the
//! partial unique index on `lock_key WHERE status = 'running'` lets at most one open run
//! exist per lock key across every process sharing the database.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait, UpdateMany,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::sync_run::{self, RunErrorEntry, RunStatus, SyncTrigger};
use crate::models::{pull_audit_log, sync_run_item, to_db_time};
use crate::sync::SyncError;

/// Outcome of a single provider call as stored on its run item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// Call succeeded but the reading was older than what is already stored
    Stale,
    Failure,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Stale => "stale",
            CallOutcome::Failure => "failure",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, CallOutcome::Failure)
    }
}

/// Everything recorded about one provider call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub run_id: Uuid,
    pub endpoint: String,
    pub vehicle_no: Option<String>,
    pub outcome: CallOutcome,
    pub records_written: i32,
    pub payload: Option<JsonValue>,
    pub error: Option<String>,
}

/// Aggregates written when a run is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunTotals {
    pub status: RunStatus,
    pub vehicles_discovered: i32,
    pub vehicles_processed: i32,
    pub endpoints_called: i32,
    pub records_written: i32,
    pub errors: Vec<RunErrorEntry>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RunLedger {
    db: DatabaseConnection,
}

impl RunLedger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Opens a run, first closing any abandoned `running` row for the same lock key.
    ///
    /// Returns [`SyncError::AlreadyRunning`] when a live run already holds the lock.
    pub async fn begin_run(
        &self,
        trigger: SyncTrigger,
        stale_after: Duration,
    ) -> Result<sync_run::Model, SyncError> {
        let now = Utc::now();
        let lock_key = trigger.lock_key();

        let expired = self.expire_stale_runs(lock_key, now - stale_after).await?;
        if expired > 0 {
            tracing::warn!(lock_key, expired, "Closed abandoned runs before starting a new one");
        }

        let run = sync_run::ActiveModel {
            id: Set(Uuid::new_v4()),
            trigger: Set(trigger.as_str().to_string()),
            lock_key: Set(lock_key.to_string()),
            status: Set(RunStatus::Running.as_str().to_string()),
            started_at: Set(to_db_time(now)),
            finished_at: Set(None),
            vehicles_discovered: Set(0),
            vehicles_processed: Set(0),
            endpoints_called: Set(0),
            records_written: Set(0),
            error_count: Set(0),
            errors: Set(None),
            window_start: Set(None),
            window_end: Set(None),
            created_at: Set(to_db_time(now)),
            updated_at: Set(to_db_time(now)),
        };

        match run.insert(&self.db).await {
            Ok(model) => Ok(model),
            Err(err) if is_unique_violation(&err) => Err(SyncError::AlreadyRunning {
                lock_key: lock_key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Marks `running` rows with no activity since `cutoff` as failed.
    ///
    /// Every recorded call refreshes `updated_at`, so a long batch that keeps making
    /// progress is never mistaken for an abandoned one.
    pub async fn expire_stale_runs(
        &self,
        lock_key: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        self.close_as_failed(
            "run abandoned without finishing; closed by a later run",
            |update| {
                update
                    .filter(sync_run::Column::LockKey.eq(lock_key))
                    .filter(sync_run::Column::UpdatedAt.lt(to_db_time(cutoff)))
            },
        )
        .await
    }

    /// Closes a still-running run as failed after its regular close could not be written.
    pub async fn abandon_run(&self, run_id: Uuid, reason: &str) -> Result<u64, DbErr> {
        self.close_as_failed(reason, |update| {
            update.filter(sync_run::Column::Id.eq(run_id))
        })
        .await
    }

    async fn close_as_failed<F>(&self, reason: &str, scope: F) -> Result<u64, DbErr>
    where
        F: FnOnce(UpdateMany<sync_run::Entity>) -> UpdateMany<sync_run::Entity>,
    {
        let now = to_db_time(Utc::now());
        let errors = serde_json::to_value(vec![RunErrorEntry {
            endpoint: "run".to_string(),
            vehicle_no: None,
            message: reason.to_string(),
        }])
        .map_err(|e| DbErr::Custom(e.to_string()))?;

        let update = sync_run::Entity::update_many()
            .col_expr(
                sync_run::Column::Status,
                Expr::value(RunStatus::Failed.as_str()),
            )
            .col_expr(sync_run::Column::FinishedAt, Expr::value(now))
            .col_expr(sync_run::Column::UpdatedAt, Expr::value(now))
            .col_expr(sync_run::Column::ErrorCount, Expr::value(1))
            .col_expr(sync_run::Column::Errors, Expr::value(errors))
            .filter(sync_run::Column::Status.eq(RunStatus::Running.as_str()));

        let result = scope(update).exec(&self.db).await?;
        Ok(result.rows_affected)
    }

    /// Writes the run item and its audit mirror atomically, and marks the run as active.
    pub async fn record_call(&self, call: CallRecord) -> Result<(), DbErr> {
        let now = to_db_time(Utc::now());
        let txn = self.db.begin().await?;

        sync_run_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            run_id: Set(call.run_id),
            endpoint: Set(call.endpoint.clone()),
            vehicle_no: Set(call.vehicle_no.clone()),
            outcome: Set(call.outcome.as_str().to_string()),
            records_written: Set(call.records_written),
            payload: Set(call.payload.clone()),
            error: Set(call.error.clone()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        pull_audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            run_id: Set(Some(call.run_id)),
            endpoint: Set(call.endpoint),
            vehicle_no: Set(call.vehicle_no),
            success: Set(call.outcome.is_success()),
            payload: Set(call.payload),
            error: Set(call.error),
            requested_at: Set(now),
        }
        .insert(&txn)
        .await?;

        sync_run::Entity::update_many()
            .col_expr(sync_run::Column::UpdatedAt, Expr::value(now))
            .filter(sync_run::Column::Id.eq(call.run_id))
            .filter(sync_run::Column::Status.eq(RunStatus::Running.as_str()))
            .exec(&txn)
            .await?;

        txn.commit().await
    }

    /// Closes a run exactly once. A run that is no longer `running` is left untouched.
    pub async fn finish_run(&self, run_id: Uuid, totals: &RunTotals) -> Result<sync_run::Model, DbErr> {
        let run = sync_run::Entity::find_by_id(run_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("sync run {run_id}")))?;

        if run.status != RunStatus::Running.as_str() {
            tracing::warn!(run_id = %run_id, status = %run.status, "Run was already closed; keeping stored result");
            return Ok(run);
        }

        let now = to_db_time(Utc::now());
        let errors = if totals.errors.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&totals.errors).map_err(|e| DbErr::Custom(e.to_string()))?)
        };

        let mut active: sync_run::ActiveModel = run.into();
        active.status = Set(totals.status.as_str().to_string());
        active.finished_at = Set(Some(now));
        active.vehicles_discovered = Set(totals.vehicles_discovered);
        active.vehicles_processed = Set(totals.vehicles_processed);
        active.endpoints_called = Set(totals.endpoints_called);
        active.records_written = Set(totals.records_written);
        active.error_count = Set(totals.errors.len() as i32);
        active.errors = Set(errors);
        active.window_start = Set(totals.window_start.map(to_db_time));
        active.window_end = Set(totals.window_end.map(to_db_time));
        active.updated_at = Set(now);

        active.update(&self.db).await
    }

    /// Most recent runs first.
    pub async fn list_runs(
        &self,
        trigger: Option<SyncTrigger>,
        limit: u64,
    ) -> Result<Vec<sync_run::Model>, DbErr> {
        let mut query = sync_run::Entity::find().order_by_desc(sync_run::Column::StartedAt);
        if let Some(trigger) = trigger {
            query = query.filter(sync_run::Column::Trigger.eq(trigger.as_str()));
        }
        query.limit(limit).all(&self.db).await
    }

    pub async fn find_run(&self, run_id: Uuid) -> Result<Option<sync_run::Model>, DbErr> {
        sync_run::Entity::find_by_id(run_id).one(&self.db).await
    }

    /// Latest finished or running live-polling run.
    pub async fn latest_live_run(&self) -> Result<Option<sync_run::Model>, DbErr> {
        sync_run::Entity::find()
            .filter(sync_run::Column::LockKey.eq(SyncTrigger::Manual.lock_key()))
            .order_by_desc(sync_run::Column::StartedAt)
            .one(&self.db)
            .await
    }

    /// Items of a run in call order.
    pub async fn items_for_run(
        &self,
        run_id: Uuid,
        limit: u64,
    ) -> Result<Vec<sync_run_item::Model>, DbErr> {
        sync_run_item::Entity::find()
            .filter(sync_run_item::Column::RunId.eq(run_id))
            .order_by_asc(sync_run_item::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }
}
