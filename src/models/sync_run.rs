//! SyncRun entity model
//!
//! One row per coordinator invocation or backfill batch. Created with status `running`,
//! finalized exactly once with aggregate counters and the structured error list.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// What started the run (scheduled, manual, backfill)
    pub trigger: String,

    /// Mutual-exclusion key; at most one `running` row may exist per key
    pub lock_key: String,

    /// Lifecycle status (running, success, partial, failed)
    pub status: String,

    pub started_at: DateTimeWithTimeZone,
    pub finished_at: Option<DateTimeWithTimeZone>,

    pub vehicles_discovered: i32,
    pub vehicles_processed: i32,
    pub endpoints_called: i32,
    pub records_written: i32,
    pub error_count: i32,

    /// Structured `{endpoint, vehicle_no?, message}` list
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub errors: Option<JsonValue>,

    /// Earliest window start touched by a backfill batch
    pub window_start: Option<DateTimeWithTimeZone>,
    /// Latest window end touched by a backfill batch
    pub window_end: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_run_item::Entity")]
    Items,
}

impl Related<super::sync_run_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Scheduled,
    Manual,
    Backfill,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Scheduled => "scheduled",
            SyncTrigger::Manual => "manual",
            SyncTrigger::Backfill => "backfill",
        }
    }

    /// Live polling runs share one lock; backfill batches hold their own.
    pub fn lock_key(&self) -> &'static str {
        match self {
            SyncTrigger::Scheduled | SyncTrigger::Manual => "live",
            SyncTrigger::Backfill => "backfill",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTrigger {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(SyncTrigger::Scheduled),
            "manual" => Ok(SyncTrigger::Manual),
            "backfill" => Ok(SyncTrigger::Backfill),
            other => Err(format!("unknown sync trigger '{other}'")),
        }
    }
}

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// One entry of the structured error list stored on a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RunErrorEntry {
    /// Provider endpoint (or internal step) that failed
    pub endpoint: String,
    /// Vehicle the call targeted, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_no: Option<String>,
    pub message: String,
}
