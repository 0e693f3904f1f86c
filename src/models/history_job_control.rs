//! HistoryJobControl entity model
//!
//! Singleton row (id = 1) holding the backfill status, the configured historical start,
//! the per-batch window budget, and the batch heartbeat.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Fixed identifier of the singleton row.
pub const JOB_CONTROL_ID: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "history_job_control")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub status: String,
    pub historical_start_at: Option<DateTimeWithTimeZone>,
    pub max_windows_per_run: i32,
    pub window_seconds: i32,
    pub last_heartbeat_at: Option<DateTimeWithTimeZone>,
    pub last_run_id: Option<Uuid>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed job status; unknown values read as idle.
    pub fn job_status(&self) -> JobStatus {
        self.status.parse().unwrap_or(JobStatus::Idle)
    }
}

/// Backfill job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(JobStatus::Idle),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}
