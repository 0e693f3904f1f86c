//! Run status classification and the summary returned to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::sync_run;
use crate::models::{RunErrorEntry, RunStatus, SyncTrigger};

/// Final status of a live run.
///
/// Zero discovered vehicles is a failure whether the roster call errored or returned an
/// empty list; any recorded error makes an otherwise useful run partial.
pub fn classify_run(vehicles_discovered: usize, error_count: usize) -> RunStatus {
    if vehicles_discovered == 0 {
        RunStatus::Failed
    } else if error_count > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Success
    }
}

/// Summary of a run as stored on its row.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunSummary {
    pub id: Uuid,
    pub trigger: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub vehicles_discovered: i32,
    pub vehicles_processed: i32,
    pub endpoints_called: i32,
    pub records_written: i32,
    pub error_count: i32,
    pub errors: Vec<RunErrorEntry>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn run_status(&self) -> Option<RunStatus> {
        self.status.parse().ok()
    }

    pub fn trigger_kind(&self) -> Option<SyncTrigger> {
        self.trigger.parse().ok()
    }
}

impl From<sync_run::Model> for RunSummary {
    fn from(run: sync_run::Model) -> Self {
        let errors = run
            .errors
            .and_then(|value| serde_json::from_value::<Vec<RunErrorEntry>>(value).ok())
            .unwrap_or_default();
        Self {
            id: run.id,
            trigger: run.trigger,
            status: run.status,
            started_at: run.started_at.with_timezone(&Utc),
            finished_at: run.finished_at.map(|at| at.with_timezone(&Utc)),
            vehicles_discovered: run.vehicles_discovered,
            vehicles_processed: run.vehicles_processed,
            endpoints_called: run.endpoints_called,
            records_written: run.records_written,
            error_count: run.error_count,
            errors,
            window_start: run.window_start.map(|at| at.with_timezone(&Utc)),
            window_end: run.window_end.map(|at| at.with_timezone(&Utc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zero_vehicles_always_fails() {
        assert_eq!(classify_run(0, 0), RunStatus::Failed);
        assert_eq!(classify_run(0, 3), RunStatus::Failed);
    }

    #[test]
    fn errors_make_a_run_partial() {
        assert_eq!(classify_run(5, 1), RunStatus::Partial);
        assert_eq!(classify_run(5, 0), RunStatus::Success);
    }

    #[test]
    fn summary_parses_stored_error_list() {
        let now = Utc::now().fixed_offset();
        let run = sync_run::Model {
            id: Uuid::new_v4(),
            trigger: "manual".to_string(),
            lock_key: "live".to_string(),
            status: "partial".to_string(),
            started_at: now,
            finished_at: Some(now),
            vehicles_discovered: 2,
            vehicles_processed: 2,
            endpoints_called: 7,
            records_written: 5,
            error_count: 1,
            errors: Some(json!([{"endpoint": "gps-latest", "vehicle_no": "V2", "message": "timeout"}])),
            window_start: None,
            window_end: None,
            created_at: now,
            updated_at: now,
        };

        let summary = RunSummary::from(run);
        assert_eq!(summary.run_status(), Some(RunStatus::Partial));
        assert_eq!(summary.trigger_kind(), Some(SyncTrigger::Manual));
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].vehicle_no.as_deref(), Some("V2"));
    }
}
