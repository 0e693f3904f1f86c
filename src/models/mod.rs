//! # Data Models
//!
//! SeaORM entities for the telemetry store plus a few shared value types.

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod dataset;
pub mod history_can;
pub mod history_checkpoint;
pub mod history_distance;
pub mod history_fuel;
pub mod history_gps;
pub mod history_job_control;
pub mod latest_can;
pub mod latest_fuel;
pub mod latest_gps;
pub mod pull_audit_log;
pub mod sync_run;
pub mod sync_run_item;
pub mod vehicle_device_map;

pub use dataset::Dataset;
pub use history_can::Entity as HistoryCan;
pub use history_checkpoint::Entity as HistoryCheckpoint;
pub use history_distance::Entity as HistoryDistance;
pub use history_fuel::Entity as HistoryFuel;
pub use history_gps::Entity as HistoryGps;
pub use history_job_control::{Entity as HistoryJobControl, JOB_CONTROL_ID, JobStatus};
pub use latest_can::Entity as LatestCan;
pub use latest_fuel::Entity as LatestFuel;
pub use latest_gps::Entity as LatestGps;
pub use pull_audit_log::Entity as PullAuditLog;
pub use sync_run::{Entity as SyncRun, RunErrorEntry, RunStatus, SyncTrigger};
pub use sync_run_item::Entity as SyncRunItem;
pub use vehicle_device_map::Entity as VehicleDeviceMap;

/// Convert a UTC instant into the column type used by every timestamp column.
pub fn to_db_time(at: DateTime<Utc>) -> DateTimeWithTimeZone {
    at.fixed_offset()
}

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "fleet-telemetry".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
