//! # Repository Layer
//!
//! Repositories wrap SeaORM operations for the telemetry store. Each owns a cloned
//! `DatabaseConnection` and keeps every write to a single statement or a short transaction,
//! so a run that fails partway leaves earlier rows intact.

pub mod checkpoint;
pub mod history;
pub mod latest_state;
pub mod overview;
pub mod run_ledger;
pub mod vehicle_map;

pub use checkpoint::{CheckpointRepository, DatasetProgress, JobControlRepository, JobSettings};
pub use history::{HistoryQuery, HistoryRepository, HistoryRow};
pub use latest_state::{LatestStateRepository, UpsertOutcome};
pub use overview::{TableStat, table_stats};
pub use run_ledger::{CallOutcome, CallRecord, RunLedger, RunTotals};
pub use vehicle_map::{RosterUpsert, VehicleMapRepository};
