//! # Live Sync
//!
//! One sync run discovers the fleet roster, pulls the latest GPS, CAN and fuel snapshot for
//! every vehicle, and closes its run row with an aggregate status. Every provider call is
//! mirrored into the run items and the pull audit log whatever its outcome.

use std::sync::Arc;

use metrics::counter;
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::Value;
use thiserror::Error;

use crate::config::SyncConfig;
use crate::models::{Dataset, JobStatus};
use crate::provider::{ProviderError, TelematicsProvider, envelope_data};
use crate::repositories::{CallRecord, RunLedger};
use crate::telemetry::PROVIDER_CALLS_TOTAL;

pub mod coordinator;
pub mod latest;
pub mod mapping;
pub mod status;

pub use coordinator::SyncCoordinator;
pub use status::{RunSummary, classify_run};

/// Errors surfaced by sync runs and backfill control.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a {lock_key} run is already in progress")]
    AlreadyRunning { lock_key: String },
    #[error("cannot {action} the historical sync while it is {status}")]
    InvalidTransition {
        action: &'static str,
        status: JobStatus,
    },
    #[error("historical sync needs a start time")]
    MissingStart,
    #[error("historical sync controller is not running")]
    ControllerUnavailable,
    #[error("dataset {0} has no latest snapshot endpoint")]
    UnsupportedDataset(Dataset),
    #[error("sync task aborted: {0}")]
    TaskAborted(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Knobs for live runs, taken from `FLEET_SYNC_*`.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub vehicle_concurrency: usize,
    /// A `running` row older than this is closed before a new run starts
    pub stale_run_after: chrono::Duration,
    pub retire_missing_vehicles: bool,
}

impl SyncSettings {
    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self {
            vehicle_concurrency: cfg.vehicle_concurrency.max(1),
            stale_run_after: chrono::Duration::seconds(cfg.stale_run_seconds as i64),
            retire_missing_vehicles: cfg.retire_missing_vehicles,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Response of one provider call: the decoded body, when there was one, and the
/// envelope's `data` or the failure.
#[derive(Debug)]
pub struct ProviderReply {
    pub raw: Option<Value>,
    pub data: Result<Value, ProviderError>,
}

/// Shared handles for everything that talks to the provider and records calls.
#[derive(Clone)]
pub struct SyncContext {
    pub db: DatabaseConnection,
    pub provider: Arc<dyn TelematicsProvider>,
    pub ledger: RunLedger,
    pub settings: SyncSettings,
}

impl SyncContext {
    pub fn new(
        db: DatabaseConnection,
        provider: Arc<dyn TelematicsProvider>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            ledger: RunLedger::new(db.clone()),
            db,
            provider,
            settings,
        }
    }

    /// Issue one call and unwrap the envelope.
    pub async fn fetch(&self, endpoint: &str, body: Value) -> ProviderReply {
        match self.provider.post(endpoint, body).await {
            Ok(raw) => {
                let data = envelope_data(endpoint, &raw).cloned();
                ProviderReply {
                    raw: Some(raw),
                    data,
                }
            }
            Err(err) => ProviderReply {
                raw: err.archived_body().cloned(),
                data: Err(err),
            },
        }
    }

    /// Write the run item and audit entry for a call.
    ///
    /// A failed write is logged and swallowed: the call outcome already decided the run's
    /// counters and must not be overridden by bookkeeping.
    pub async fn record(&self, call: CallRecord) {
        counter!(
            PROVIDER_CALLS_TOTAL,
            "endpoint" => call.endpoint.clone(),
            "outcome" => call.outcome.as_str()
        )
        .increment(1);

        let run_id = call.run_id;
        let endpoint = call.endpoint.clone();
        if let Err(err) = self.ledger.record_call(call).await {
            tracing::error!(
                run_id = %run_id,
                endpoint = %endpoint,
                error = %err,
                "Failed to record provider call"
            );
        }
    }
}
