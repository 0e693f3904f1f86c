//! Tracing/log bootstrap, request trace ids, and metric descriptions.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};
use uuid::Uuid;

use crate::config::AppConfig;

/// Counter of finished runs, labelled by `trigger` and final `status`.
pub const SYNC_RUNS_TOTAL: &str = "telematics_sync_runs_total";
/// Counter of provider calls, labelled by `endpoint` and `outcome`.
pub const PROVIDER_CALLS_TOTAL: &str = "telematics_provider_calls_total";
/// Counter of backfill windows, labelled by `dataset` and `outcome`.
pub const BACKFILL_WINDOWS_TOTAL: &str = "telematics_backfill_windows_total";
/// Histogram of wall-clock run duration.
pub const SYNC_RUN_DURATION_MS: &str = "telematics_sync_run_duration_ms";

/// Request correlation id carried for the lifetime of one HTTP request.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Use the caller-supplied id when present, otherwise mint one.
    pub fn from_header(value: Option<&str>) -> Self {
        let trace_id = value
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        Self { trace_id }
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install the global subscriber once. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    // sqlx reports through `log`
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "Warning: failed to install log tracer bridge: {}. `log::` records will not reach tracing.",
                err
            );
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().with_current_span(true).boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!(
            "Warning: failed to set global tracing subscriber: {}. Default subscriber remains in effect.",
            err
        );
    }

    describe_metrics();

    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(SYNC_RUNS_TOTAL, "Finished sync runs by trigger and status");
    metrics::describe_counter!(
        PROVIDER_CALLS_TOTAL,
        "Telematics provider calls by endpoint and outcome"
    );
    metrics::describe_counter!(
        BACKFILL_WINDOWS_TOTAL,
        "Backfill windows processed by dataset and outcome"
    );
    metrics::describe_histogram!(
        SYNC_RUN_DURATION_MS,
        metrics::Unit::Milliseconds,
        "Wall-clock duration of a sync run"
    );
}

/// Run `future` with `context` available to [`current_trace_id`].
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Trace id of the request the current task is serving, if any.
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trace_id_is_scoped_to_the_future() {
        assert!(current_trace_id().is_none());

        let seen = with_trace_context(TraceContext::from_header(Some("req-42")), async {
            current_trace_id()
        })
        .await;

        assert_eq!(seen.as_deref(), Some("req-42"));
        assert!(current_trace_id().is_none());
    }

    #[test]
    fn blank_header_generates_an_id() {
        let ctx = TraceContext::from_header(Some("   "));
        assert_eq!(ctx.trace_id.len(), 32);
    }
}
