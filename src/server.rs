//! # Server Configuration
//!
//! Router, shared state, OpenAPI document, and the HTTP server lifecycle.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::backfill::BackfillHandle;
use crate::config::AppConfig;
use crate::handlers::{self, historical_sync, telematics};
use crate::sync::SyncCoordinator;
use crate::telemetry::{self, TraceContext};

/// Header carrying the request correlation id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub coordinator: SyncCoordinator,
    pub backfill: BackfillHandle,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let telematics_routes = Router::new()
        .route("/overview", get(telematics::overview))
        .route("/trigger-sync", post(telematics::trigger_sync))
        .route("/runs", get(telematics::list_runs))
        .route("/runs/{id}", get(telematics::get_run))
        .route("/vehicles", get(telematics::list_vehicles))
        .route("/history", get(telematics::history))
        .route("/export", get(telematics::export))
        .route("/historical-sync/status", get(historical_sync::status))
        .route("/historical-sync/start", post(historical_sync::start))
        .route("/historical-sync/pause", post(historical_sync::pause))
        .route("/historical-sync/resume", post(historical_sync::resume))
        .route("/historical-sync/run-once", post(historical_sync::run_once));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .nest("/telematics", telematics_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Scope every request in a trace context and echo its id back.
async fn trace_context(request: Request, next: Next) -> Response {
    let context = TraceContext::from_header(
        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    let trace_id = context.trace_id.clone();

    let mut response = telemetry::with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Serve until `shutdown` fires.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::telematics::overview,
        crate::handlers::telematics::trigger_sync,
        crate::handlers::telematics::list_runs,
        crate::handlers::telematics::get_run,
        crate::handlers::telematics::list_vehicles,
        crate::handlers::telematics::history,
        crate::handlers::telematics::export,
        crate::handlers::historical_sync::status,
        crate::handlers::historical_sync::start,
        crate::handlers::historical_sync::pause,
        crate::handlers::historical_sync::resume,
        crate::handlers::historical_sync::run_once,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::Dataset,
            crate::models::JobStatus,
            crate::models::RunErrorEntry,
            crate::error::ApiError,
            crate::sync::RunSummary,
            crate::backfill::JobControlView,
            crate::backfill::BatchReport,
            crate::repositories::TableStat,
            crate::repositories::DatasetProgress,
            crate::repositories::HistoryRow,
            crate::handlers::types::HealthResponse,
            crate::handlers::types::OverviewResponse,
            crate::handlers::types::LatestPreview,
            crate::handlers::types::RunsResponse,
            crate::handlers::types::RunItemInfo,
            crate::handlers::types::RunDetailResponse,
            crate::handlers::types::VehicleInfo,
            crate::handlers::types::VehiclesResponse,
            crate::handlers::types::HistoryResponse,
            crate::handlers::types::CheckpointInfo,
            crate::handlers::types::HistoricalSyncStatus,
            crate::handlers::types::StartHistoricalSyncRequest,
        )
    ),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "telematics", description = "Live sync runs, roster, latest state and history"),
        (name = "historical-sync", description = "Historical backfill control"),
    ),
    info(
        title = "Fleet Telemetry API",
        description = "Telematics sync and historical backfill for fleet dashboards",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
