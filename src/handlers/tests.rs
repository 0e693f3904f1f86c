//! # Tests for Handlers
//!
//! Router-level tests against an in-memory database and a provider that always fails.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::backfill::BackfillController;
use crate::config::AppConfig;
use crate::provider::{ProviderError, TelematicsProvider};
use crate::server::{AppState, REQUEST_ID_HEADER, create_app};
use crate::sync::{SyncContext, SyncCoordinator, SyncSettings};

struct OfflineProvider;

#[async_trait]
impl TelematicsProvider for OfflineProvider {
    async fn post(&self, endpoint: &str, _body: Value) -> Result<Value, ProviderError> {
        Err(ProviderError::Transport {
            endpoint: endpoint.to_string(),
            message: "offline".to_string(),
        })
    }
}

async fn test_state() -> (AppState, CancellationToken) {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("connect sqlite");
    Migrator::up(&db, None).await.expect("migrate");

    let config = AppConfig::default();
    let ctx = SyncContext::new(
        db.clone(),
        Arc::new(OfflineProvider),
        SyncSettings::default(),
    );
    let shutdown = CancellationToken::new();
    let (backfill, _task) =
        BackfillController::new(ctx.clone(), config.backfill.clone()).spawn(shutdown.clone());

    let state = AppState {
        config: Arc::new(config),
        db,
        coordinator: SyncCoordinator::new(ctx),
        backfill,
    };
    (state, shutdown)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn root_returns_service_info() {
    let (state, shutdown) = test_state().await;
    let response = create_app(state)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "fleet-telemetry");
    shutdown.cancel();
}

#[tokio::test]
async fn healthz_reports_database_ok() {
    let (state, shutdown) = test_state().await;
    let response = create_app(state)
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    shutdown.cancel();
}

#[tokio::test]
async fn request_id_is_echoed() {
    let (state, shutdown) = test_state().await;
    let response = create_app(state)
        .oneshot(
            Request::builder()
                .uri("/")
                .header(REQUEST_ID_HEADER, "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get(REQUEST_ID_HEADER).unwrap(),
        "abc-123"
    );
    shutdown.cancel();
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let (state, shutdown) = test_state().await;
    let uri = format!("/telematics/runs/{}", uuid::Uuid::new_v4());
    let response = create_app(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    shutdown.cancel();
}

#[tokio::test]
async fn trigger_sync_with_unreachable_provider_records_failed_run() {
    let (state, shutdown) = test_state().await;
    let app = create_app(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/telematics/trigger-sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let run = body_json(response).await;
    assert_eq!(run["status"], "failed");
    assert_eq!(run["trigger"], "manual");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/telematics/runs?limit=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let runs = body_json(response).await;
    assert_eq!(runs["runs"].as_array().map(Vec::len), Some(1));
    shutdown.cancel();
}

#[tokio::test]
async fn openapi_document_lists_telematics_paths() {
    let (state, shutdown) = test_state().await;
    let response = create_app(state)
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert!(doc["paths"]["/telematics/history"].is_object());
    assert!(doc["paths"]["/telematics/historical-sync/start"].is_object());
    shutdown.cancel();
}
