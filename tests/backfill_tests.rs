//! Historical backfill batches and controller transitions.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Duration, Utc};
use fleet_telemetry::backfill::{BackfillController, BackfillRunner, BatchOptions, StartRequest};
use fleet_telemetry::config::BackfillConfig;
use fleet_telemetry::models::{
    Dataset, HistoryDistance, HistoryFuel, HistoryGps, JobStatus, SyncTrigger,
};
use fleet_telemetry::provider::parse::{
    FuelReading, GpsReading, Reading, RosterEntry, parse_distance,
};
use fleet_telemetry::repositories::{
    CheckpointRepository, HistoryRepository, JobControlRepository, VehicleMapRepository,
};
use fleet_telemetry::sync::SyncError;
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
use serde_json::json;
use test_utils::*;
use uuid::Uuid;
use wiremock::MockServer;

fn at(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

async fn seed_vehicles(db: &DatabaseConnection, vehicles: &[&str]) {
    let entries: Vec<RosterEntry> = vehicles
        .iter()
        .map(|v| RosterEntry {
            vehicle_no: v.to_string(),
            device_no: format!("dev-{v}"),
            raw: json!({ "vehicleno": v }),
        })
        .collect();
    VehicleMapRepository::new(db.clone())
        .upsert_roster(Uuid::new_v4(), &entries, Utc::now())
        .await
        .unwrap();
}

/// Every history endpoint answers; gps always returns the same two readings.
async fn mount_history(server: &MockServer) {
    mount_for_all(
        server,
        "gps-history",
        success(json!({ "list": [
            gps_record("2025-01-01T00:01:00Z", 1.30, 103.80),
            gps_record("2025-01-01T00:02:00Z", 1.31, 103.81),
        ]})),
    )
    .await;
    mount_for_all(server, "can-history", success(json!({ "list": [] }))).await;
    mount_for_all(server, "fuel-history", success(json!([]))).await;
    mount_for_all(server, "distance-history", success(json!({ "distance_km": 1.25 }))).await;
}

fn options(max_windows: u32, historical_start: DateTime<Utc>) -> BatchOptions {
    BatchOptions {
        max_windows,
        window: Duration::minutes(5),
        historical_start,
        honor_pause: true,
    }
}

#[tokio::test]
async fn batch_spends_exactly_its_window_budget() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_history(&server).await;
    seed_vehicles(&db, &["V1"]).await;

    let start = at("2025-01-01T00:00:00Z");
    let runner = BackfillRunner::new(sync_context(&db, &server), Arc::new(AtomicBool::new(false)));
    let report = runner.run_batch(&options(48, start)).await.unwrap();

    assert_eq!(report.windows_attempted, 48);
    assert_eq!(report.windows_succeeded, 48);
    assert_eq!(report.windows_failed, 0);
    assert!(!report.paused);
    assert_eq!(report.run.trigger, "backfill");
    assert_eq!(report.run.status, "success");
    assert_eq!(report.run.endpoints_called, 48);
    assert_eq!(report.run.window_start, Some(start));

    // Pairs advance round-robin from the same cursor: 12 windows each.
    let checkpoints = CheckpointRepository::new(db.clone());
    for dataset in Dataset::HISTORY {
        assert_eq!(
            checkpoints.get("V1", dataset).await.unwrap(),
            Some(start + Duration::minutes(60)),
            "checkpoint for {dataset}"
        );
    }

    // The repeated gps payload was stored once.
    assert_eq!(HistoryGps::find().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn next_batch_resumes_from_checkpoints() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_history(&server).await;
    seed_vehicles(&db, &["V1"]).await;

    let start = at("2025-01-01T00:00:00Z");
    let runner = BackfillRunner::new(sync_context(&db, &server), Arc::new(AtomicBool::new(false)));
    runner.run_batch(&options(4, start)).await.unwrap();
    let second = runner.run_batch(&options(4, start)).await.unwrap();

    assert_eq!(second.run.window_start, Some(start + Duration::minutes(5)));
    let checkpoints = CheckpointRepository::new(db.clone());
    assert_eq!(
        checkpoints.get("V1", Dataset::Distance).await.unwrap(),
        Some(start + Duration::minutes(10))
    );
}

#[tokio::test]
async fn failed_window_parks_its_pair_and_marks_batch_partial() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_for_all(&server, "can-history", rejected("device offline")).await;
    mount_history(&server).await;
    seed_vehicles(&db, &["V1"]).await;

    let start = at("2025-01-01T00:00:00Z");
    let runner = BackfillRunner::new(sync_context(&db, &server), Arc::new(AtomicBool::new(false)));
    let report = runner.run_batch(&options(12, start)).await.unwrap();

    assert_eq!(report.windows_attempted, 12);
    assert_eq!(report.windows_failed, 1);
    assert_eq!(report.windows_succeeded, 11);
    assert_eq!(report.run.status, "partial");
    assert_eq!(report.run.errors[0].endpoint, "can-history");

    let checkpoints = CheckpointRepository::new(db.clone());
    assert_eq!(checkpoints.get("V1", Dataset::Can).await.unwrap(), None);
    assert!(checkpoints.get("V1", Dataset::Gps).await.unwrap().is_some());
}

#[tokio::test]
async fn raised_pause_flag_stops_batch_before_first_window() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_history(&server).await;
    seed_vehicles(&db, &["V1"]).await;

    let runner = BackfillRunner::new(sync_context(&db, &server), Arc::new(AtomicBool::new(true)));
    let report = runner
        .run_batch(&options(48, at("2025-01-01T00:00:00Z")))
        .await
        .unwrap();

    assert!(report.paused);
    assert_eq!(report.windows_attempted, 0);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn batch_without_vehicles_fails() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;

    let runner = BackfillRunner::new(sync_context(&db, &server), Arc::new(AtomicBool::new(false)));
    let report = runner
        .run_batch(&options(48, at("2025-01-01T00:00:00Z")))
        .await
        .unwrap();

    assert_eq!(report.run.status, "failed");
    assert_eq!(report.windows_attempted, 0);
}

#[tokio::test]
async fn windows_never_reach_into_the_future() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_history(&server).await;
    seed_vehicles(&db, &["V1"]).await;

    // Two whole windows per dataset fit before now.
    let start = Utc::now() - Duration::minutes(12);
    let runner = BackfillRunner::new(sync_context(&db, &server), Arc::new(AtomicBool::new(false)));
    let report = runner.run_batch(&options(48, start)).await.unwrap();

    assert_eq!(report.windows_attempted, 8);
    assert!(report.run.window_end.unwrap() <= Utc::now());
}

#[tokio::test]
async fn history_replay_inserts_nothing_new() {
    let db = setup_test_db().await.unwrap();
    let repo = HistoryRepository::new(db.clone());
    let readings: Vec<GpsReading> = ["2025-01-01T00:01:00Z", "2025-01-01T00:02:00Z"]
        .iter()
        .map(|ts| GpsReading::from_record("gps-history", &gps_record(ts, 1.0, 2.0)).unwrap())
        .collect();

    assert_eq!(repo.insert_gps("V1", &readings).await.unwrap(), 2);
    assert_eq!(repo.insert_gps("V1", &readings).await.unwrap(), 0);
    // Same instants for another vehicle are distinct rows.
    assert_eq!(repo.insert_gps("V2", &readings).await.unwrap(), 2);
    assert_eq!(HistoryGps::find().count(&db).await.unwrap(), 4);
}

#[tokio::test]
async fn fuel_replay_keys_on_unit_as_well_as_time() {
    let db = setup_test_db().await.unwrap();
    let repo = HistoryRepository::new(db.clone());
    let readings: Vec<FuelReading> = [
        json!({ "timestamp": "2025-01-01T00:01:00Z", "fuel_level": "40.5", "unit": "L" }),
        json!({ "timestamp": "2025-01-01T00:01:00Z", "fuel_level": "10.7", "unit": "gal" }),
    ]
    .iter()
    .map(|record| FuelReading::from_record("fuel-history", record).unwrap())
    .collect();

    // Same instant, different units: both kept.
    assert_eq!(repo.insert_fuel("V1", &readings).await.unwrap(), 2);
    assert_eq!(repo.insert_fuel("V1", &readings).await.unwrap(), 0);
    assert_eq!(HistoryFuel::find().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn distance_replay_of_a_recorded_window_inserts_nothing() {
    let db = setup_test_db().await.unwrap();
    let repo = HistoryRepository::new(db.clone());
    let start = at("2025-01-01T00:00:00Z");
    let end = at("2025-01-01T00:05:00Z");
    let reading = parse_distance("distance-history", &json!({ "distance_km": 1.25 })).unwrap();

    assert_eq!(repo.insert_distance("V1", start, end, &reading).await.unwrap(), 1);
    assert_eq!(repo.insert_distance("V1", start, end, &reading).await.unwrap(), 0);
    // The next window is a new row.
    assert_eq!(
        repo.insert_distance("V1", end, at("2025-01-01T00:10:00Z"), &reading)
            .await
            .unwrap(),
        1
    );
    assert_eq!(HistoryDistance::find().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn checkpoints_never_move_backwards() {
    let db = setup_test_db().await.unwrap();
    let repo = CheckpointRepository::new(db.clone());

    repo.advance("V1", Dataset::Fuel, at("2025-01-01T02:00:00Z"))
        .await
        .unwrap();
    repo.advance("V1", Dataset::Fuel, at("2025-01-01T01:00:00Z"))
        .await
        .unwrap();
    assert_eq!(
        repo.get("V1", Dataset::Fuel).await.unwrap(),
        Some(at("2025-01-01T02:00:00Z"))
    );

    repo.advance("V1", Dataset::Fuel, at("2025-01-01T03:00:00Z"))
        .await
        .unwrap();
    assert_eq!(
        repo.get("V1", Dataset::Fuel).await.unwrap(),
        Some(at("2025-01-01T03:00:00Z"))
    );
}

fn manual_config() -> BackfillConfig {
    BackfillConfig {
        enabled: false,
        ..BackfillConfig::default()
    }
}

#[tokio::test]
async fn controller_transitions_and_pause_gate_scheduled_batches() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_history(&server).await;
    seed_vehicles(&db, &["V1"]).await;

    let controller = BackfillController::new(sync_context(&db, &server), manual_config());

    assert!(matches!(
        controller.pause().await,
        Err(SyncError::InvalidTransition { action: "pause", status: JobStatus::Idle })
    ));
    assert!(matches!(
        controller.start(StartRequest::default()).await,
        Err(SyncError::MissingStart)
    ));

    let view = controller
        .start(StartRequest {
            historical_start: Some(at("2025-01-01T00:00:00Z")),
            max_windows_per_run: Some(4),
        })
        .await
        .unwrap();
    assert_eq!(view.status, JobStatus::Running);
    assert_eq!(view.max_windows_per_run, 4);
    assert_eq!(view.window_seconds, 300);

    let report = controller.scheduled_batch().await.unwrap().expect("batch ran");
    assert_eq!(report.windows_attempted, 4);

    let view = controller.pause().await.unwrap();
    assert_eq!(view.status, JobStatus::Paused);
    assert!(controller.scheduled_batch().await.unwrap().is_none());

    // Manual batches ignore the pause.
    let manual = controller.run_once().await.unwrap();
    assert_eq!(manual.windows_attempted, 4);
    assert!(!manual.paused);

    controller.resume().await.unwrap();
    assert!(controller.scheduled_batch().await.unwrap().is_some());

    let row = JobControlRepository::new(db.clone()).load().await.unwrap();
    assert!(row.last_heartbeat_at.is_some());
    assert!(row.last_run_id.is_some());
}

#[tokio::test]
async fn restart_keeps_stored_start_and_checkpoints() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_history(&server).await;
    seed_vehicles(&db, &["V1"]).await;

    let controller = BackfillController::new(sync_context(&db, &server), manual_config());
    controller
        .start(StartRequest {
            historical_start: Some(at("2025-01-01T00:00:00Z")),
            max_windows_per_run: Some(4),
        })
        .await
        .unwrap();
    controller.run_once().await.unwrap();

    let view = controller.start(StartRequest::default()).await.unwrap();
    assert_eq!(view.historical_start_at, Some(at("2025-01-01T00:00:00Z")));
    assert_eq!(
        CheckpointRepository::new(db.clone())
            .get("V1", Dataset::Gps)
            .await
            .unwrap(),
        Some(at("2025-01-01T00:05:00Z"))
    );
}

#[tokio::test]
async fn handle_round_trips_through_the_actor() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_history(&server).await;
    seed_vehicles(&db, &["V1"]).await;

    let shutdown = tokio_util::sync::CancellationToken::new();
    let (handle, task) =
        BackfillController::new(sync_context(&db, &server), manual_config()).spawn(shutdown.clone());

    handle
        .start(StartRequest {
            historical_start: Some(at("2025-01-01T00:00:00Z")),
            max_windows_per_run: Some(2),
        })
        .await
        .unwrap();
    let paused = handle.pause().await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert!(handle.is_pause_requested());
    assert!(handle.tick().await.unwrap().is_none());

    let report = handle.run_once().await.unwrap();
    assert_eq!(report.run.trigger, SyncTrigger::Backfill.as_str());

    shutdown.cancel();
    task.await.unwrap();
    assert!(matches!(
        handle.resume().await,
        Err(SyncError::ControllerUnavailable)
    ));
}
