//! Live polling runs against a mocked provider.

#[path = "test_utils/mod.rs"]
mod test_utils;

use chrono::{Duration, Utc};
use fleet_telemetry::models::{PullAuditLog, SyncTrigger, latest_gps, pull_audit_log, sync_run};
use fleet_telemetry::repositories::{
    CallOutcome, CallRecord, LatestStateRepository, RunLedger, VehicleMapRepository,
};
use fleet_telemetry::sync::{SyncCoordinator, SyncError};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter, Set,
};
use serde_json::json;
use test_utils::*;
use wiremock::{MockServer, ResponseTemplate};

const FLEET: [(&str, &str); 5] = [
    ("V1", "D1"),
    ("V2", "D2"),
    ("V3", "D3"),
    ("V4", "D4"),
    ("V5", "D5"),
];

#[tokio::test]
async fn one_failed_endpoint_yields_partial_run() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_roster(&server, &FLEET).await;
    mount_for_vehicle(
        &server,
        "gps-latest",
        "V3",
        ResponseTemplate::new(500).set_body_string("upstream down"),
    )
    .await;
    mount_latest_for_all(&server, "2025-03-01T10:00:00Z").await;

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    let summary = coordinator.run_sync(SyncTrigger::Scheduled).await.unwrap();

    assert_eq!(summary.status, "partial");
    assert_eq!(summary.trigger, "scheduled");
    assert_eq!(summary.vehicles_discovered, 5);
    assert_eq!(summary.vehicles_processed, 5);
    assert_eq!(summary.endpoints_called, 16);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].endpoint, "gps-latest");
    assert_eq!(summary.errors[0].vehicle_no.as_deref(), Some("V3"));
    assert!(summary.finished_at.is_some());

    let gps_rows = latest_gps::Entity::find().count(&db).await.unwrap();
    assert_eq!(gps_rows, 4);

    // Every call is audited, including the failed one.
    let audits = PullAuditLog::find().count(&db).await.unwrap();
    assert_eq!(audits, 16);
}

#[tokio::test]
async fn error_status_with_failed_envelope_keeps_provider_message() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_roster(&server, &[("V1", "D1")]).await;
    mount_for_vehicle(
        &server,
        "gps-latest",
        "V1",
        ResponseTemplate::new(429)
            .set_body_json(json!({ "status": "FAIL", "msg": "quota exceeded for V1" })),
    )
    .await;
    mount_latest_for_all(&server, "2025-03-01T10:00:00Z").await;

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    let summary = coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    assert_eq!(summary.status, "partial");
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].message.contains("quota exceeded for V1"));

    let audit = PullAuditLog::find()
        .filter(pull_audit_log::Column::Endpoint.eq("gps-latest"))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert!(!audit.success);
    assert_eq!(audit.payload.unwrap()["msg"], "quota exceeded for V1");
    assert!(audit.error.unwrap().contains("quota exceeded for V1"));
}

#[tokio::test]
async fn empty_roster_fails_the_run() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_roster(&server, &[]).await;

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    let summary = coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    assert_eq!(summary.status, "failed");
    assert_eq!(summary.vehicles_discovered, 0);
    assert_eq!(summary.endpoints_called, 1);
}

#[tokio::test]
async fn rejected_roster_records_error_and_fails() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_for_all(&server, "vehicle-device-mapping", rejected("token expired")).await;

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    let summary = coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    assert_eq!(summary.status, "failed");
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.errors[0].endpoint, "vehicle-device-mapping");
    assert!(summary.errors[0].message.contains("token expired"));
}

#[tokio::test]
async fn newer_reading_overwrites_and_older_one_is_skipped() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_roster(&server, &[("V1", "D1")]).await;
    mount_latest_for_all(&server, "2025-03-01T10:00:00Z").await;

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    server.reset().await;
    mount_roster(&server, &[("V1", "D1")]).await;
    mount_for_all(
        &server,
        "gps-latest",
        success(gps_record("2025-03-01T10:05:00Z", 1.40, 103.90)),
    )
    .await;
    mount_for_all(&server, "can-latest", success(can_record("2025-03-01T10:05:00Z", "79"))).await;
    mount_for_all(&server, "fuel-latest", success(fuel_record("2025-03-01T10:05:00Z", "35"))).await;
    let second = coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(second.status, "success");

    let repo = LatestStateRepository::new(db.clone());
    let row = repo.gps_for("V1").await.unwrap().expect("latest gps row");
    assert_eq!(row.latitude, 1.40);
    assert_eq!(row.run_id, Some(second.id));

    // An older snapshot arrives: stored row keeps the newer reading.
    server.reset().await;
    mount_roster(&server, &[("V1", "D1")]).await;
    mount_for_all(
        &server,
        "gps-latest",
        success(gps_record("2025-03-01T09:00:00Z", 9.0, 9.0)),
    )
    .await;
    mount_for_all(&server, "can-latest", success(can_record("2025-03-01T10:05:00Z", "79"))).await;
    mount_for_all(&server, "fuel-latest", success(fuel_record("2025-03-01T10:05:00Z", "35"))).await;
    let third = coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(third.status, "success");
    assert_eq!(third.error_count, 0);

    let row = repo.gps_for("V1").await.unwrap().expect("latest gps row");
    assert_eq!(row.latitude, 1.40);
    assert_eq!(row.run_id, Some(second.id));

    let items = RunLedger::new(db.clone())
        .items_for_run(third.id, 100)
        .await
        .unwrap();
    let gps_item = items
        .iter()
        .find(|item| item.endpoint == "gps-latest")
        .expect("gps item");
    assert_eq!(gps_item.outcome, "stale");
    assert_eq!(gps_item.records_written, 0);
}

#[tokio::test]
async fn device_change_and_missing_vehicle_are_tracked() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_roster(&server, &[("V1", "D1"), ("V2", "D2")]).await;
    mount_latest_for_all(&server, "2025-03-01T10:00:00Z").await;

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    coordinator.run_sync(SyncTrigger::Manual).await.unwrap();

    server.reset().await;
    mount_roster(&server, &[("V1", "D9")]).await;
    mount_latest_for_all(&server, "2025-03-01T10:00:00Z").await;
    let summary = coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(summary.vehicles_discovered, 1);

    let vehicles = VehicleMapRepository::new(db.clone());
    let v1 = vehicles.find("V1").await.unwrap().expect("V1 mapped");
    assert_eq!(v1.device_no, "D9");
    assert!(v1.active);
    assert_eq!(v1.last_run_id, Some(summary.id));

    let v2 = vehicles.find("V2").await.unwrap().expect("V2 kept");
    assert!(!v2.active);
    assert_eq!(vehicles.active_vehicle_nos().await.unwrap(), vec!["V1"]);
}

#[tokio::test]
async fn overlapping_runs_in_process_are_rejected() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/vehicle-device-mapping"))
        .respond_with(
            success(json!({ "list": [{ "vehicleno": "V1", "deviceno": "D1" }] }))
                .set_delay(std::time::Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    mount_latest_for_all(&server, "2025-03-01T10:00:00Z").await;

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    let (first, second) = tokio::join!(
        coordinator.run_sync(SyncTrigger::Scheduled),
        coordinator.run_sync(SyncTrigger::Manual)
    );

    assert_eq!(first.unwrap().status, "success");
    assert!(matches!(second, Err(SyncError::AlreadyRunning { .. })));
}

#[tokio::test]
async fn run_held_by_another_process_is_rejected() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_roster(&server, &[("V1", "D1")]).await;

    // Simulates a peer instance holding the live lock.
    RunLedger::new(db.clone())
        .begin_run(SyncTrigger::Scheduled, Duration::hours(1))
        .await
        .unwrap();

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    let result = coordinator.run_sync(SyncTrigger::Manual).await;
    assert!(matches!(
        result,
        Err(SyncError::AlreadyRunning { ref lock_key }) if lock_key == "live"
    ));

    // Backfill holds a different lock and is unaffected.
    RunLedger::new(db.clone())
        .begin_run(SyncTrigger::Backfill, Duration::hours(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn abandoned_run_is_expired_before_a_new_one() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_roster(&server, &[("V1", "D1")]).await;
    mount_latest_for_all(&server, "2025-03-01T10:00:00Z").await;

    let stale = RunLedger::new(db.clone())
        .begin_run(SyncTrigger::Scheduled, Duration::hours(1))
        .await
        .unwrap();
    let mut am = stale.clone().into_active_model();
    am.started_at = Set((Utc::now() - Duration::hours(3)).fixed_offset());
    am.updated_at = Set((Utc::now() - Duration::hours(3)).fixed_offset());
    am.update(&db).await.unwrap();

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    let summary = coordinator.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(summary.status, "success");

    let expired = sync_run::Entity::find_by_id(stale.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(expired.status, "failed");
    assert!(expired.finished_at.is_some());
}

#[tokio::test]
async fn dropped_caller_does_not_leave_the_live_lock_held() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_roster(&server, &[("V1", "D1")]).await;
    mount_for_all(
        &server,
        "gps-latest",
        success(gps_record("2025-03-01T10:00:00Z", 1.3521, 103.8198))
            .set_delay(std::time::Duration::from_millis(500)),
    )
    .await;
    mount_for_all(&server, "can-latest", success(can_record("2025-03-01T10:00:00Z", "80"))).await;
    mount_for_all(&server, "fuel-latest", success(fuel_record("2025-03-01T10:00:00Z", "35.5"))).await;

    let coordinator = SyncCoordinator::new(sync_context(&db, &server));
    let first = tokio::time::timeout(
        std::time::Duration::from_millis(150),
        coordinator.run_sync(SyncTrigger::Manual),
    )
    .await;
    assert!(first.is_err(), "caller should have given up before the run finished");

    // The detached cycle keeps going and closes its own row.
    tokio::time::sleep(std::time::Duration::from_millis(800)).await;
    let runs = RunLedger::new(db.clone()).list_runs(None, 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "success");

    let second = coordinator.run_sync(SyncTrigger::Scheduled).await.unwrap();
    assert_eq!(second.status, "success");
}

#[tokio::test]
async fn run_that_cannot_be_closed_normally_is_marked_failed() {
    let db = setup_test_db().await.unwrap();
    let ledger = RunLedger::new(db.clone());
    let run = ledger
        .begin_run(SyncTrigger::Manual, Duration::hours(1))
        .await
        .unwrap();

    let closed = ledger
        .abandon_run(run.id, "run could not be closed: disk full")
        .await
        .unwrap();
    assert_eq!(closed, 1);

    let stored = ledger.find_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "failed");
    assert!(stored.finished_at.is_some());
    assert_eq!(stored.error_count, 1);

    // Closing twice is a no-op, and the live lock is free again.
    assert_eq!(ledger.abandon_run(run.id, "again").await.unwrap(), 0);
    ledger
        .begin_run(SyncTrigger::Scheduled, Duration::hours(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn long_run_with_recent_activity_is_not_expired() {
    let db = setup_test_db().await.unwrap();
    let ledger = RunLedger::new(db.clone());
    let batch = ledger
        .begin_run(SyncTrigger::Backfill, Duration::hours(1))
        .await
        .unwrap();
    let mut am = batch.clone().into_active_model();
    am.started_at = Set((Utc::now() - Duration::hours(3)).fixed_offset());
    am.updated_at = Set((Utc::now() - Duration::hours(3)).fixed_offset());
    am.update(&db).await.unwrap();

    ledger
        .record_call(CallRecord {
            run_id: batch.id,
            endpoint: "gps-history".to_string(),
            vehicle_no: Some("V1".to_string()),
            outcome: CallOutcome::Success,
            records_written: 3,
            payload: None,
            error: None,
        })
        .await
        .unwrap();

    let second = ledger
        .begin_run(SyncTrigger::Backfill, Duration::hours(1))
        .await;
    assert!(matches!(
        second,
        Err(SyncError::AlreadyRunning { ref lock_key }) if lock_key == "backfill"
    ));
    let stored = ledger.find_run(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "running");
}
