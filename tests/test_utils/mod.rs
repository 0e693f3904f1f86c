//! Test utilities shared by the integration suites.
//!
//! Provides an in-memory SQLite database with migrations applied and helpers that
//! stand up a wiremock telematics provider speaking the `{status, data}` envelope.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use fleet_telemetry::config::ProviderConfig;
use fleet_telemetry::provider::HttpProviderClient;
use fleet_telemetry::sync::{SyncContext, SyncSettings};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Builds a sync context whose provider client points at `server`.
pub fn sync_context(db: &DatabaseConnection, server: &MockServer) -> SyncContext {
    let provider = HttpProviderClient::new(&ProviderConfig {
        base_url: server.uri(),
        api_key: None,
        timeout_ms: 2_000,
    })
    .expect("provider client");
    SyncContext::new(db.clone(), Arc::new(provider), SyncSettings::default())
}

/// A `200 OK` carrying a successful envelope.
pub fn success(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "status": "SUCCESS", "data": data }))
}

/// A `200 OK` carrying a rejected envelope.
pub fn rejected(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "status": "FAIL", "msg": message }))
}

/// Mounts the roster endpoint returning `(vehicleno, deviceno)` pairs.
pub async fn mount_roster(server: &MockServer, vehicles: &[(&str, &str)]) {
    let list: Vec<Value> = vehicles
        .iter()
        .map(|(vehicle, device)| json!({ "vehicleno": vehicle, "deviceno": device }))
        .collect();
    Mock::given(method("POST"))
        .and(path("/vehicle-device-mapping"))
        .respond_with(success(json!({ "list": list })))
        .mount(server)
        .await;
}

/// Mounts one endpoint for one vehicle.
pub async fn mount_for_vehicle(
    server: &MockServer,
    endpoint: &str,
    vehicle_no: &str,
    response: ResponseTemplate,
) {
    Mock::given(method("POST"))
        .and(path(format!("/{endpoint}")))
        .and(body_partial_json(json!({ "vehicleno": vehicle_no })))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Mounts one endpoint for every vehicle. Mount vehicle-specific mocks first so they win.
pub async fn mount_for_all(server: &MockServer, endpoint: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(format!("/{endpoint}")))
        .respond_with(response)
        .mount(server)
        .await;
}

pub fn gps_record(timestamp: &str, latitude: f64, longitude: f64) -> Value {
    json!({
        "timestamp": timestamp,
        "latitude": latitude,
        "longitude": longitude,
        "speed": 42.5,
        "ignition": 1,
        "odometer": "10234.50"
    })
}

pub fn can_record(timestamp: &str, soc: &str) -> Value {
    json!({
        "timestamp": timestamp,
        "soc": soc,
        "battery_voltage": 51.2,
        "battery_current": "-3.40"
    })
}

pub fn fuel_record(timestamp: &str, level: &str) -> Value {
    json!({ "timestamp": timestamp, "fuel_level": level, "unit": "L" })
}

/// Mounts latest gps/can/fuel snapshots for every vehicle at the same timestamp.
pub async fn mount_latest_for_all(server: &MockServer, timestamp: &str) {
    mount_for_all(server, "gps-latest", success(gps_record(timestamp, 1.3521, 103.8198))).await;
    mount_for_all(server, "can-latest", success(can_record(timestamp, "80"))).await;
    mount_for_all(server, "fuel-latest", success(fuel_record(timestamp, "35.5"))).await;
}
