//! Database migrations for the fleet telemetry service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_05_000001_create_sync_runs;
mod m2026_01_05_000002_create_pull_audit_logs;
mod m2026_01_05_000003_create_vehicle_device_maps;
mod m2026_01_05_000004_create_latest_states;
mod m2026_01_05_000005_create_history_tables;
mod m2026_01_05_000006_create_history_sync_control;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_05_000001_create_sync_runs::Migration),
            Box::new(m2026_01_05_000002_create_pull_audit_logs::Migration),
            Box::new(m2026_01_05_000003_create_vehicle_device_maps::Migration),
            Box::new(m2026_01_05_000004_create_latest_states::Migration),
            Box::new(m2026_01_05_000005_create_history_tables::Migration),
            Box::new(m2026_01_05_000006_create_history_sync_control::Migration),
        ]
    }
}
