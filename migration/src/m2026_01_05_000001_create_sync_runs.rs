//! Migration to create the sync_runs and sync_run_items tables.
//!
//! `sync_runs` holds one row per coordinator or backfill invocation; `sync_run_items`
//! holds one row per external call made during a run. A partial unique index on
//! `sync_runs(lock_key)` restricted to `running` rows keeps at most one in-flight run
//! per lock key across processes.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncRuns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncRuns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncRuns::Trigger).text().not_null())
                    .col(ColumnDef::new(SyncRuns::LockKey).text().not_null())
                    .col(
                        ColumnDef::new(SyncRuns::Status)
                            .text()
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::VehiclesDiscovered)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::VehiclesProcessed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::EndpointsCalled)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::RecordsWritten)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::ErrorCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncRuns::Errors).json_binary().null())
                    .col(
                        ColumnDef::new(SyncRuns::WindowStart)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::WindowEnd)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_runs_started_at")
                    .table(SyncRuns::Table)
                    .col(SyncRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        // Partial index syntax is shared by Postgres and SQLite.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_runs_running_lock \
                 ON sync_runs (lock_key) WHERE status = 'running'"
                    .to_string(),
            ))
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SyncRunItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncRunItems::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncRunItems::RunId).uuid().not_null())
                    .col(ColumnDef::new(SyncRunItems::Endpoint).text().not_null())
                    .col(ColumnDef::new(SyncRunItems::VehicleNo).text().null())
                    .col(ColumnDef::new(SyncRunItems::Outcome).text().not_null())
                    .col(
                        ColumnDef::new(SyncRunItems::RecordsWritten)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncRunItems::Payload).json_binary().null())
                    .col(ColumnDef::new(SyncRunItems::Error).text().null())
                    .col(
                        ColumnDef::new(SyncRunItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_run_items_run_id")
                            .from(SyncRunItems::Table, SyncRunItems::RunId)
                            .to(SyncRuns::Table, SyncRuns::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_run_items_run_created")
                    .table(SyncRunItems::Table)
                    .col(SyncRunItems::RunId)
                    .col(SyncRunItems::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncRunItems::Table).to_owned())
            .await?;

        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "DROP INDEX IF EXISTS idx_sync_runs_running_lock".to_string(),
            ))
            .await?;

        manager
            .drop_table(Table::drop().table(SyncRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncRuns {
    Table,
    Id,
    Trigger,
    LockKey,
    Status,
    StartedAt,
    FinishedAt,
    VehiclesDiscovered,
    VehiclesProcessed,
    EndpointsCalled,
    RecordsWritten,
    ErrorCount,
    Errors,
    WindowStart,
    WindowEnd,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncRunItems {
    Table,
    Id,
    RunId,
    Endpoint,
    VehicleNo,
    Outcome,
    RecordsWritten,
    Payload,
    Error,
    CreatedAt,
}
