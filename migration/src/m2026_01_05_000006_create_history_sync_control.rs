//! Migration to create backfill bookkeeping: per-(vehicle, dataset) checkpoints and the
//! singleton job-control row.

use sea_orm_migration::prelude::*;

/// Fixed identifier of the singleton job-control row.
const JOB_CONTROL_ID: i32 = 1;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(HistoryCheckpoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(HistoryCheckpoints::VehicleNo)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(HistoryCheckpoints::Dataset).text().not_null())
                    .col(
                        ColumnDef::new(HistoryCheckpoints::LastSyncedEnd)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HistoryCheckpoints::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(HistoryCheckpoints::VehicleNo)
                            .col(HistoryCheckpoints::Dataset),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_history_checkpoints_updated_at")
                    .table(HistoryCheckpoints::Table)
                    .col(HistoryCheckpoints::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(HistoryJobControl::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(HistoryJobControl::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(HistoryJobControl::Status)
                            .text()
                            .not_null()
                            .default("idle"),
                    )
                    .col(
                        ColumnDef::new(HistoryJobControl::HistoricalStartAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(HistoryJobControl::MaxWindowsPerRun)
                            .integer()
                            .not_null()
                            .default(48),
                    )
                    .col(
                        ColumnDef::new(HistoryJobControl::WindowSeconds)
                            .integer()
                            .not_null()
                            .default(300),
                    )
                    .col(
                        ColumnDef::new(HistoryJobControl::LastHeartbeatAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(HistoryJobControl::LastRunId).uuid().null())
                    .col(
                        ColumnDef::new(HistoryJobControl::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        let seed = Query::insert()
            .into_table(HistoryJobControl::Table)
            .columns([
                HistoryJobControl::Id,
                HistoryJobControl::Status,
                HistoryJobControl::MaxWindowsPerRun,
                HistoryJobControl::WindowSeconds,
            ])
            .values_panic([JOB_CONTROL_ID.into(), "idle".into(), 48.into(), 300.into()])
            .on_conflict(
                OnConflict::column(HistoryJobControl::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .to_owned();
        manager.exec_stmt(seed).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(HistoryJobControl::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(HistoryCheckpoints::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum HistoryCheckpoints {
    Table,
    VehicleNo,
    Dataset,
    LastSyncedEnd,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum HistoryJobControl {
    Table,
    Id,
    Status,
    HistoricalStartAt,
    MaxWindowsPerRun,
    WindowSeconds,
    LastHeartbeatAt,
    LastRunId,
    UpdatedAt,
}
