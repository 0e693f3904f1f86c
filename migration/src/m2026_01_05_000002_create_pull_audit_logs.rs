//! Migration to create the pull_audit_logs table.
//!
//! Append-only forensic record of every provider call attempt.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PullAuditLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PullAuditLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PullAuditLogs::RunId).uuid().null())
                    .col(ColumnDef::new(PullAuditLogs::Endpoint).text().not_null())
                    .col(ColumnDef::new(PullAuditLogs::VehicleNo).text().null())
                    .col(ColumnDef::new(PullAuditLogs::Success).boolean().not_null())
                    .col(ColumnDef::new(PullAuditLogs::Payload).json_binary().null())
                    .col(ColumnDef::new(PullAuditLogs::Error).text().null())
                    .col(
                        ColumnDef::new(PullAuditLogs::RequestedAt)
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
                    .name("idx_pull_audit_logs_endpoint_requested")
                    .table(PullAuditLogs::Table)
                    .col(PullAuditLogs::Endpoint)
                    .col(PullAuditLogs::RequestedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PullAuditLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PullAuditLogs {
    Table,
    Id,
    RunId,
    Endpoint,
    VehicleNo,
    Success,
    Payload,
    Error,
    RequestedAt,
}
