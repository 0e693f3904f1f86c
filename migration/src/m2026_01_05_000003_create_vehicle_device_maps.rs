//! Migration to create the vehicle_device_maps table (fleet roster keyed by vehicle number).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(VehicleDeviceMaps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VehicleDeviceMaps::VehicleNo)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(VehicleDeviceMaps::DeviceNo).text().not_null())
                    .col(
                        ColumnDef::new(VehicleDeviceMaps::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(VehicleDeviceMaps::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VehicleDeviceMaps::LastSeenAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(VehicleDeviceMaps::LastRunId).uuid().null())
                    .col(ColumnDef::new(VehicleDeviceMaps::Raw).json_binary().null())
                    .col(
                        ColumnDef::new(VehicleDeviceMaps::UpdatedAt)
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
                    .name("idx_vehicle_device_maps_active")
                    .table(VehicleDeviceMaps::Table)
                    .col(VehicleDeviceMaps::Active)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(VehicleDeviceMaps::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum VehicleDeviceMaps {
    Table,
    VehicleNo,
    DeviceNo,
    Active,
    FirstSeenAt,
    LastSeenAt,
    LastRunId,
    Raw,
    UpdatedAt,
}
