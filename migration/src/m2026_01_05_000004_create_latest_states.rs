//! Migration to create the latest-state tables (one row per vehicle per dataset).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LatestGps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LatestGps::VehicleNo)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LatestGps::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LatestGps::Latitude).double().not_null())
                    .col(ColumnDef::new(LatestGps::Longitude).double().not_null())
                    .col(ColumnDef::new(LatestGps::SpeedKmh).double().null())
                    .col(ColumnDef::new(LatestGps::Heading).double().null())
                    .col(ColumnDef::new(LatestGps::Ignition).boolean().null())
                    .col(ColumnDef::new(LatestGps::OdometerKm).text().null())
                    .col(ColumnDef::new(LatestGps::Raw).json_binary().not_null())
                    .col(ColumnDef::new(LatestGps::RunId).uuid().null())
                    .col(
                        ColumnDef::new(LatestGps::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LatestCan::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LatestCan::VehicleNo)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LatestCan::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LatestCan::SocPct).text().null())
                    .col(ColumnDef::new(LatestCan::BatteryVoltage).text().null())
                    .col(ColumnDef::new(LatestCan::BatteryCurrent).text().null())
                    .col(ColumnDef::new(LatestCan::BatteryTempC).text().null())
                    .col(ColumnDef::new(LatestCan::OdometerKm).text().null())
                    .col(ColumnDef::new(LatestCan::Raw).json_binary().not_null())
                    .col(ColumnDef::new(LatestCan::RunId).uuid().null())
                    .col(
                        ColumnDef::new(LatestCan::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LatestFuel::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LatestFuel::VehicleNo)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LatestFuel::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LatestFuel::FuelLevel).text().not_null())
                    .col(ColumnDef::new(LatestFuel::Unit).text().not_null())
                    .col(ColumnDef::new(LatestFuel::Raw).json_binary().not_null())
                    .col(ColumnDef::new(LatestFuel::RunId).uuid().null())
                    .col(
                        ColumnDef::new(LatestFuel::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LatestFuel::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LatestCan::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LatestGps::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum LatestGps {
    Table,
    VehicleNo,
    RecordedAt,
    Latitude,
    Longitude,
    SpeedKmh,
    Heading,
    Ignition,
    OdometerKm,
    Raw,
    RunId,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum LatestCan {
    Table,
    VehicleNo,
    RecordedAt,
    SocPct,
    BatteryVoltage,
    BatteryCurrent,
    BatteryTempC,
    OdometerKm,
    Raw,
    RunId,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum LatestFuel {
    Table,
    VehicleNo,
    RecordedAt,
    FuelLevel,
    Unit,
    Raw,
    RunId,
    UpdatedAt,
}
