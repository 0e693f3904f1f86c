//! Migration to create the append-only history tables.
//!
//! Each table carries a unique index on its natural key so replaying an overlapping
//! window inserts nothing new.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(HistoryGps::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(HistoryGps::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(HistoryGps::VehicleNo).text().not_null())
                    .col(
                        ColumnDef::new(HistoryGps::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(HistoryGps::Latitude).double().not_null())
                    .col(ColumnDef::new(HistoryGps::Longitude).double().not_null())
                    .col(ColumnDef::new(HistoryGps::SpeedKmh).double().null())
                    .col(ColumnDef::new(HistoryGps::Heading).double().null())
                    .col(ColumnDef::new(HistoryGps::Ignition).boolean().null())
                    .col(ColumnDef::new(HistoryGps::OdometerKm).text().null())
                    .col(ColumnDef::new(HistoryGps::Raw).json_binary().not_null())
                    .col(
                        ColumnDef::new(HistoryGps::CreatedAt)
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
                    .name("uq_history_gps_vehicle_recorded")
                    .table(HistoryGps::Table)
                    .col(HistoryGps::VehicleNo)
                    .col(HistoryGps::RecordedAt)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(HistoryCan::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(HistoryCan::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(HistoryCan::VehicleNo).text().not_null())
                    .col(
                        ColumnDef::new(HistoryCan::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(HistoryCan::SocPct).text().null())
                    .col(ColumnDef::new(HistoryCan::BatteryVoltage).text().null())
                    .col(ColumnDef::new(HistoryCan::BatteryCurrent).text().null())
                    .col(ColumnDef::new(HistoryCan::BatteryTempC).text().null())
                    .col(ColumnDef::new(HistoryCan::OdometerKm).text().null())
                    .col(ColumnDef::new(HistoryCan::Raw).json_binary().not_null())
                    .col(
                        ColumnDef::new(HistoryCan::CreatedAt)
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
                    .name("uq_history_can_vehicle_recorded")
                    .table(HistoryCan::Table)
                    .col(HistoryCan::VehicleNo)
                    .col(HistoryCan::RecordedAt)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(HistoryFuel::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(HistoryFuel::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(HistoryFuel::VehicleNo).text().not_null())
                    .col(
                        ColumnDef::new(HistoryFuel::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(HistoryFuel::FuelLevel).text().not_null())
                    .col(ColumnDef::new(HistoryFuel::Unit).text().not_null())
                    .col(ColumnDef::new(HistoryFuel::Raw).json_binary().not_null())
                    .col(
                        ColumnDef::new(HistoryFuel::CreatedAt)
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
                    .name("uq_history_fuel_vehicle_recorded_unit")
                    .table(HistoryFuel::Table)
                    .col(HistoryFuel::VehicleNo)
                    .col(HistoryFuel::RecordedAt)
                    .col(HistoryFuel::Unit)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(HistoryDistance::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(HistoryDistance::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(HistoryDistance::VehicleNo).text().not_null())
                    .col(
                        ColumnDef::new(HistoryDistance::WindowStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HistoryDistance::WindowEnd)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(HistoryDistance::DistanceKm).text().not_null())
                    .col(ColumnDef::new(HistoryDistance::Raw).json_binary().not_null())
                    .col(
                        ColumnDef::new(HistoryDistance::CreatedAt)
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
                    .name("uq_history_distance_vehicle_window")
                    .table(HistoryDistance::Table)
                    .col(HistoryDistance::VehicleNo)
                    .col(HistoryDistance::WindowStart)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(HistoryDistance::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(HistoryFuel::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(HistoryCan::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(HistoryGps::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum HistoryGps {
    Table,
    Id,
    VehicleNo,
    RecordedAt,
    Latitude,
    Longitude,
    SpeedKmh,
    Heading,
    Ignition,
    OdometerKm,
    Raw,
    CreatedAt,
}

#[derive(DeriveIden)]
enum HistoryCan {
    Table,
    Id,
    VehicleNo,
    RecordedAt,
    SocPct,
    BatteryVoltage,
    BatteryCurrent,
    BatteryTempC,
    OdometerKm,
    Raw,
    CreatedAt,
}

#[derive(DeriveIden)]
enum HistoryFuel {
    Table,
    Id,
    VehicleNo,
    RecordedAt,
    FuelLevel,
    Unit,
    Raw,
    CreatedAt,
}

#[derive(DeriveIden)]
enum HistoryDistance {
    Table,
    Id,
    VehicleNo,
    WindowStart,
    WindowEnd,
    DistanceKm,
    Raw,
    CreatedAt,
}
