//! LatestCan entity model: the most recent battery/CAN bus snapshot per vehicle.
//!
//! Electrical readings are stored as canonical decimal strings.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "latest_can")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub vehicle_no: String,
    pub recorded_at: DateTimeWithTimeZone,
    pub soc_pct: Option<String>,
    pub battery_voltage: Option<String>,
    pub battery_current: Option<String>,
    pub battery_temp_c: Option<String>,
    pub odometer_km: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub raw: JsonValue,
    pub run_id: Option<Uuid>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
