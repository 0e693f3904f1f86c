//! HistoryFuel entity model
//!
//! Append-only fuel archive. The unit participates in the unique key because some
//! devices report the same instant in both litres and percent.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "history_fuel")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub vehicle_no: String,
    pub recorded_at: DateTimeWithTimeZone,
    pub fuel_level: String,
    pub unit: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub raw: JsonValue,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
