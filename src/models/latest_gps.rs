//! LatestGps entity model: the most recent position per vehicle.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "latest_gps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub vehicle_no: String,
    pub recorded_at: DateTimeWithTimeZone,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: Option<f64>,
    pub heading: Option<f64>,
    pub ignition: Option<bool>,
    pub odometer_km: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub raw: JsonValue,
    pub run_id: Option<Uuid>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
