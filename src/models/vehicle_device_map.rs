//! VehicleDeviceMap entity model
//!
//! The fleet roster: one row per vehicle ever reported by the provider. Rows are upserted
//! on every successful roster pull and never deleted; vehicles missing from a later roster
//! are flagged inactive.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "vehicle_device_maps")]
pub struct Model {
    /// Provider vehicle number (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub vehicle_no: String,

    /// Telematics device currently mounted on the vehicle
    pub device_no: String,

    /// False once the vehicle has dropped out of the provider roster
    pub active: bool,

    pub first_seen_at: DateTimeWithTimeZone,
    pub last_seen_at: DateTimeWithTimeZone,

    /// Run that last touched this row
    pub last_run_id: Option<Uuid>,

    /// Roster entry exactly as the provider returned it
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub raw: Option<JsonValue>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
