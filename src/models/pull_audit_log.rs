//! PullAuditLog entity model
//!
//! Forensic mirror of every provider call attempt. Never read by sync logic.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pull_audit_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub run_id: Option<Uuid>,
    pub endpoint: String,
    pub vehicle_no: Option<String>,
    pub success: bool,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub payload: Option<JsonValue>,
    pub error: Option<String>,
    pub requested_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
