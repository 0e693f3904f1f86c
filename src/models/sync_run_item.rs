//! SyncRunItem entity model
//!
//! One append-only row per external call made during a run.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_run_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning run
    pub run_id: Uuid,

    /// Provider endpoint name
    pub endpoint: String,

    /// Vehicle targeted by the call (absent for the roster call)
    pub vehicle_no: Option<String>,

    /// `success` or `failure`
    pub outcome: String,

    /// Rows written as a result of this call
    pub records_written: i32,

    /// Raw provider response, when one was received
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub payload: Option<JsonValue>,

    pub error: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_run::Entity",
        from = "Column::RunId",
        to = "super::sync_run::Column::Id"
    )]
    Run,
}

impl Related<super::sync_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
