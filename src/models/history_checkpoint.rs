//! HistoryCheckpoint entity model
//!
//! Backfill progress per `(vehicle_no, dataset)`. `last_synced_end` only ever moves forward.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "history_checkpoints")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub vehicle_no: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub dataset: String,
    /// End of the last window that was fully written
    pub last_synced_end: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
