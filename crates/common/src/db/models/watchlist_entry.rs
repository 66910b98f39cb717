//! Watchlist entry entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "watchlist_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(column_type = "Text")]
    pub full_name: String,

    pub date_of_birth: Option<Date>,

    #[sea_orm(column_type = "Text", nullable)]
    pub country: Option<String>,

    /// Which sanctions/PEP list the entry came from
    #[sea_orm(column_type = "Text")]
    pub list_name: String,

    pub active: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
