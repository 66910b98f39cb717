//! Outreach ticket entity
//!
//! One ticket per open `(case, reason)` pair; the partial unique index in
//! the migration is what makes `raise_outreach` idempotent.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ticket status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Resolved,
}

impl From<String> for TicketStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "resolved" => TicketStatus::Resolved,
            _ => TicketStatus::Open,
        }
    }
}

impl From<TicketStatus> for String {
    fn from(status: TicketStatus) -> Self {
        match status {
            TicketStatus::Open => "open".to_string(),
            TicketStatus::Resolved => "resolved".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "outreach_tickets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub case_id: Uuid,

    /// material_change | screening_materiality
    #[sea_orm(column_type = "Text")]
    pub reason: String,

    /// Diff list or screening hits backing the escalation
    #[sea_orm(column_type = "JsonBinary")]
    pub details: serde_json::Value,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Operator decision recorded at resolution time
    #[sea_orm(column_type = "Text", nullable)]
    pub disposition: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub resolved_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn ticket_status(&self) -> TicketStatus {
        TicketStatus::from(self.status.clone())
    }

    pub fn is_open(&self) -> bool {
        self.ticket_status() == TicketStatus::Open
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::kyc_case::Entity",
        from = "Column::CaseId",
        to = "super::kyc_case::Column::Id"
    )]
    Case,
}

impl Related<super::kyc_case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Case.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
