//! Customer profile entity
//!
//! The long-lived KYC record for one client, flattened onto the fixed
//! onboarding schema. `client_identifier` is the immutable business key;
//! the surrogate `id` exists only for the store.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customer_profiles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(column_type = "Text", unique, indexed)]
    pub client_identifier: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub document_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub document_type: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub entity_legal_name: Option<String>,

    pub date_of_incorporation: Option<Date>,

    #[sea_orm(column_type = "Text", nullable)]
    pub dba_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub dba_address: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub phone_number: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub number_of_employees: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub number_of_branches: Option<String>,

    pub client_regulated: Option<bool>,

    #[sea_orm(column_type = "Text", nullable)]
    pub name_of_regulator: Option<String>,

    // Entity identity document
    #[sea_orm(column_type = "Text", nullable)]
    pub id_number: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub country_issuing_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub id_type: Option<String>,

    pub date_of_id_issuance: Option<Date>,

    pub id_expiry_date: Option<Date>,

    pub is_payment_intermediary: Option<bool>,

    // Associated member (owner/officer)
    #[sea_orm(column_type = "Text", nullable)]
    pub member_type: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub member_association: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub member_role: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub member_legal_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub member_first_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub member_middle_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub member_last_name: Option<String>,

    /// 0-100, present only when the member role is owner
    pub ownership_percentage: Option<f64>,

    #[sea_orm(column_type = "Text", nullable)]
    pub identification_number: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub issuing_country: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub identification_type: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub address_line_1: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub address_line_2: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub address_country: Option<String>,

    pub date_of_birth: Option<Date>,

    #[sea_orm(column_type = "Text", nullable)]
    pub country_of_citizenship: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub city_of_birth: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub country_of_birth: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
