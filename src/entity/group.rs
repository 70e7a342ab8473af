//! Group entity - tenant-scoped node of the group forest
//!
//! Table: idp_group

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "idp_group")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub tenant_id: String,

    /// Parent group, None for roots
    #[sea_orm(nullable, indexed)]
    pub parent_group_id: Option<String>,

    #[sea_orm(column_type = "String(Some(100))")]
    pub display_name: String,

    pub enabled: bool,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

// Membership is resolved by querying user_group directly

impl ActiveModelBehavior for ActiveModel {}
