//! CasbinModel entity - tenant-owned casbin model definition
//!
//! Table: idp_casbin_model

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "idp_casbin_model")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub tenant_id: String,

    pub name: String,

    pub description: String,

    /// Model text: request/policy/role definitions, effect and matchers
    #[sea_orm(column_type = "Text")]
    pub model: String,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
