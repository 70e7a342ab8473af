//! Enforcer entity - binds one casbin model to one policy adapter
//!
//! Table: idp_enforcer

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "idp_enforcer")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub tenant_id: String,

    pub name: String,

    pub description: String,

    /// Casbin model definition used for matching
    pub model_id: String,

    /// Storage descriptor for the compiled policies
    pub adapter_id: String,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
