//! User entity
//!
//! Table: idp_user

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "idp_user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub tenant_id: String,

    #[sea_orm(column_type = "String(Some(100))")]
    pub username: String,

    #[sea_orm(column_type = "String(Some(100))")]
    pub display_name: String,

    #[sea_orm(column_type = "String(Some(100))")]
    pub email: String,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// User with direct group memberships
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserResponse {
    #[serde(flatten)]
    pub user: Model,
    pub groups: Vec<String>,
}
