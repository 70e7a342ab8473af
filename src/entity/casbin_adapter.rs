//! CasbinAdapter entity - where the compiled policies of an enforcer live
//!
//! Table: idp_casbin_adapter

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "idp_casbin_adapter")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub tenant_id: String,

    pub name: String,

    /// Policy table name, also the file stem of embedded policy databases
    #[sea_orm(column_type = "String(Some(64))")]
    pub table_name: String,

    /// Policies live in a database described by the fields below
    pub external_db: bool,

    /// mysql, postgres or sqlite
    pub driver: String,

    pub host: String,

    pub port: String,

    pub username: String,

    #[serde(skip_serializing)]
    pub password: String,

    pub database_name: String,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
