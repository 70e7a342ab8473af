//! Permission entity - named rule template compiled into casbin policies
//!
//! Table: idp_permission

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::StringList;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "idp_permission")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub tenant_id: String,

    /// Enforcer whose policy set this permission compiles into
    #[sea_orm(indexed)]
    pub enforcer_id: String,

    pub name: String,

    pub description: String,

    /// User ids granted by this permission
    #[sea_orm(column_type = "Json")]
    pub users: StringList,

    /// Group ids, used as role subjects
    #[sea_orm(column_type = "Json")]
    pub groups: StringList,

    #[sea_orm(column_type = "Json")]
    pub v1: StringList,

    #[sea_orm(column_type = "Json")]
    pub v2: StringList,

    #[sea_orm(column_type = "Json")]
    pub v3: StringList,

    #[sea_orm(column_type = "Json")]
    pub v4: StringList,

    #[sea_orm(column_type = "Json")]
    pub v5: StringList,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Subjects in compile order: users first, then groups
    pub fn subjects(&self) -> Vec<String> {
        self.users
            .as_slice()
            .iter()
            .chain(self.groups.as_slice())
            .cloned()
            .collect()
    }

    /// The five generic columns, V1 through V5
    pub fn columns(&self) -> [&[String]; 5] {
        [
            self.v1.as_slice(),
            self.v2.as_slice(),
            self.v3.as_slice(),
            self.v4.as_slice(),
            self.v5.as_slice(),
        ]
    }
}
