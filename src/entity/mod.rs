//! Entity module - SeaORM entity definitions
//!
//! Every entity is owned by one tenant and carries its `tenant_id`

pub mod casbin_adapter;
pub mod casbin_model;
pub mod enforcer;
pub mod group;
pub mod permission;
pub mod string_list;
pub mod user;
pub mod user_group;

pub use string_list::StringList;
