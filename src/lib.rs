//! Identity - authorization policy service of a multi-tenant identity provider
//!
//! Tenants define casbin models, policy adapters and enforcers, attach
//! permissions to enforcers and query them for decisions. Permissions are
//! compiled into policy rules and synced into each enforcer's store.

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod permission;
pub mod repository;
pub mod routes;
pub mod state;

// Re-export commonly used types
pub use config::Config;
pub use state::AppState;
