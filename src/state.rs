use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::Config;
use crate::permission::PolicyEngine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Primary entity database
    pub db: DatabaseConnection,
    /// Policy compiler and enforcement engine
    pub engine: PolicyEngine,
    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state
    pub fn new(db: DatabaseConnection, config: Config) -> Self {
        let engine = PolicyEngine::new(db.clone(), config.policy.clone());
        Self {
            db,
            engine,
            config: Arc::new(config),
        }
    }
}
