//! Errors raised by the policy engine

use std::fmt;

use thiserror::Error;

/// Step of a policy synchronization, reported with the error that aborted it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    LoadEnforcer,
    LoadPermissions,
    ResolveBackend,
    ExpandGroups,
    ClearPolicy,
    InsertPolicy,
    AssignRoles,
    SavePolicy,
}

impl SyncStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::LoadEnforcer => "load enforcer",
            SyncStep::LoadPermissions => "load permissions",
            SyncStep::ResolveBackend => "resolve backend",
            SyncStep::ExpandGroups => "expand groups",
            SyncStep::ClearPolicy => "clear policy",
            SyncStep::InsertPolicy => "insert policy",
            SyncStep::AssignRoles => "assign roles",
            SyncStep::SavePolicy => "save policy",
        }
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid casbin model: {0}")]
    InvalidModel(String),

    #[error("failed to initialize enforcer: {0}")]
    EnforcerInit(String),

    #[error("policy storage error: {0}")]
    Storage(String),

    #[error("matcher rejected the operation: {0}")]
    Matcher(String),

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("policy sync failed at step `{step}`: {source}")]
    Sync {
        step: SyncStep,
        #[source]
        source: Box<AuthzError>,
    },
}

impl AuthzError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        AuthzError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Wrap an error with the sync step it interrupted
    pub fn at_step(step: SyncStep) -> impl FnOnce(AuthzError) -> AuthzError {
        move |source| AuthzError::Sync {
            step,
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping sync annotations
    pub fn root(&self) -> &AuthzError {
        match self {
            AuthzError::Sync { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<sea_orm::DbErr> for AuthzError {
    fn from(err: sea_orm::DbErr) -> Self {
        AuthzError::Storage(err.to_string())
    }
}

pub type AuthzResult<T> = Result<T, AuthzError>;
