//! Request handlers module
//!
//! Every route is nested under a tenant; handlers pass the tenant id to each
//! lookup and never touch another tenant's rows.

pub mod adapter;
pub mod enforcer;
pub mod group;
pub mod model;
pub mod permission;
pub mod user;

use crate::error::{AppError, AppResult};
use crate::permission::{AuthzError, PolicyEngine};

/// Id for a new record
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reject an empty or blank required field
pub(crate) fn require(value: &str, field: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Turn a missing referenced record into a validation error
pub(crate) fn referenced<T>(result: Result<T, AuthzError>) -> AppResult<T> {
    match result {
        Ok(record) => Ok(record),
        Err(AuthzError::NotFound { kind, id }) => Err(AppError::Validation(format!(
            "referenced {} `{}` does not exist",
            kind, id
        ))),
        Err(err) => Err(err.into()),
    }
}

/// Resync enforcers after a write, collecting failures as a warning.
///
/// The write itself already succeeded, so a failed sync never fails the request.
pub(crate) async fn resync<I>(engine: &PolicyEngine, tenant_id: &str, enforcer_ids: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let mut failures = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for enforcer_id in enforcer_ids {
        if !seen.insert(enforcer_id.clone()) {
            continue;
        }
        if let Err(err) = engine.sync(tenant_id, &enforcer_id).await {
            tracing::warn!(tenant = tenant_id, enforcer = %enforcer_id, "write saved, policy sync failed: {}", err);
            failures.push(format!("enforcer {}: {}", enforcer_id, err));
        }
    }
    if failures.is_empty() {
        None
    } else {
        Some(format!(
            "saved, but the enforcement store may be stale: {}",
            failures.join("; ")
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::routes::create_router;
    use crate::state::AppState;

    pub(crate) async fn app() -> (tempfile::TempDir, Router) {
        let (dir, db) = crate::db::tests::sqlite_db().await;
        let mut config = Config::default();
        config.policy.dir = dir.path().join("policies");
        (dir, create_router(AppState::new(db, config)))
    }

    /// Send a request and return the status with the decoded JSON body
    pub(crate) async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}
