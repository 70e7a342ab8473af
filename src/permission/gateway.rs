//! Live authorization decisions
//!
//! A denial is `Ok(false)`; failing to reach a decision is always an `Err`.

use casbin::{CoreApi, MgmtApi};
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use super::resolver::ResolvedEnforcer;
use super::{AuthzError, AuthzResult, PolicyEngine};
use crate::repository;

/// Rules held by an enforcer's store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredPolicy {
    pub policies: Vec<Vec<String>>,
    pub grouping: Vec<Vec<String>>,
}

/// Request values as handed to the matcher: strings verbatim, anything else as JSON text
pub fn request_args(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

fn decide(resolved: &ResolvedEnforcer, request: Vec<String>) -> AuthzResult<bool> {
    resolved
        .enforcer
        .enforce(request)
        .map_err(|e| AuthzError::Matcher(e.to_string()))
}

impl PolicyEngine {
    /// Evaluate `request` against one enforcer
    #[instrument(skip(self, request), fields(tenant = %tenant_id, enforcer = %enforcer_id))]
    pub async fn enforce(
        &self,
        tenant_id: &str,
        enforcer_id: &str,
        request: Vec<String>,
    ) -> AuthzResult<bool> {
        let deadline = self.config.timeout();
        tokio::time::timeout(deadline, self.enforce_inner(tenant_id, enforcer_id, request))
            .await
            .unwrap_or_else(|_| Err(AuthzError::Timeout(deadline.as_secs())))
    }

    async fn enforce_inner(
        &self,
        tenant_id: &str,
        enforcer_id: &str,
        request: Vec<String>,
    ) -> AuthzResult<bool> {
        let record = repository::find_enforcer(&self.db, tenant_id, enforcer_id).await?;
        let slot = self.cache.slot(tenant_id, enforcer_id);

        if !self.config.cache {
            // Wait out a running sync, then decide on a fresh handle
            let _guard = slot.read().await;
            let resolved = self
                .resolve(tenant_id, &record.model_id, &record.adapter_id)
                .await?;
            return decide(&resolved, request);
        }

        {
            let guard = slot.read().await;
            if let Some(resolved) = guard.as_ref().filter(|r| r.binds(&record)) {
                return decide(resolved, request);
            }
        }

        let mut guard = slot.write().await;
        let resolved = match guard.take() {
            Some(resolved) if resolved.binds(&record) => resolved,
            _ => {
                self.resolve(tenant_id, &record.model_id, &record.adapter_id)
                    .await?
            }
        };
        let verdict = decide(&resolved, request);
        *guard = Some(resolved);
        verdict
    }

    /// Rules as currently persisted in an enforcer's store
    #[instrument(skip(self), fields(tenant = %tenant_id, enforcer = %enforcer_id))]
    pub async fn stored_policy(&self, tenant_id: &str, enforcer_id: &str) -> AuthzResult<StoredPolicy> {
        let record = repository::find_enforcer(&self.db, tenant_id, enforcer_id).await?;
        let slot = self.cache.slot(tenant_id, enforcer_id);
        let _guard = slot.read().await;

        let resolved = self
            .resolve(tenant_id, &record.model_id, &record.adapter_id)
            .await?;
        Ok(StoredPolicy {
            policies: resolved.enforcer.get_policy(),
            grouping: resolved.enforcer.get_grouping_policy(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::tests::{
        engine, engine_with, make_external, seed_enforcer, seed_permission, FLAT_MODEL, RBAC_MODEL,
    };
    use crate::permission::SyncStep;
    use serde_json::json;

    fn request(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_request_args() {
        let values = vec![json!("u1"), json!(3), json!(true), json!({"k": "v"}), json!(null)];
        assert_eq!(
            request_args(&values),
            vec!["u1", "3", "true", r#"{"k":"v"}"#, "null"]
        );
    }

    #[tokio::test]
    async fn test_end_to_end_read_grant() {
        let (_dir, engine) = engine().await;
        seed_enforcer(&engine, "t1", "e1", FLAT_MODEL, "flat_rules").await;
        seed_permission(&engine, "t1", "e1", "p1", &["u1"], &[], &["read", "write"]).await;
        engine.sync("t1", "e1").await.unwrap();

        let allowed = engine
            .enforce("t1", "e1", request(&["u1", "read", "", "", "", ""]))
            .await
            .unwrap();
        assert!(allowed);

        let denied = engine
            .enforce("t1", "e1", request(&["u2", "read", "", "", "", ""]))
            .await
            .unwrap();
        assert!(!denied);
    }

    #[tokio::test]
    async fn test_denial_and_error_are_distinct() {
        let (dir, engine) = engine().await;
        seed_enforcer(&engine, "t1", "e1", RBAC_MODEL, "rules").await;
        seed_permission(&engine, "t1", "e1", "p1", &["u1"], &[], &["read"]).await;
        engine.sync("t1", "e1").await.unwrap();

        let denial = engine.enforce("t1", "e1", request(&["u2", "read", ""])).await;
        assert!(matches!(denial, Ok(false)));

        // Point the adapter at a database file whose directory does not exist
        make_external(
            &engine,
            "t1",
            "rules",
            &dir.path().join("missing/dir/policy.db").display().to_string(),
        )
        .await;
        engine.invalidate_adapter("t1", "rules").await;

        let failure = engine.enforce("t1", "e1", request(&["u1", "read", ""])).await;
        assert!(matches!(failure, Err(AuthzError::EnforcerInit(_))));

        let err = engine.sync("t1", "e1").await.unwrap_err();
        assert!(matches!(err, AuthzError::Sync { step: SyncStep::ResolveBackend, .. }));
    }

    #[tokio::test]
    async fn test_request_arity_mismatch_is_error() {
        let (_dir, engine) = engine().await;
        seed_enforcer(&engine, "t1", "e1", RBAC_MODEL, "rules").await;
        seed_permission(&engine, "t1", "e1", "p1", &["u1"], &[], &["read"]).await;
        engine.sync("t1", "e1").await.unwrap();

        let result = engine.enforce("t1", "e1", request(&["u1"])).await;
        assert!(matches!(result, Err(AuthzError::Matcher(_))));
    }

    #[tokio::test]
    async fn test_unknown_enforcer() {
        let (_dir, engine) = engine().await;
        let result = engine.enforce("t1", "nope", request(&["u1", "read", ""])).await;
        assert!(matches!(result, Err(AuthzError::NotFound { kind: "enforcer", .. })));
    }

    #[tokio::test]
    async fn test_enforce_without_cache() {
        let (_dir, engine) = engine_with(false).await;
        seed_enforcer(&engine, "t1", "e1", RBAC_MODEL, "rules").await;
        seed_permission(&engine, "t1", "e1", "p1", &["u1"], &[], &["read"]).await;
        engine.sync("t1", "e1").await.unwrap();
        assert_eq!(engine.cache.cached().await, 0);

        assert!(engine.enforce("t1", "e1", request(&["u1", "read", ""])).await.unwrap());
        assert_eq!(engine.cache.cached().await, 0);
    }

    #[tokio::test]
    async fn test_enforce_fills_cache() {
        let (_dir, engine) = engine().await;
        seed_enforcer(&engine, "t1", "e1", RBAC_MODEL, "rules").await;
        seed_permission(&engine, "t1", "e1", "p1", &["u1"], &[], &["read"]).await;
        engine.sync("t1", "e1").await.unwrap();
        engine.invalidate_enforcer("t1", "e1").await;
        assert_eq!(engine.cache.cached().await, 0);

        assert!(engine.enforce("t1", "e1", request(&["u1", "read", ""])).await.unwrap());
        assert_eq!(engine.cache.cached().await, 1);
    }
}
