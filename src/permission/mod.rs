//! Permission module using Casbin
//!
//! Compiles tenant permissions into casbin policies, keeps each enforcer's
//! store in step with its permissions and answers authorization requests.

mod adapter;
mod cache;
mod closure;
mod compiler;
mod error;
mod gateway;
mod resolver;
mod sync;

use std::sync::Arc;

use dashmap::DashMap;
use sea_orm::DatabaseConnection;
use tracing::debug;

use crate::config::PolicyConfig;

pub use cache::{EnforcerCache, EnforcerKey};
pub use closure::{close_group, GroupClosure};
pub use compiler::{compile, cross_join, rule_count, PolicyTuple, GENERIC_COLUMNS};
pub use error::{AuthzError, AuthzResult, SyncStep};
pub use gateway::{request_args, StoredPolicy};
pub use resolver::{
    external_dsn, parse_model, validate_table_name, GroupPropagation, PolicyBackend,
    ResolvedEnforcer,
};
pub use sync::SyncReport;

/// Policy engine shared by all request handlers
#[derive(Clone)]
pub struct PolicyEngine {
    db: DatabaseConnection,
    config: Arc<PolicyConfig>,
    cache: Arc<EnforcerCache>,
    /// Policy store connections by URL
    pools: Arc<DashMap<String, DatabaseConnection>>,
}

impl PolicyEngine {
    pub fn new(db: DatabaseConnection, config: PolicyConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
            cache: Arc::new(EnforcerCache::new()),
            pools: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Enforcers currently held resolved in memory
    pub async fn cached_enforcers(&self) -> usize {
        self.cache.cached().await
    }

    /// Closure of a group subtree of the tenant
    pub async fn close_group(&self, tenant_id: &str, group_id: &str) -> AuthzResult<GroupClosure> {
        close_group(&self.db, tenant_id, group_id).await
    }

    pub async fn invalidate_enforcer(&self, tenant_id: &str, enforcer_id: &str) {
        self.cache.invalidate(tenant_id, enforcer_id).await;
    }

    /// Forget everything cached for a deleted enforcer
    pub async fn forget_enforcer(&self, tenant_id: &str, enforcer_id: &str) {
        self.cache.evict(tenant_id, enforcer_id).await;
    }

    pub async fn invalidate_model(&self, tenant_id: &str, model_id: &str) {
        let dropped = self.cache.invalidate_model(tenant_id, model_id).await;
        debug!(tenant = tenant_id, model = model_id, dropped, "model changed");
    }

    pub async fn invalidate_adapter(&self, tenant_id: &str, adapter_id: &str) {
        let dropped = self.cache.invalidate_adapter(tenant_id, adapter_id).await;
        debug!(tenant = tenant_id, adapter = adapter_id, dropped, "adapter changed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entity::{casbin_adapter, casbin_model, enforcer, permission, StringList};
    use chrono::Utc;
    use sea_orm::{ActiveModelTrait, EntityTrait, Set};

    pub(crate) const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

    pub(crate) const ACL_MODEL: &str = r#"
[request_definition]
r = sub, obj

[policy_definition]
p = sub, obj

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.obj == p.obj
"#;

    /// Subject plus the five generic columns, compared one to one
    pub(crate) const FLAT_MODEL: &str = r#"
[request_definition]
r = sub, v1, v2, v3, v4, v5

[policy_definition]
p = sub, v1, v2, v3, v4, v5

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.v1 == p.v1 && r.v2 == p.v2 && r.v3 == p.v3 && r.v4 == p.v4 && r.v5 == p.v5
"#;

    pub(crate) async fn engine_with(cache: bool) -> (tempfile::TempDir, PolicyEngine) {
        let (dir, db) = crate::db::tests::sqlite_db().await;
        let config = PolicyConfig {
            dir: dir.path().join("policies"),
            cache,
            ..Default::default()
        };
        (dir, PolicyEngine::new(db, config))
    }

    pub(crate) async fn engine() -> (tempfile::TempDir, PolicyEngine) {
        engine_with(true).await
    }

    /// Enforcer `enforcer_id` bound to a model `{enforcer_id}-model` and an
    /// adapter whose id and table are both `table`
    pub(crate) async fn seed_enforcer(
        engine: &PolicyEngine,
        tenant_id: &str,
        enforcer_id: &str,
        model: &str,
        table: &str,
    ) {
        let now = Utc::now();
        let model_id = format!("{}-model", enforcer_id);
        casbin_model::ActiveModel {
            id: Set(model_id.clone()),
            tenant_id: Set(tenant_id.to_string()),
            name: Set(model_id.clone()),
            description: Set(String::new()),
            model: Set(model.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&engine.db)
        .await
        .unwrap();

        if casbin_adapter::Entity::find_by_id(table.to_string())
            .one(&engine.db)
            .await
            .unwrap()
            .is_none()
        {
            casbin_adapter::ActiveModel {
                id: Set(table.to_string()),
                tenant_id: Set(tenant_id.to_string()),
                name: Set(table.to_string()),
                table_name: Set(table.to_string()),
                external_db: Set(false),
                driver: Set(String::new()),
                host: Set(String::new()),
                port: Set(String::new()),
                username: Set(String::new()),
                password: Set(String::new()),
                database_name: Set(String::new()),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&engine.db)
            .await
            .unwrap();
        }

        enforcer::ActiveModel {
            id: Set(enforcer_id.to_string()),
            tenant_id: Set(tenant_id.to_string()),
            name: Set(enforcer_id.to_string()),
            description: Set(String::new()),
            model_id: Set(model_id),
            adapter_id: Set(table.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&engine.db)
        .await
        .unwrap();
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn seed_permission_columns(
        engine: &PolicyEngine,
        tenant_id: &str,
        enforcer_id: &str,
        id: &str,
        users: &[&str],
        groups: &[&str],
        columns: [&[&str]; 5],
    ) {
        let list = |values: &[&str]| StringList(values.iter().map(|v| v.to_string()).collect());
        let now = Utc::now();
        permission::ActiveModel {
            id: Set(id.to_string()),
            tenant_id: Set(tenant_id.to_string()),
            enforcer_id: Set(enforcer_id.to_string()),
            name: Set(id.to_string()),
            description: Set(String::new()),
            users: Set(list(users)),
            groups: Set(list(groups)),
            v1: Set(list(columns[0])),
            v2: Set(list(columns[1])),
            v3: Set(list(columns[2])),
            v4: Set(list(columns[3])),
            v5: Set(list(columns[4])),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&engine.db)
        .await
        .unwrap();
    }

    pub(crate) async fn seed_permission(
        engine: &PolicyEngine,
        tenant_id: &str,
        enforcer_id: &str,
        id: &str,
        users: &[&str],
        groups: &[&str],
        v1: &[&str],
    ) {
        seed_permission_columns(engine, tenant_id, enforcer_id, id, users, groups, [v1, &[], &[], &[], &[]])
            .await;
    }

    /// Switch an adapter to an external sqlite database at `path`
    pub(crate) async fn make_external(engine: &PolicyEngine, tenant_id: &str, adapter_id: &str, path: &str) {
        let record = crate::repository::find_casbin_adapter(&engine.db, tenant_id, adapter_id)
            .await
            .unwrap();
        let mut active: casbin_adapter::ActiveModel = record.into();
        active.external_db = Set(true);
        active.driver = Set("sqlite3".to_string());
        active.database_name = Set(path.to_string());
        active.update(&engine.db).await.unwrap();
    }

    #[tokio::test]
    async fn test_embedded_backend_creates_policy_file() {
        let (dir, engine) = engine().await;
        seed_enforcer(&engine, "t1", "e1", RBAC_MODEL, "tenant_rules").await;
        seed_permission(&engine, "t1", "e1", "p1", &["u1"], &[], &["read"]).await;
        engine.sync("t1", "e1").await.unwrap();

        assert!(dir.path().join("policies").join("tenant_rules.db").exists());
    }

    #[tokio::test]
    async fn test_pools_are_reused() {
        let (_dir, engine) = engine().await;
        seed_enforcer(&engine, "t1", "e1", RBAC_MODEL, "shared_rules").await;
        seed_enforcer(&engine, "t1", "e2", ACL_MODEL, "shared_rules").await;
        engine.sync("t1", "e1").await.unwrap();
        engine.sync("t1", "e2").await.unwrap();
        engine.sync("t1", "e1").await.unwrap();

        assert_eq!(engine.pools.len(), 1);
    }

    #[tokio::test]
    async fn test_model_change_invalidates_cache() {
        let (_dir, engine) = engine().await;
        seed_enforcer(&engine, "t1", "e1", RBAC_MODEL, "rules").await;
        seed_enforcer(&engine, "t1", "e2", ACL_MODEL, "acl_rules").await;
        engine.sync("t1", "e1").await.unwrap();
        engine.sync("t1", "e2").await.unwrap();
        assert_eq!(engine.cache.cached().await, 2);

        engine.invalidate_model("t1", "e1-model").await;
        assert_eq!(engine.cache.cached().await, 1);

        engine.invalidate_adapter("t1", "acl_rules").await;
        assert_eq!(engine.cache.cached().await, 0);

        // Other tenants are untouched by name collisions
        engine.sync("t1", "e1").await.unwrap();
        engine.invalidate_model("t2", "e1-model").await;
        assert_eq!(engine.cache.cached().await, 1);
    }

    #[tokio::test]
    async fn test_rebinding_enforcer_resolves_again() {
        let (_dir, engine) = engine().await;
        seed_enforcer(&engine, "t1", "e1", RBAC_MODEL, "rules").await;
        seed_permission(&engine, "t1", "e1", "p1", &["u1"], &[], &["read"]).await;
        engine.sync("t1", "e1").await.unwrap();

        seed_enforcer(&engine, "t1", "e2", ACL_MODEL, "acl_rules").await;
        let record = crate::repository::find_enforcer(&engine.db, "t1", "e1").await.unwrap();
        let mut active: enforcer::ActiveModel = record.into();
        active.model_id = Set("e2-model".to_string());
        active.adapter_id = Set("acl_rules".to_string());
        active.update(&engine.db).await.unwrap();

        // The cached handle no longer binds; a fresh one reads the ACL store
        let request = vec!["u1".to_string(), "read".to_string()];
        assert!(!engine.enforce("t1", "e1", request.clone()).await.unwrap());
        engine.sync("t1", "e1").await.unwrap();
        assert!(engine.enforce("t1", "e1", request).await.unwrap());
    }
}
