//! Enforcer backend resolution
//!
//! Turns a (model, adapter) pair into a casbin enforcer bound to the store
//! the adapter describes.

use std::path::{Path, PathBuf};

use casbin::{CoreApi, DefaultModel, Enforcer, Model};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend};
use tracing::{debug, instrument};

use super::adapter::PolicyTableAdapter;
use super::{AuthzError, AuthzResult, PolicyEngine};
use crate::entity::{casbin_adapter, enforcer};
use crate::repository;

/// Longest accepted policy table name
pub const MAX_TABLE_NAME_LEN: usize = 64;

/// Where an adapter's policies are stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyBackend {
    /// Database described by the adapter's own connection fields
    External { dsn: String },
    /// Dedicated sqlite file next to the other policy files
    EmbeddedFile { path: PathBuf },
    /// The primary connection, in the adapter's table
    Shared,
}

impl PolicyBackend {
    /// Pick the backend for `adapter` given the primary database engine
    pub fn select(
        adapter: &casbin_adapter::Model,
        primary: DbBackend,
        dir: &Path,
    ) -> AuthzResult<Self> {
        validate_table_name(&adapter.table_name).map_err(AuthzError::EnforcerInit)?;

        if adapter.external_db {
            return Ok(PolicyBackend::External {
                dsn: external_dsn(adapter)?,
            });
        }

        match primary {
            DbBackend::Sqlite => Ok(PolicyBackend::EmbeddedFile {
                path: dir.join(format!("{}.db", adapter.table_name)),
            }),
            _ => Ok(PolicyBackend::Shared),
        }
    }

    /// Tenant the adapter's rows are scoped to. External databases belong to
    /// the tenant and keep the plain casbin layout.
    pub fn scope<'a>(&self, tenant_id: &'a str) -> Option<&'a str> {
        match self {
            PolicyBackend::External { .. } => None,
            PolicyBackend::EmbeddedFile { .. } | PolicyBackend::Shared => Some(tenant_id),
        }
    }

    /// Identifies the physical table behind `table` on this backend
    pub fn location(&self, table: &str) -> String {
        match self {
            PolicyBackend::External { dsn } => format!("{}#{}", dsn, table),
            PolicyBackend::EmbeddedFile { path } => format!("{}#{}", path.display(), table),
            PolicyBackend::Shared => format!("primary#{}", table),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PolicyBackend::External { .. } => "external",
            PolicyBackend::EmbeddedFile { .. } => "embedded",
            PolicyBackend::Shared => "shared",
        }
    }
}

/// How group subjects reach users at sync time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPropagation {
    /// Groups are roles; users get one `g` rule per direct group
    RoleAssignment,
    /// Groups are expanded into the users of their subtree before compiling
    Closure,
}

impl GroupPropagation {
    /// RoleAssignment when the model defines `g` inside its role section
    pub fn detect(model: &dyn Model) -> Self {
        let has_role_relation = model
            .get_model()
            .get("g")
            .is_some_and(|section| section.contains_key("g"));
        if has_role_relation {
            GroupPropagation::RoleAssignment
        } else {
            GroupPropagation::Closure
        }
    }
}

/// An enforcer together with what it was built from
pub struct ResolvedEnforcer {
    pub enforcer: Enforcer,
    pub model_id: String,
    pub adapter_id: String,
    pub propagation: GroupPropagation,
    /// Token count of the `p` definition
    pub policy_arity: usize,
    /// Physical store the enforcer reads, see [`PolicyBackend::location`]
    pub store: String,
}

impl ResolvedEnforcer {
    /// Whether this handle still matches the enforcer record's bindings
    pub fn binds(&self, record: &enforcer::Model) -> bool {
        self.model_id == record.model_id && self.adapter_id == record.adapter_id
    }
}

/// Check a policy table name: identifier characters, not led by a digit
pub fn validate_table_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("table name is required".to_string());
    }
    if name.len() > MAX_TABLE_NAME_LEN {
        return Err(format!(
            "table name `{}` is longer than {} characters",
            name, MAX_TABLE_NAME_LEN
        ));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(format!("table name `{}` must not start with a digit", name));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "table name `{}` may only contain letters, digits and underscores",
            name
        ));
    }
    Ok(())
}

/// Connection URL of an external adapter, built from its own fields
pub fn external_dsn(adapter: &casbin_adapter::Model) -> AuthzResult<String> {
    let driver = adapter.driver.trim().to_ascii_lowercase();
    match driver.as_str() {
        "mysql" => Ok(format!(
            "mysql://{}:{}@{}:{}/{}",
            adapter.username, adapter.password, adapter.host, adapter.port, adapter.database_name
        )),
        "postgres" | "postgresql" | "pgx" => Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            adapter.username, adapter.password, adapter.host, adapter.port, adapter.database_name
        )),
        "sqlite" | "sqlite3" => Ok(format!("sqlite://{}?mode=rwc", adapter.database_name)),
        other => Err(AuthzError::EnforcerInit(format!(
            "unsupported adapter driver `{}`",
            other
        ))),
    }
}

/// Parse model text, requiring the request, policy, effect and matcher sections
pub async fn parse_model(text: &str) -> AuthzResult<DefaultModel> {
    let model = DefaultModel::from_str(text)
        .await
        .map_err(|e| AuthzError::InvalidModel(e.to_string()))?;

    for (sec, label) in [
        ("r", "request_definition"),
        ("p", "policy_definition"),
        ("e", "policy_effect"),
        ("m", "matchers"),
    ] {
        let defined = model
            .get_model()
            .get(sec)
            .is_some_and(|section| section.contains_key(sec));
        if !defined {
            return Err(AuthzError::InvalidModel(format!("missing [{}] section", label)));
        }
    }
    Ok(model)
}

fn policy_arity(model: &dyn Model) -> usize {
    model
        .get_model()
        .get("p")
        .and_then(|section| section.get("p"))
        .map(|assertion| assertion.tokens.len())
        .unwrap_or(0)
}

impl PolicyEngine {
    /// Build an enforcer for a model and adapter of one tenant
    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub async fn resolve(
        &self,
        tenant_id: &str,
        model_id: &str,
        adapter_id: &str,
    ) -> AuthzResult<ResolvedEnforcer> {
        let model_record = repository::find_casbin_model(&self.db, tenant_id, model_id).await?;
        let adapter_record =
            repository::find_casbin_adapter(&self.db, tenant_id, adapter_id).await?;

        let backend = PolicyBackend::select(
            &adapter_record,
            self.db.get_database_backend(),
            &self.config.dir,
        )?;
        debug!(
            backend = backend.kind(),
            table = %adapter_record.table_name,
            "resolved policy backend"
        );
        let conn = self.connect(&backend).await?;

        let model = parse_model(&model_record.model).await?;
        let propagation = GroupPropagation::detect(&model);
        let arity = policy_arity(&model);

        let store = backend.location(&adapter_record.table_name);
        let adapter = PolicyTableAdapter::new(
            conn,
            &adapter_record.table_name,
            backend.scope(tenant_id),
        )
        .await?;
        let enforcer = Enforcer::new(model, adapter)
            .await
            .map_err(|e| AuthzError::EnforcerInit(e.to_string()))?;

        Ok(ResolvedEnforcer {
            enforcer,
            model_id: model_record.id,
            adapter_id: adapter_record.id,
            propagation,
            policy_arity: arity,
            store,
        })
    }

    /// Connection for a backend, reusing pools opened earlier
    async fn connect(&self, backend: &PolicyBackend) -> AuthzResult<DatabaseConnection> {
        let url = match backend {
            PolicyBackend::Shared => return Ok(self.db.clone()),
            PolicyBackend::External { dsn } => dsn.clone(),
            PolicyBackend::EmbeddedFile { path } => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        AuthzError::EnforcerInit(format!(
                            "failed to create policy directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
                format!("sqlite://{}?mode=rwc", path.display())
            }
        };

        if let Some(conn) = self.pools.get(&url) {
            return Ok(conn.clone());
        }

        let conn = Database::connect(&url)
            .await
            .map_err(|e| AuthzError::EnforcerInit(format!("policy store unreachable: {}", e)))?;
        let conn = self.pools.entry(url).or_insert(conn).clone();
        Ok(conn)
    }
}
