//! Casbin policy storage over a sea-orm connection
//!
//! The policy table name is chosen at runtime, so statements are built with
//! sea-query instead of a static entity. Layout: `id`, `ptype`, `v0`..`v5`,
//! with unused columns stored as empty strings. Tables kept in the service's
//! own databases carry a `tenant_id` column as well, and every statement is
//! restricted to the bound tenant's rows.

use async_trait::async_trait;
use casbin::{error::AdapterError, Adapter, Filter, Model};
use sea_orm::sea_query::{
    Alias, ColumnDef, Condition, Expr, Order, Query, SimpleExpr, Table,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, TransactionTrait};

use super::compiler::fit_rule;
use super::AuthzError;

/// Values stored per rule, `v0` through `v5`
const RULE_COLUMNS: usize = 6;

/// Rows per INSERT statement when rewriting the table
const INSERT_CHUNK: usize = 100;

const VALUE_COLUMNS: [&str; RULE_COLUMNS] = ["v0", "v1", "v2", "v3", "v4", "v5"];

const SCOPE_COLUMN: &str = "tenant_id";

/// A stored rule: policy type followed by its six values
type StoredRule = (String, [String; RULE_COLUMNS]);

#[derive(Debug, thiserror::Error)]
enum PolicyTableError {
    #[error(transparent)]
    Db(#[from] DbErr),

    #[error("rule has {0} values, at most {RULE_COLUMNS} are supported")]
    TooWide(usize),

    #[error("failed to build statement: {0}")]
    Statement(String),
}

impl From<PolicyTableError> for casbin::Error {
    fn from(err: PolicyTableError) -> Self {
        AdapterError(Box::new(err)).into()
    }
}

/// Policy store bound to one table of one database
pub struct PolicyTableAdapter {
    db: DatabaseConnection,
    table: String,
    /// Tenant owning the rows this adapter sees; `None` for a plain casbin table
    scope: Option<String>,
    is_filtered: bool,
}

impl PolicyTableAdapter {
    /// Bind to `table`, creating it when missing
    pub async fn new(
        db: DatabaseConnection,
        table: &str,
        scope: Option<&str>,
    ) -> Result<Self, AuthzError> {
        let adapter = Self {
            db,
            table: table.to_string(),
            scope: scope.map(str::to_string),
            is_filtered: false,
        };
        adapter.ensure_table().await.map_err(|e| {
            AuthzError::EnforcerInit(format!("policy table `{}`: {}", table, e))
        })?;
        Ok(adapter)
    }

    fn table(&self) -> Alias {
        Alias::new(&self.table)
    }

    async fn ensure_table(&self) -> Result<(), DbErr> {
        let mut stmt = Table::create();
        stmt.table(self.table())
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new("id"))
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(Alias::new("ptype"))
                    .string_len(12)
                    .not_null()
                    .default(""),
            );
        for column in VALUE_COLUMNS {
            stmt.col(
                ColumnDef::new(Alias::new(column))
                    .string_len(128)
                    .not_null()
                    .default(""),
            );
        }
        if self.scope.is_some() {
            stmt.col(
                ColumnDef::new(Alias::new(SCOPE_COLUMN))
                    .string_len(64)
                    .not_null()
                    .default(""),
            );
        }

        let builder = self.db.get_database_backend();
        self.db.execute(builder.build(&stmt)).await?;
        Ok(())
    }

    async fn select_rules(&self) -> Result<Vec<StoredRule>, PolicyTableError> {
        let mut columns = vec![Alias::new("ptype")];
        columns.extend(VALUE_COLUMNS.iter().map(|c| Alias::new(*c)));
        let stmt = Query::select()
            .columns(columns)
            .from(self.table())
            .cond_where(self.scoped(Condition::all()))
            .order_by(Alias::new("id"), Order::Asc)
            .to_owned();

        let builder = self.db.get_database_backend();
        let rows = self.db.query_all(builder.build(&stmt)).await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let ptype: String = row.try_get("", "ptype")?;
            let mut values: [String; RULE_COLUMNS] = Default::default();
            for (value, column) in values.iter_mut().zip(VALUE_COLUMNS) {
                *value = row.try_get("", column)?;
            }
            rules.push((ptype, values));
        }
        Ok(rules)
    }

    async fn insert_rules<C: ConnectionTrait>(
        &self,
        conn: &C,
        rules: &[StoredRule],
    ) -> Result<(), PolicyTableError> {
        let mut columns = vec![Alias::new("ptype")];
        columns.extend(VALUE_COLUMNS.iter().map(|c| Alias::new(*c)));
        if self.scope.is_some() {
            columns.push(Alias::new(SCOPE_COLUMN));
        }

        for chunk in rules.chunks(INSERT_CHUNK) {
            let mut stmt = Query::insert();
            stmt.into_table(self.table()).columns(columns.clone());
            for (ptype, values) in chunk {
                let mut row: Vec<SimpleExpr> = Vec::with_capacity(RULE_COLUMNS + 2);
                row.push(ptype.clone().into());
                row.extend(values.iter().map(|v| SimpleExpr::from(v.clone())));
                if let Some(scope) = &self.scope {
                    row.push(scope.clone().into());
                }
                stmt.values(row)
                    .map_err(|e| PolicyTableError::Statement(e.to_string()))?;
            }
            conn.execute(conn.get_database_backend().build(&stmt))
                .await?;
        }
        Ok(())
    }

    /// Restrict `condition` to the bound tenant's rows
    fn scoped(&self, condition: Condition) -> Condition {
        match &self.scope {
            Some(scope) => Condition::all()
                .add(Expr::col(Alias::new(SCOPE_COLUMN)).eq(scope.as_str()))
                .add(condition),
            None => condition,
        }
    }

    async fn delete_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        condition: Condition,
    ) -> Result<u64, PolicyTableError> {
        let stmt = Query::delete()
            .from_table(self.table())
            .cond_where(self.scoped(condition))
            .to_owned();
        let result = conn.execute(conn.get_database_backend().build(&stmt)).await?;
        Ok(result.rows_affected())
    }

    async fn delete_where(&self, condition: Condition) -> Result<u64, PolicyTableError> {
        self.delete_in(&self.db, condition).await
    }

    fn rule_condition(ptype: &str, rule: &[String]) -> Result<Condition, PolicyTableError> {
        let values = pad_rule(rule)?;
        let mut condition = Condition::all().add(Expr::col(Alias::new("ptype")).eq(ptype));
        for (column, value) in VALUE_COLUMNS.iter().zip(values) {
            condition = condition.add(Expr::col(Alias::new(*column)).eq(value));
        }
        Ok(condition)
    }
}

/// Widen a rule to the stored column count
fn pad_rule(rule: &[String]) -> Result<[String; RULE_COLUMNS], PolicyTableError> {
    if rule.len() > RULE_COLUMNS {
        return Err(PolicyTableError::TooWide(rule.len()));
    }
    let mut values: [String; RULE_COLUMNS] = Default::default();
    for (slot, value) in values.iter_mut().zip(rule) {
        slot.clone_from(value);
    }
    Ok(values)
}

/// Section of a policy type: `p`, `p2` live in "p", `g`, `g2` in "g"
fn section_of(ptype: &str) -> Option<&'static str> {
    match ptype.chars().next() {
        Some('p') => Some("p"),
        Some('g') => Some("g"),
        _ => None,
    }
}

/// Arity declared for `ptype`; grouping definitions declare none
fn arity_of(m: &dyn Model, sec: &str, ptype: &str) -> usize {
    m.get_model()
        .get(sec)
        .and_then(|assertions| assertions.get(ptype))
        .map(|assertion| assertion.tokens.len())
        .unwrap_or(0)
}

/// Every rule currently held by the model, in section then insertion order
fn model_rules(m: &dyn Model) -> Result<Vec<StoredRule>, PolicyTableError> {
    let mut rules = Vec::new();
    for sec in ["p", "g"] {
        let Some(assertions) = m.get_model().get(sec) else {
            continue;
        };
        let mut ptypes: Vec<&String> = assertions.keys().collect();
        ptypes.sort();
        for ptype in ptypes {
            if let Some(assertion) = assertions.get(ptype) {
                for rule in assertion.get_policy() {
                    rules.push((ptype.clone(), pad_rule(rule)?));
                }
            }
        }
    }
    Ok(rules)
}

fn matches_filter(values: &[String; RULE_COLUMNS], filter: &[&str]) -> bool {
    filter
        .iter()
        .zip(values)
        .all(|(wanted, value)| wanted.is_empty() || *wanted == value)
}

#[async_trait]
impl Adapter for PolicyTableAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        for (ptype, values) in self.select_rules().await? {
            let Some(sec) = section_of(&ptype) else {
                continue;
            };
            let rule = fit_rule(values.to_vec(), arity_of(m, sec, &ptype));
            m.add_policy(sec, &ptype, rule);
        }
        self.is_filtered = false;
        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        m: &mut dyn Model,
        f: Filter<'a>,
    ) -> casbin::Result<()> {
        for (ptype, values) in self.select_rules().await? {
            let Some(sec) = section_of(&ptype) else {
                continue;
            };
            let filter = if sec == "p" { &f.p } else { &f.g };
            if !matches_filter(&values, filter) {
                continue;
            }
            let rule = fit_rule(values.to_vec(), arity_of(m, sec, &ptype));
            m.add_policy(sec, &ptype, rule);
        }
        self.is_filtered = true;
        Ok(())
    }

    /// Replace this adapter's rows with the model's rules in one transaction
    async fn save_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        let rules = model_rules(m)?;

        let txn = self.db.begin().await.map_err(PolicyTableError::from)?;
        self.delete_in(&txn, Condition::all()).await?;
        self.insert_rules(&txn, &rules).await?;
        txn.commit().await.map_err(PolicyTableError::from)?;
        Ok(())
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        self.delete_where(Condition::all()).await?;
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        self.is_filtered
    }

    async fn add_policy(&mut self, _sec: &str, ptype: &str, rule: Vec<String>) -> casbin::Result<bool> {
        let values = pad_rule(&rule)?;
        self.insert_rules(&self.db, &[(ptype.to_string(), values)])
            .await?;
        Ok(true)
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        let stored = rules
            .iter()
            .map(|rule| pad_rule(rule).map(|values| (ptype.to_string(), values)))
            .collect::<Result<Vec<_>, _>>()?;

        let txn = self.db.begin().await.map_err(PolicyTableError::from)?;
        self.insert_rules(&txn, &stored).await?;
        txn.commit().await.map_err(PolicyTableError::from)?;
        Ok(true)
    }

    async fn remove_policy(&mut self, _sec: &str, ptype: &str, rule: Vec<String>) -> casbin::Result<bool> {
        let removed = self.delete_where(Self::rule_condition(ptype, &rule)?).await?;
        Ok(removed > 0)
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        let mut any = Condition::any();
        for rule in &rules {
            any = any.add(Self::rule_condition(ptype, rule)?);
        }
        let removed = self.delete_where(any).await?;
        Ok(removed > 0)
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        if field_index + field_values.len() > RULE_COLUMNS {
            return Err(PolicyTableError::TooWide(field_index + field_values.len()).into());
        }
        let mut condition = Condition::all().add(Expr::col(Alias::new("ptype")).eq(ptype));
        for (offset, value) in field_values.into_iter().enumerate() {
            if !value.is_empty() {
                let column = VALUE_COLUMNS[field_index + offset];
                condition = condition.add(Expr::col(Alias::new(column)).eq(value));
            }
        }
        let removed = self.delete_where(condition).await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casbin::{CoreApi, DefaultModel, Enforcer, MgmtApi};
    use sea_orm::Database;

    const MODEL: &str = r#"
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

    async fn sqlite(dir: &tempfile::TempDir) -> DatabaseConnection {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("policy.db").display());
        Database::connect(&url).await.unwrap()
    }

    fn rule(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let db = sqlite(&dir).await;

        let model = DefaultModel::from_str(MODEL).await.unwrap();
        let adapter = PolicyTableAdapter::new(db.clone(), "policy_rules", None).await.unwrap();
        let mut enforcer = Enforcer::new(model, adapter).await.unwrap();
        enforcer.enable_auto_save(false);
        enforcer.add_policy(rule(&["admins", "doc", "read"])).await.unwrap();
        enforcer.add_grouping_policy(rule(&["alice", "admins"])).await.unwrap();
        enforcer.save_policy().await.unwrap();

        let model = DefaultModel::from_str(MODEL).await.unwrap();
        let adapter = PolicyTableAdapter::new(db, "policy_rules", None).await.unwrap();
        let reloaded = Enforcer::new(model, adapter).await.unwrap();
        assert_eq!(reloaded.get_policy(), vec![rule(&["admins", "doc", "read"])]);
        assert_eq!(reloaded.get_grouping_policy(), vec![rule(&["alice", "admins"])]);
        assert!(reloaded.enforce(("alice", "doc", "read")).unwrap());
        assert!(!reloaded.enforce(("alice", "doc", "write")).unwrap());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_rules() {
        let dir = tempfile::tempdir().unwrap();
        let db = sqlite(&dir).await;

        let model = DefaultModel::from_str(MODEL).await.unwrap();
        let adapter = PolicyTableAdapter::new(db.clone(), "replace_rules", None).await.unwrap();
        let mut enforcer = Enforcer::new(model, adapter).await.unwrap();
        enforcer.enable_auto_save(false);
        enforcer.add_policy(rule(&["u1", "doc", "read"])).await.unwrap();
        enforcer.save_policy().await.unwrap();

        enforcer.clear_policy().await.unwrap();
        enforcer.add_policy(rule(&["u2", "doc", "write"])).await.unwrap();
        enforcer.save_policy().await.unwrap();

        let mut adapter = PolicyTableAdapter::new(db, "replace_rules", None).await.unwrap();
        let rules = adapter.select_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].1[0], "u2");
        assert!(!adapter.is_filtered());
        adapter.clear_policy().await.unwrap();
        assert!(adapter.select_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = sqlite(&dir).await;

        let model = DefaultModel::from_str(MODEL).await.unwrap();
        let adapter = PolicyTableAdapter::new(db.clone(), "auto_rules", None).await.unwrap();
        let mut enforcer = Enforcer::new(model, adapter).await.unwrap();
        enforcer.add_policy(rule(&["u1", "doc", "read"])).await.unwrap();
        enforcer.add_policy(rule(&["u1", "doc", "write"])).await.unwrap();
        enforcer.remove_policy(rule(&["u1", "doc", "read"])).await.unwrap();

        let adapter = PolicyTableAdapter::new(db, "auto_rules", None).await.unwrap();
        let rules = adapter.select_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].1[2], "write");
    }

    #[tokio::test]
    async fn test_scoped_tables_keep_tenants_apart() {
        let dir = tempfile::tempdir().unwrap();
        let db = sqlite(&dir).await;

        for (tenant, user) in [("t1", "alice"), ("t2", "mallory")] {
            let model = DefaultModel::from_str(MODEL).await.unwrap();
            let adapter = PolicyTableAdapter::new(db.clone(), "casbin_rule", Some(tenant))
                .await
                .unwrap();
            let mut enforcer = Enforcer::new(model, adapter).await.unwrap();
            enforcer.enable_auto_save(false);
            enforcer.add_policy(rule(&[user, "doc", "read"])).await.unwrap();
            enforcer.save_policy().await.unwrap();
        }

        let t1 = PolicyTableAdapter::new(db.clone(), "casbin_rule", Some("t1"))
            .await
            .unwrap();
        let rules = t1.select_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].1[0], "alice");

        let mut t2 = PolicyTableAdapter::new(db, "casbin_rule", Some("t2")).await.unwrap();
        t2.clear_policy().await.unwrap();
        assert!(t2.select_rules().await.unwrap().is_empty());
        assert_eq!(t1.select_rules().await.unwrap().len(), 1);
    }

    #[test]
    fn test_pad_rule() {
        let padded = pad_rule(&rule(&["u1", "read"])).unwrap();
        assert_eq!(padded, ["u1", "read", "", "", "", ""].map(String::from));
        assert!(pad_rule(&rule(&["a", "b", "c", "d", "e", "f", "g"])).is_err());
    }

    #[test]
    fn test_filter_matching() {
        let values = ["u1", "doc", "read", "", "", ""].map(String::from);
        assert!(matches_filter(&values, &["u1"]));
        assert!(matches_filter(&values, &["", "doc"]));
        assert!(!matches_filter(&values, &["u2"]));
        assert!(matches_filter(&values, &[]));
    }
}
