//! Policy synchronization
//!
//! Rebuilds one enforcer's whole policy set from its permissions. The rebuild
//! happens on the enforcer's in-memory policy with auto-save off; only the
//! final save touches the store, replacing its rows in one transaction.

use casbin::{CoreApi, MgmtApi, RbacApi};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::compiler::{self, fit_rule, PolicyTuple};
use super::resolver::{GroupPropagation, ResolvedEnforcer};
use super::{close_group, AuthzError, AuthzResult, PolicyEngine, SyncStep};
use crate::entity::permission;
use crate::repository;

/// Outcome of a successful sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Distinct policy rules now stored
    pub policies: usize,
    /// Role assignments (`g` rules) now stored
    pub role_assignments: usize,
}

fn storage(err: casbin::Error) -> AuthzError {
    AuthzError::Storage(err.to_string())
}

impl PolicyEngine {
    /// Rebuild the policy set of one enforcer.
    ///
    /// Holds the enforcer's slot for the whole rebuild, so concurrent syncs
    /// run one after another and enforcement waits for the new policy set.
    /// The deadline covers waiting for the slot as well as the rebuild.
    #[instrument(skip(self), fields(tenant = %tenant_id, enforcer = %enforcer_id))]
    pub async fn sync(&self, tenant_id: &str, enforcer_id: &str) -> AuthzResult<SyncReport> {
        let slot = self.cache.slot(tenant_id, enforcer_id);
        let deadline = self.config.timeout();
        let result = tokio::time::timeout(deadline, async {
            let mut guard = slot.write().await;
            let current = guard.take();
            let (resolved, report) = self.rebuild(tenant_id, enforcer_id, current).await?;
            let store = resolved.store.clone();
            if self.config.cache {
                *guard = Some(resolved);
            }
            Ok::<_, AuthzError>((store, report))
        })
        .await
        .unwrap_or_else(|_| Err(AuthzError::Timeout(deadline.as_secs())));

        match result {
            Ok((store, report)) => {
                info!(
                    policies = report.policies,
                    role_assignments = report.role_assignments,
                    "policy sync complete"
                );
                // Enforcers sharing the store now hold outdated rules
                let dropped = self.cache.invalidate_store(tenant_id, enforcer_id, &store).await;
                if dropped > 0 {
                    debug!(dropped, "dropped enforcers sharing the policy store");
                }
                Ok(report)
            }
            Err(err) => {
                error!(error = %err, "policy sync failed");
                Err(err)
            }
        }
    }

    async fn rebuild(
        &self,
        tenant_id: &str,
        enforcer_id: &str,
        current: Option<ResolvedEnforcer>,
    ) -> AuthzResult<(ResolvedEnforcer, SyncReport)> {
        let record = repository::find_enforcer(&self.db, tenant_id, enforcer_id)
            .await
            .map_err(AuthzError::at_step(SyncStep::LoadEnforcer))?;

        let permissions = repository::find_permissions_by_enforcer(&self.db, tenant_id, enforcer_id)
            .await
            .map_err(AuthzError::at_step(SyncStep::LoadPermissions))?;

        let mut resolved = match current {
            Some(resolved) if resolved.binds(&record) => resolved,
            _ => self
                .resolve(tenant_id, &record.model_id, &record.adapter_id)
                .await
                .map_err(AuthzError::at_step(SyncStep::ResolveBackend))?,
        };

        let tuples = match resolved.propagation {
            GroupPropagation::RoleAssignment => {
                permissions.iter().flat_map(compiler::compile).collect()
            }
            GroupPropagation::Closure => self
                .compile_expanded(tenant_id, &permissions)
                .await
                .map_err(AuthzError::at_step(SyncStep::ExpandGroups))?,
        };

        let enforcer = &mut resolved.enforcer;
        enforcer.enable_auto_save(false);

        enforcer
            .clear_policy()
            .await
            .map_err(|e| AuthzError::at_step(SyncStep::ClearPolicy)(storage(e)))?;

        for tuple in tuples {
            let rule = fit_rule(tuple.to_vec(), resolved.policy_arity);
            if rule.len() > resolved.policy_arity {
                return Err(AuthzError::at_step(SyncStep::InsertPolicy)(AuthzError::Matcher(
                    format!(
                        "rule {:?} has {} values, the policy definition takes {}",
                        rule,
                        rule.len(),
                        resolved.policy_arity
                    ),
                )));
            }
            enforcer
                .add_policy(rule)
                .await
                .map_err(|e| AuthzError::at_step(SyncStep::InsertPolicy)(storage(e)))?;
        }

        let mut role_assignments = 0;
        if resolved.propagation == GroupPropagation::RoleAssignment {
            let memberships = repository::find_user_memberships(&self.db, tenant_id)
                .await
                .map_err(AuthzError::at_step(SyncStep::AssignRoles))?;
            for (user_id, group_ids) in memberships {
                role_assignments += group_ids.len();
                enforcer
                    .add_roles_for_user(&user_id, group_ids, None)
                    .await
                    .map_err(|e| AuthzError::at_step(SyncStep::AssignRoles)(storage(e)))?;
            }
        }
        enforcer
            .build_role_links()
            .map_err(|e| AuthzError::at_step(SyncStep::AssignRoles)(storage(e)))?;

        enforcer
            .save_policy()
            .await
            .map_err(|e| AuthzError::at_step(SyncStep::SavePolicy)(storage(e)))?;
        enforcer.enable_auto_save(true);

        let report = SyncReport {
            policies: enforcer.get_policy().len(),
            role_assignments,
        };
        Ok((resolved, report))
    }

    /// Compile permissions with each group subject followed by its subtree's users
    async fn compile_expanded(
        &self,
        tenant_id: &str,
        permissions: &[permission::Model],
    ) -> AuthzResult<Vec<PolicyTuple>> {
        let mut tuples = Vec::new();
        for permission in permissions {
            let mut subjects = permission.subjects();
            for group_id in permission.groups.as_slice() {
                match close_group(&self.db, tenant_id, group_id).await {
                    Ok(closure) => subjects.extend(closure.user_ids),
                    Err(AuthzError::NotFound { .. }) => {
                        warn!(
                            permission = %permission.id,
                            group = %group_id,
                            "skipping missing group"
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
            tuples.extend(compiler::cross_join(&subjects, permission.columns()));
        }
        Ok(tuples)
    }
}
