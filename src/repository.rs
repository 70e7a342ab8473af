//! Tenant-scoped lookups used by the policy engine
//!
//! Every query filters on `tenant_id`; a record of another tenant is
//! indistinguishable from a missing one.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::entity::{casbin_adapter, casbin_model, enforcer, group, permission, user, user_group};
use crate::permission::{AuthzError, AuthzResult};

pub async fn find_enforcer<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    enforcer_id: &str,
) -> AuthzResult<enforcer::Model> {
    enforcer::Entity::find_by_id(enforcer_id.to_string())
        .filter(enforcer::Column::TenantId.eq(tenant_id))
        .one(db)
        .await?
        .ok_or_else(|| AuthzError::not_found("enforcer", enforcer_id))
}

pub async fn find_casbin_model<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    model_id: &str,
) -> AuthzResult<casbin_model::Model> {
    casbin_model::Entity::find_by_id(model_id.to_string())
        .filter(casbin_model::Column::TenantId.eq(tenant_id))
        .one(db)
        .await?
        .ok_or_else(|| AuthzError::not_found("model", model_id))
}

pub async fn find_casbin_adapter<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    adapter_id: &str,
) -> AuthzResult<casbin_adapter::Model> {
    casbin_adapter::Entity::find_by_id(adapter_id.to_string())
        .filter(casbin_adapter::Column::TenantId.eq(tenant_id))
        .one(db)
        .await?
        .ok_or_else(|| AuthzError::not_found("adapter", adapter_id))
}

pub async fn find_group<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    group_id: &str,
) -> AuthzResult<group::Model> {
    group::Entity::find_by_id(group_id.to_string())
        .filter(group::Column::TenantId.eq(tenant_id))
        .one(db)
        .await?
        .ok_or_else(|| AuthzError::not_found("group", group_id))
}

pub async fn find_permission<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    permission_id: &str,
) -> AuthzResult<permission::Model> {
    permission::Entity::find_by_id(permission_id.to_string())
        .filter(permission::Column::TenantId.eq(tenant_id))
        .one(db)
        .await?
        .ok_or_else(|| AuthzError::not_found("permission", permission_id))
}

pub async fn find_user<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    user_id: &str,
) -> AuthzResult<user::Model> {
    user::Entity::find_by_id(user_id.to_string())
        .filter(user::Column::TenantId.eq(tenant_id))
        .one(db)
        .await?
        .ok_or_else(|| AuthzError::not_found("user", user_id))
}

/// Permissions compiled into one enforcer, oldest first
pub async fn find_permissions_by_enforcer<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    enforcer_id: &str,
) -> AuthzResult<Vec<permission::Model>> {
    let permissions = permission::Entity::find()
        .filter(permission::Column::TenantId.eq(tenant_id))
        .filter(permission::Column::EnforcerId.eq(enforcer_id))
        .order_by_asc(permission::Column::CreatedAt)
        .order_by_asc(permission::Column::Id)
        .all(db)
        .await?;
    Ok(permissions)
}

/// Enforcers bound to a model
pub async fn find_enforcers_by_model<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    model_id: &str,
) -> AuthzResult<Vec<enforcer::Model>> {
    let enforcers = enforcer::Entity::find()
        .filter(enforcer::Column::TenantId.eq(tenant_id))
        .filter(enforcer::Column::ModelId.eq(model_id))
        .order_by_asc(enforcer::Column::Id)
        .all(db)
        .await?;
    Ok(enforcers)
}

/// Enforcers bound to an adapter
pub async fn find_enforcers_by_adapter<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    adapter_id: &str,
) -> AuthzResult<Vec<enforcer::Model>> {
    let enforcers = enforcer::Entity::find()
        .filter(enforcer::Column::TenantId.eq(tenant_id))
        .filter(enforcer::Column::AdapterId.eq(adapter_id))
        .order_by_asc(enforcer::Column::Id)
        .all(db)
        .await?;
    Ok(enforcers)
}

/// Direct children of a group, oldest first
pub async fn find_child_groups<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    parent_group_id: &str,
) -> AuthzResult<Vec<group::Model>> {
    let groups = group::Entity::find()
        .filter(group::Column::TenantId.eq(tenant_id))
        .filter(group::Column::ParentGroupId.eq(parent_group_id))
        .order_by_asc(group::Column::CreatedAt)
        .order_by_asc(group::Column::Id)
        .all(db)
        .await?;
    Ok(groups)
}

/// Ids of the users directly in a group
pub async fn find_group_member_ids<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    group_id: &str,
) -> AuthzResult<Vec<String>> {
    let members = user_group::Entity::find()
        .filter(user_group::Column::TenantId.eq(tenant_id))
        .filter(user_group::Column::GroupId.eq(group_id))
        .order_by_asc(user_group::Column::UserId)
        .all(db)
        .await?;
    Ok(members.into_iter().map(|m| m.user_id).collect())
}

/// Direct group ids of one user
pub async fn find_user_group_ids<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    user_id: &str,
) -> AuthzResult<Vec<String>> {
    let memberships = user_group::Entity::find()
        .filter(user_group::Column::TenantId.eq(tenant_id))
        .filter(user_group::Column::UserId.eq(user_id))
        .order_by_asc(user_group::Column::GroupId)
        .all(db)
        .await?;
    Ok(memberships.into_iter().map(|m| m.group_id).collect())
}

/// Every tenant user with at least one group, paired with its direct group ids.
///
/// Users are ordered by id; memberships pointing at deleted users are ignored.
pub async fn find_user_memberships<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
) -> AuthzResult<Vec<(String, Vec<String>)>> {
    let users = user::Entity::find()
        .filter(user::Column::TenantId.eq(tenant_id))
        .order_by_asc(user::Column::Id)
        .all(db)
        .await?;

    let memberships = user_group::Entity::find()
        .filter(user_group::Column::TenantId.eq(tenant_id))
        .order_by_asc(user_group::Column::UserId)
        .order_by_asc(user_group::Column::GroupId)
        .all(db)
        .await?;

    let mut by_user: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();
    for membership in memberships {
        by_user
            .entry(membership.user_id)
            .or_default()
            .push(membership.group_id);
    }

    Ok(users
        .into_iter()
        .filter_map(|u| by_user.remove(&u.id).map(|groups| (u.id, groups)))
        .collect())
}
