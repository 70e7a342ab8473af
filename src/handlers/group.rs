//! Group handlers
//!
//! Membership changes are not synced eagerly; they reach enforcement stores
//! at the next sync of an affected enforcer.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;

use super::{new_id, referenced, require};
use crate::entity::{group, user_group};
use crate::error::{AppError, AppResult};
use crate::permission::GroupClosure;
use crate::repository;
use crate::routes::{ApiResponse, Page, Pagination};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GroupRequest {
    pub display_name: String,
    #[serde(default)]
    pub parent_group_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl GroupRequest {
    /// Parent id with blanks read as "no parent"
    fn parent(&self) -> Option<String> {
        self.parent_group_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

/// POST /api/v1/tenant/:tenant_id/group
pub async fn create_group(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<GroupRequest>,
) -> AppResult<Json<ApiResponse<group::Model>>> {
    require(&req.display_name, "display_name")?;
    let parent = req.parent();
    if let Some(parent_id) = &parent {
        referenced(repository::find_group(&state.db, &tenant_id, parent_id).await)?;
    }

    let now = chrono::Utc::now();
    let record = group::ActiveModel {
        id: Set(new_id()),
        tenant_id: Set(tenant_id.clone()),
        parent_group_id: Set(parent),
        display_name: Set(req.display_name),
        enabled: Set(req.enabled),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let saved = record.insert(&state.db).await?;
    tracing::info!(tenant = %tenant_id, group = %saved.id, "group created");
    Ok(Json(ApiResponse::success(saved)))
}

/// GET /api/v1/tenant/:tenant_id/group
pub async fn list_groups(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<ApiResponse<Page<group::Model>>>> {
    let query = group::Entity::find().filter(group::Column::TenantId.eq(&tenant_id));
    let total = query.clone().count(&state.db).await?;
    let items = query
        .order_by_asc(group::Column::CreatedAt)
        .order_by_asc(group::Column::Id)
        .offset(page.offset())
        .limit(page.limit())
        .all(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(Page { items, total })))
}

/// GET /api/v1/tenant/:tenant_id/group/:id
pub async fn get_group(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<group::Model>>> {
    let record = repository::find_group(&state.db, &tenant_id, &id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// PUT /api/v1/tenant/:tenant_id/group/:id
pub async fn update_group(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
    Json(req): Json<GroupRequest>,
) -> AppResult<Json<ApiResponse<group::Model>>> {
    let existing = repository::find_group(&state.db, &tenant_id, &id).await?;
    require(&req.display_name, "display_name")?;

    let parent = req.parent();
    if let Some(parent_id) = &parent {
        if *parent_id == existing.id {
            return Err(AppError::Validation("a group cannot be its own parent".to_string()));
        }
        referenced(repository::find_group(&state.db, &tenant_id, parent_id).await)?;
        // A descendant as parent would close a cycle
        let subtree = state.engine.close_group(&tenant_id, &existing.id).await?;
        if subtree.group_ids.contains(parent_id) {
            return Err(AppError::Validation(format!(
                "group `{}` is a descendant of `{}`",
                parent_id, existing.id
            )));
        }
    }

    let mut active: group::ActiveModel = existing.into();
    active.display_name = Set(req.display_name);
    active.parent_group_id = Set(parent);
    active.enabled = Set(req.enabled);
    active.updated_at = Set(chrono::Utc::now());
    let saved = active.update(&state.db).await?;
    Ok(Json(ApiResponse::success(saved)))
}

/// DELETE /api/v1/tenant/:tenant_id/group/:id
///
/// Children move up to the deleted group's parent.
pub async fn delete_group(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let record = repository::find_group(&state.db, &tenant_id, &id).await?;

    let txn = state.db.begin().await?;
    user_group::Entity::delete_many()
        .filter(user_group::Column::TenantId.eq(&tenant_id))
        .filter(user_group::Column::GroupId.eq(&record.id))
        .exec(&txn)
        .await?;
    group::Entity::update_many()
        .col_expr(
            group::Column::ParentGroupId,
            Expr::value(record.parent_group_id.clone()),
        )
        .filter(group::Column::TenantId.eq(&tenant_id))
        .filter(group::Column::ParentGroupId.eq(&record.id))
        .exec(&txn)
        .await?;
    group::Entity::delete_by_id(record.id.clone())
        .exec(&txn)
        .await?;
    txn.commit().await?;

    tracing::info!(tenant = %tenant_id, group = %record.id, "group deleted");
    Ok(Json(ApiResponse::success_msg("success")))
}

/// GET /api/v1/tenant/:tenant_id/group/:id/closure
pub async fn get_group_closure(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<GroupClosure>>> {
    let closure = state.engine.close_group(&tenant_id, &id).await?;
    Ok(Json(ApiResponse::success(closure)))
}

/// POST /api/v1/tenant/:tenant_id/group/:id/user/:user_id
pub async fn add_group_user(
    State(state): State<AppState>,
    Path((tenant_id, id, user_id)): Path<(String, String, String)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let group = repository::find_group(&state.db, &tenant_id, &id).await?;
    let user = repository::find_user(&state.db, &tenant_id, &user_id).await?;

    let existing = user_group::Entity::find_by_id((user.id.clone(), group.id.clone()))
        .one(&state.db)
        .await?;
    if existing.is_none() {
        user_group::ActiveModel {
            user_id: Set(user.id.clone()),
            group_id: Set(group.id.clone()),
            tenant_id: Set(tenant_id.clone()),
        }
        .insert(&state.db)
        .await?;
        tracing::info!(tenant = %tenant_id, group = %group.id, user = %user.id, "user added to group");
    }
    Ok(Json(ApiResponse::success_msg("success")))
}

/// DELETE /api/v1/tenant/:tenant_id/group/:id/user/:user_id
pub async fn remove_group_user(
    State(state): State<AppState>,
    Path((tenant_id, id, user_id)): Path<(String, String, String)>,
) -> AppResult<Json<ApiResponse<()>>> {
    repository::find_group(&state.db, &tenant_id, &id).await?;

    let removed = user_group::Entity::delete_many()
        .filter(user_group::Column::TenantId.eq(&tenant_id))
        .filter(user_group::Column::GroupId.eq(&id))
        .filter(user_group::Column::UserId.eq(&user_id))
        .exec(&state.db)
        .await?;
    if removed.rows_affected == 0 {
        return Err(AppError::NotFound(format!(
            "user `{}` is not in group `{}`",
            user_id, id
        )));
    }
    Ok(Json(ApiResponse::success_msg("success")))
}
