//! User handlers

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;

use super::{new_id, require};
use crate::entity::{user, user_group};
use crate::error::{AppError, AppResult};
use crate::repository;
use crate::routes::{ApiResponse, Page, Pagination};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
}

/// POST /api/v1/tenant/:tenant_id/user
pub async fn create_user(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<Json<ApiResponse<user::Model>>> {
    require(&req.username, "username")?;

    let taken = user::Entity::find()
        .filter(user::Column::TenantId.eq(&tenant_id))
        .filter(user::Column::Username.eq(&req.username))
        .count(&state.db)
        .await?;
    if taken > 0 {
        return Err(AppError::Conflict(format!(
            "username `{}` already exists",
            req.username
        )));
    }

    let now = chrono::Utc::now();
    let record = user::ActiveModel {
        id: Set(new_id()),
        tenant_id: Set(tenant_id.clone()),
        username: Set(req.username),
        display_name: Set(req.display_name),
        email: Set(req.email),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let saved = record.insert(&state.db).await?;
    tracing::info!(tenant = %tenant_id, user = %saved.id, "user created");
    Ok(Json(ApiResponse::success(saved)))
}

/// GET /api/v1/tenant/:tenant_id/user
pub async fn list_users(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<ApiResponse<Page<user::Model>>>> {
    let query = user::Entity::find().filter(user::Column::TenantId.eq(&tenant_id));
    let total = query.clone().count(&state.db).await?;
    let items = query
        .order_by_asc(user::Column::CreatedAt)
        .order_by_asc(user::Column::Id)
        .offset(page.offset())
        .limit(page.limit())
        .all(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(Page { items, total })))
}

/// GET /api/v1/tenant/:tenant_id/user/:id
pub async fn get_user(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<user::UserResponse>>> {
    let record = repository::find_user(&state.db, &tenant_id, &id).await?;
    let groups = repository::find_user_group_ids(&state.db, &tenant_id, &record.id).await?;
    Ok(Json(ApiResponse::success(user::UserResponse {
        user: record,
        groups,
    })))
}

/// DELETE /api/v1/tenant/:tenant_id/user/:id
pub async fn delete_user(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let record = repository::find_user(&state.db, &tenant_id, &id).await?;

    let txn = state.db.begin().await?;
    user_group::Entity::delete_many()
        .filter(user_group::Column::TenantId.eq(&tenant_id))
        .filter(user_group::Column::UserId.eq(&record.id))
        .exec(&txn)
        .await?;
    user::Entity::delete_by_id(record.id.clone())
        .exec(&txn)
        .await?;
    txn.commit().await?;

    tracing::info!(tenant = %tenant_id, user = %record.id, "user deleted");
    Ok(Json(ApiResponse::success_msg("success")))
}
