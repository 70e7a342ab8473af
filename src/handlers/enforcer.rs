//! Enforcer handlers
//!
//! Besides CRUD this exposes live enforcement, manual sync and a view of
//! the stored policy set.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Deserialize;
use serde_json::Value;

use super::{new_id, referenced, require, resync};
use crate::entity::{enforcer, permission};
use crate::error::{AppError, AppResult};
use crate::permission::{request_args, StoredPolicy, SyncReport};
use crate::repository;
use crate::routes::{ApiResponse, Page, Pagination};
use crate::state::AppState;

/// Create or update enforcer request
#[derive(Debug, Deserialize)]
pub struct EnforcerRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model_id: String,
    pub adapter_id: String,
}

async fn validate(state: &AppState, tenant_id: &str, req: &EnforcerRequest) -> AppResult<()> {
    require(&req.name, "name")?;
    require(&req.model_id, "model_id")?;
    require(&req.adapter_id, "adapter_id")?;
    referenced(repository::find_casbin_model(&state.db, tenant_id, &req.model_id).await)?;
    referenced(repository::find_casbin_adapter(&state.db, tenant_id, &req.adapter_id).await)?;
    Ok(())
}

/// POST /api/v1/tenant/:tenant_id/enforcer
pub async fn create_enforcer(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<EnforcerRequest>,
) -> AppResult<Json<ApiResponse<enforcer::Model>>> {
    validate(&state, &tenant_id, &req).await?;

    let now = chrono::Utc::now();
    let record = enforcer::ActiveModel {
        id: Set(new_id()),
        tenant_id: Set(tenant_id.clone()),
        name: Set(req.name),
        description: Set(req.description),
        model_id: Set(req.model_id),
        adapter_id: Set(req.adapter_id),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let saved = record.insert(&state.db).await?;
    tracing::info!(tenant = %tenant_id, enforcer = %saved.id, "enforcer created");
    Ok(Json(ApiResponse::success(saved)))
}

/// GET /api/v1/tenant/:tenant_id/enforcer
pub async fn list_enforcers(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<ApiResponse<Page<enforcer::Model>>>> {
    let query = enforcer::Entity::find().filter(enforcer::Column::TenantId.eq(&tenant_id));
    let total = query.clone().count(&state.db).await?;
    let items = query
        .order_by_asc(enforcer::Column::CreatedAt)
        .order_by_asc(enforcer::Column::Id)
        .offset(page.offset())
        .limit(page.limit())
        .all(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(Page { items, total })))
}

/// GET /api/v1/tenant/:tenant_id/enforcer/:id
pub async fn get_enforcer(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<enforcer::Model>>> {
    let record = repository::find_enforcer(&state.db, &tenant_id, &id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// PUT /api/v1/tenant/:tenant_id/enforcer/:id
pub async fn update_enforcer(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
    Json(req): Json<EnforcerRequest>,
) -> AppResult<Json<ApiResponse<enforcer::Model>>> {
    let existing = repository::find_enforcer(&state.db, &tenant_id, &id).await?;
    validate(&state, &tenant_id, &req).await?;

    let mut active: enforcer::ActiveModel = existing.into();
    active.name = Set(req.name);
    active.description = Set(req.description);
    active.model_id = Set(req.model_id);
    active.adapter_id = Set(req.adapter_id);
    active.updated_at = Set(chrono::Utc::now());
    let saved = active.update(&state.db).await?;

    // Rebuild into the store the enforcer now points at
    state.engine.invalidate_enforcer(&tenant_id, &saved.id).await;
    let warning = resync(&state.engine, &tenant_id, [saved.id.clone()]).await;
    Ok(Json(ApiResponse::success(saved).with_warning(warning)))
}

/// DELETE /api/v1/tenant/:tenant_id/enforcer/:id
pub async fn delete_enforcer(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let record = repository::find_enforcer(&state.db, &tenant_id, &id).await?;

    let bound = permission::Entity::find()
        .filter(permission::Column::TenantId.eq(&tenant_id))
        .filter(permission::Column::EnforcerId.eq(&record.id))
        .count(&state.db)
        .await?;
    if bound > 0 {
        return Err(AppError::Conflict(format!(
            "enforcer is used by {} permission(s)",
            bound
        )));
    }

    enforcer::Entity::delete_by_id(record.id.clone())
        .exec(&state.db)
        .await?;
    state.engine.forget_enforcer(&tenant_id, &record.id).await;
    tracing::info!(tenant = %tenant_id, enforcer = %record.id, "enforcer deleted");
    Ok(Json(ApiResponse::success_msg("success")))
}

/// POST /api/v1/tenant/:tenant_id/enforcer/:id/enforce
///
/// Body is the request as a JSON array, in the order the model defines.
pub async fn enforce(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
    Json(request): Json<Vec<Value>>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let allowed = state
        .engine
        .enforce(&tenant_id, &id, request_args(&request))
        .await?;
    Ok(Json(ApiResponse::success(allowed)))
}

/// POST /api/v1/tenant/:tenant_id/enforcer/:id/sync
pub async fn sync_enforcer(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<SyncReport>>> {
    // Missing enforcers are a plain 404 rather than a failed sync
    repository::find_enforcer(&state.db, &tenant_id, &id).await?;
    let report = state.engine.sync(&tenant_id, &id).await?;
    Ok(Json(ApiResponse::success(report)))
}

/// GET /api/v1/tenant/:tenant_id/enforcer/:id/policy
pub async fn get_policy(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<StoredPolicy>>> {
    let stored = state.engine.stored_policy(&tenant_id, &id).await?;
    Ok(Json(ApiResponse::success(stored)))
}
