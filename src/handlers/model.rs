//! Casbin model handlers

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Deserialize;

use super::{new_id, require, resync};
use crate::entity::{casbin_model, enforcer};
use crate::error::{AppError, AppResult};
use crate::permission::{parse_model, AuthzError};
use crate::repository;
use crate::routes::{ApiResponse, Page, Pagination};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model: String,
}

async fn validate(req: &ModelRequest) -> AppResult<()> {
    require(&req.name, "name")?;
    require(&req.model, "model")?;
    match parse_model(&req.model).await {
        Ok(_) => Ok(()),
        Err(AuthzError::InvalidModel(reason)) => Err(AppError::Validation(reason)),
        Err(err) => Err(err.into()),
    }
}

/// POST /api/v1/tenant/:tenant_id/model
pub async fn create_model(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<ModelRequest>,
) -> AppResult<Json<ApiResponse<casbin_model::Model>>> {
    validate(&req).await?;

    let now = chrono::Utc::now();
    let record = casbin_model::ActiveModel {
        id: Set(new_id()),
        tenant_id: Set(tenant_id.clone()),
        name: Set(req.name),
        description: Set(req.description),
        model: Set(req.model),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let saved = record.insert(&state.db).await?;
    tracing::info!(tenant = %tenant_id, model = %saved.id, "model created");
    Ok(Json(ApiResponse::success(saved)))
}

/// GET /api/v1/tenant/:tenant_id/model
pub async fn list_models(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<ApiResponse<Page<casbin_model::Model>>>> {
    let query = casbin_model::Entity::find().filter(casbin_model::Column::TenantId.eq(&tenant_id));
    let total = query.clone().count(&state.db).await?;
    let items = query
        .order_by_asc(casbin_model::Column::CreatedAt)
        .order_by_asc(casbin_model::Column::Id)
        .offset(page.offset())
        .limit(page.limit())
        .all(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(Page { items, total })))
}

/// GET /api/v1/tenant/:tenant_id/model/:id
pub async fn get_model(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<casbin_model::Model>>> {
    let record = repository::find_casbin_model(&state.db, &tenant_id, &id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// PUT /api/v1/tenant/:tenant_id/model/:id
///
/// Every enforcer using the model is rebuilt against the new text.
pub async fn update_model(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
    Json(req): Json<ModelRequest>,
) -> AppResult<Json<ApiResponse<casbin_model::Model>>> {
    let existing = repository::find_casbin_model(&state.db, &tenant_id, &id).await?;
    validate(&req).await?;

    let mut active: casbin_model::ActiveModel = existing.into();
    active.name = Set(req.name);
    active.description = Set(req.description);
    active.model = Set(req.model);
    active.updated_at = Set(chrono::Utc::now());
    let saved = active.update(&state.db).await?;

    state.engine.invalidate_model(&tenant_id, &saved.id).await;
    let bound = repository::find_enforcers_by_model(&state.db, &tenant_id, &saved.id).await?;
    let warning = resync(&state.engine, &tenant_id, bound.into_iter().map(|e| e.id)).await;
    Ok(Json(ApiResponse::success(saved).with_warning(warning)))
}

/// DELETE /api/v1/tenant/:tenant_id/model/:id
pub async fn delete_model(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let record = repository::find_casbin_model(&state.db, &tenant_id, &id).await?;

    let bound = enforcer::Entity::find()
        .filter(enforcer::Column::TenantId.eq(&tenant_id))
        .filter(enforcer::Column::ModelId.eq(&record.id))
        .count(&state.db)
        .await?;
    if bound > 0 {
        return Err(AppError::Conflict(format!(
            "model is used by {} enforcer(s)",
            bound
        )));
    }

    casbin_model::Entity::delete_by_id(record.id.clone())
        .exec(&state.db)
        .await?;
    state.engine.invalidate_model(&tenant_id, &record.id).await;
    tracing::info!(tenant = %tenant_id, model = %record.id, "model deleted");
    Ok(Json(ApiResponse::success_msg("success")))
}
