//! Permission handlers
//!
//! Every successful write resynchronizes the enforcers it touches.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Deserialize;

use super::{new_id, referenced, require, resync};
use crate::entity::{permission, StringList};
use crate::error::{AppError, AppResult};
use crate::permission::rule_count;
use crate::repository;
use crate::routes::{ApiResponse, Page, Pagination};
use crate::state::AppState;

/// Create or update permission request
#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enforcer_id: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub v1: Vec<String>,
    #[serde(default)]
    pub v2: Vec<String>,
    #[serde(default)]
    pub v3: Vec<String>,
    #[serde(default)]
    pub v4: Vec<String>,
    #[serde(default)]
    pub v5: Vec<String>,
}

impl PermissionRequest {
    /// Copy the request into a record, keeping its id and creation time
    fn apply(self, mut record: permission::Model) -> permission::Model {
        record.name = self.name;
        record.description = self.description;
        record.enforcer_id = self.enforcer_id;
        record.users = StringList(self.users);
        record.groups = StringList(self.groups);
        record.v1 = StringList(self.v1);
        record.v2 = StringList(self.v2);
        record.v3 = StringList(self.v3);
        record.v4 = StringList(self.v4);
        record.v5 = StringList(self.v5);
        record.updated_at = chrono::Utc::now();
        record
    }
}

async fn validate(state: &AppState, tenant_id: &str, record: &permission::Model) -> AppResult<()> {
    require(&record.name, "name")?;
    require(&record.enforcer_id, "enforcer_id")?;
    referenced(repository::find_enforcer(&state.db, tenant_id, &record.enforcer_id).await)?;

    let max = state.engine.config().max_rules_per_permission;
    let count = rule_count(record);
    if count > max {
        return Err(AppError::Validation(format!(
            "permission compiles into {} rules, at most {} are allowed",
            count, max
        )));
    }
    Ok(())
}

/// POST /api/v1/tenant/:tenant_id/permission
pub async fn create_permission(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<PermissionRequest>,
) -> AppResult<Json<ApiResponse<permission::Model>>> {
    let now = chrono::Utc::now();
    let record = req.apply(permission::Model {
        id: new_id(),
        tenant_id: tenant_id.clone(),
        enforcer_id: String::new(),
        name: String::new(),
        description: String::new(),
        users: StringList::default(),
        groups: StringList::default(),
        v1: StringList::default(),
        v2: StringList::default(),
        v3: StringList::default(),
        v4: StringList::default(),
        v5: StringList::default(),
        created_at: now,
        updated_at: now,
    });
    validate(&state, &tenant_id, &record).await?;

    let active: permission::ActiveModel = record.into();
    let saved = active.insert(&state.db).await?;
    tracing::info!(tenant = %tenant_id, permission = %saved.id, "permission created");

    let warning = resync(&state.engine, &tenant_id, [saved.enforcer_id.clone()]).await;
    Ok(Json(ApiResponse::success(saved).with_warning(warning)))
}

/// GET /api/v1/tenant/:tenant_id/permission
pub async fn list_permissions(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<ApiResponse<Page<permission::Model>>>> {
    let query = permission::Entity::find().filter(permission::Column::TenantId.eq(&tenant_id));
    let total = query.clone().count(&state.db).await?;
    let items = query
        .order_by_asc(permission::Column::CreatedAt)
        .order_by_asc(permission::Column::Id)
        .offset(page.offset())
        .limit(page.limit())
        .all(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(Page { items, total })))
}

/// GET /api/v1/tenant/:tenant_id/permission/:id
pub async fn get_permission(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<permission::Model>>> {
    let record = repository::find_permission(&state.db, &tenant_id, &id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// PUT /api/v1/tenant/:tenant_id/permission/:id
pub async fn update_permission(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
    Json(req): Json<PermissionRequest>,
) -> AppResult<Json<ApiResponse<permission::Model>>> {
    let existing = repository::find_permission(&state.db, &tenant_id, &id).await?;
    let previous_enforcer = existing.enforcer_id.clone();

    let record = req.apply(existing);
    validate(&state, &tenant_id, &record).await?;

    let mut active: permission::ActiveModel = record.clone().into();
    active.name = Set(record.name);
    active.description = Set(record.description);
    active.enforcer_id = Set(record.enforcer_id);
    active.users = Set(record.users);
    active.groups = Set(record.groups);
    active.v1 = Set(record.v1);
    active.v2 = Set(record.v2);
    active.v3 = Set(record.v3);
    active.v4 = Set(record.v4);
    active.v5 = Set(record.v5);
    active.updated_at = Set(record.updated_at);
    let saved = active.update(&state.db).await?;

    // A moved permission leaves stale rules behind in its old enforcer
    let warning = resync(
        &state.engine,
        &tenant_id,
        [saved.enforcer_id.clone(), previous_enforcer],
    )
    .await;
    Ok(Json(ApiResponse::success(saved).with_warning(warning)))
}

/// DELETE /api/v1/tenant/:tenant_id/permission/:id
pub async fn delete_permission(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let record = repository::find_permission(&state.db, &tenant_id, &id).await?;
    permission::Entity::delete_by_id(record.id.clone())
        .exec(&state.db)
        .await?;
    tracing::info!(tenant = %tenant_id, permission = %record.id, "permission deleted");

    let warning = resync(&state.engine, &tenant_id, [record.enforcer_id]).await;
    Ok(Json(ApiResponse::success_msg("success").with_warning(warning)))
}
