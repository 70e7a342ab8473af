//! Casbin adapter handlers
//!
//! An adapter names the table an enforcer's compiled policies are written
//! to, optionally in an external database.

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
use crate::entity::{casbin_adapter, enforcer};
use crate::error::{AppError, AppResult};
use crate::permission::validate_table_name;
use crate::repository;
use crate::routes::{ApiResponse, Page, Pagination};
use crate::state::AppState;

const DRIVERS: [&str; 6] = ["mysql", "postgres", "postgresql", "pgx", "sqlite", "sqlite3"];

#[derive(Debug, Deserialize)]
pub struct AdapterRequest {
    pub name: String,
    pub table_name: String,
    #[serde(default)]
    pub external_db: bool,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub username: String,
    /// Left empty on update to keep the stored password
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database_name: String,
}

impl AdapterRequest {
    fn validate(&self) -> AppResult<()> {
        require(&self.name, "name")?;
        validate_table_name(&self.table_name).map_err(AppError::Validation)?;
        if !self.external_db {
            return Ok(());
        }

        let driver = self.driver.trim().to_ascii_lowercase();
        if !DRIVERS.contains(&driver.as_str()) {
            return Err(AppError::Validation(format!(
                "unsupported driver `{}`",
                self.driver
            )));
        }
        require(&self.database_name, "database_name")?;
        if !driver.starts_with("sqlite") {
            require(&self.host, "host")?;
            require(&self.port, "port")?;
            require(&self.username, "username")?;
        }
        Ok(())
    }

    fn apply(self, active: &mut casbin_adapter::ActiveModel) {
        active.name = Set(self.name);
        active.table_name = Set(self.table_name);
        active.external_db = Set(self.external_db);
        active.driver = Set(self.driver.trim().to_ascii_lowercase());
        active.host = Set(self.host);
        active.port = Set(self.port);
        active.username = Set(self.username);
        if !self.password.is_empty() {
            active.password = Set(self.password);
        }
        active.database_name = Set(self.database_name);
    }
}

/// POST /api/v1/tenant/:tenant_id/adapter
pub async fn create_adapter(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<AdapterRequest>,
) -> AppResult<Json<ApiResponse<casbin_adapter::Model>>> {
    req.validate()?;

    let now = chrono::Utc::now();
    let mut record = casbin_adapter::ActiveModel {
        id: Set(new_id()),
        tenant_id: Set(tenant_id.clone()),
        password: Set(String::new()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    req.apply(&mut record);
    let saved = record.insert(&state.db).await?;
    tracing::info!(tenant = %tenant_id, adapter = %saved.id, table = %saved.table_name, "adapter created");
    Ok(Json(ApiResponse::success(saved)))
}

/// GET /api/v1/tenant/:tenant_id/adapter
pub async fn list_adapters(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<ApiResponse<Page<casbin_adapter::Model>>>> {
    let query =
        casbin_adapter::Entity::find().filter(casbin_adapter::Column::TenantId.eq(&tenant_id));
    let total = query.clone().count(&state.db).await?;
    let items = query
        .order_by_asc(casbin_adapter::Column::CreatedAt)
        .order_by_asc(casbin_adapter::Column::Id)
        .offset(page.offset())
        .limit(page.limit())
        .all(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(Page { items, total })))
}

/// GET /api/v1/tenant/:tenant_id/adapter/:id
pub async fn get_adapter(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<casbin_adapter::Model>>> {
    let record = repository::find_casbin_adapter(&state.db, &tenant_id, &id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// PUT /api/v1/tenant/:tenant_id/adapter/:id
///
/// Bound enforcers are rebuilt into the store the adapter now describes.
pub async fn update_adapter(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
    Json(req): Json<AdapterRequest>,
) -> AppResult<Json<ApiResponse<casbin_adapter::Model>>> {
    let existing = repository::find_casbin_adapter(&state.db, &tenant_id, &id).await?;
    req.validate()?;

    let mut active: casbin_adapter::ActiveModel = existing.into();
    req.apply(&mut active);
    active.updated_at = Set(chrono::Utc::now());
    let saved = active.update(&state.db).await?;

    state.engine.invalidate_adapter(&tenant_id, &saved.id).await;
    let bound = repository::find_enforcers_by_adapter(&state.db, &tenant_id, &saved.id).await?;
    let warning = resync(&state.engine, &tenant_id, bound.into_iter().map(|e| e.id)).await;
    Ok(Json(ApiResponse::success(saved).with_warning(warning)))
}

/// DELETE /api/v1/tenant/:tenant_id/adapter/:id
///
/// The policy table itself is left in place.
pub async fn delete_adapter(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let record = repository::find_casbin_adapter(&state.db, &tenant_id, &id).await?;

    let bound = enforcer::Entity::find()
        .filter(enforcer::Column::TenantId.eq(&tenant_id))
        .filter(enforcer::Column::AdapterId.eq(&record.id))
        .count(&state.db)
        .await?;
    if bound > 0 {
        return Err(AppError::Conflict(format!(
            "adapter is used by {} enforcer(s)",
            bound
        )));
    }

    casbin_adapter::Entity::delete_by_id(record.id.clone())
        .exec(&state.db)
        .await?;
    state.engine.invalidate_adapter(&tenant_id, &record.id).await;
    tracing::info!(tenant = %tenant_id, adapter = %record.id, "adapter deleted");
    Ok(Json(ApiResponse::success_msg("success")))
}
