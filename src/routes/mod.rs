use axum::{
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers;
use crate::state::AppState;

pub mod health;

/// Largest page a list endpoint returns
pub const MAX_PAGE_LIMIT: u64 = 20;

/// Page size used when none (or a non-positive one) is given
pub const DEFAULT_PAGE_LIMIT: u64 = 10;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Set when the write succeeded but a follow-up policy sync did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: true,
            message: "success".to_string(),
            data: Some(data),
            warning: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: false,
            message: message.into(),
            data: None,
            warning: None,
        }
    }

    /// Attach a partial-success warning
    pub fn with_warning(mut self, warning: Option<String>) -> Self {
        if warning.is_some() {
            self.message = "saved with warnings".to_string();
        }
        self.warning = warning;
        self
    }
}

impl ApiResponse<()> {
    pub fn success_msg(message: impl Into<String>) -> Self {
        Self {
            code: true,
            message: message.into(),
            data: None,
            warning: None,
        }
    }
}

/// Query parameters for list endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_limit")]
    pub page_limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_limit() -> i64 {
    DEFAULT_PAGE_LIMIT as i64
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_limit: default_page_limit(),
        }
    }
}

impl Pagination {
    /// Effective page size
    pub fn limit(&self) -> u64 {
        if self.page_limit <= 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            (self.page_limit as u64).min(MAX_PAGE_LIMIT)
        }
    }

    /// Rows to skip before this page
    pub fn offset(&self) -> u64 {
        (self.page.max(1) as u64 - 1) * self.limit()
    }
}

/// One page of a list
#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let tenant_routes = Router::new()
        // Permission routes
        .route(
            "/permission",
            post(handlers::permission::create_permission).get(handlers::permission::list_permissions),
        )
        .route(
            "/permission/:id",
            get(handlers::permission::get_permission)
                .put(handlers::permission::update_permission)
                .delete(handlers::permission::delete_permission),
        )
        // Enforcer routes
        .route(
            "/enforcer",
            post(handlers::enforcer::create_enforcer).get(handlers::enforcer::list_enforcers),
        )
        .route(
            "/enforcer/:id",
            get(handlers::enforcer::get_enforcer)
                .put(handlers::enforcer::update_enforcer)
                .delete(handlers::enforcer::delete_enforcer),
        )
        .route("/enforcer/:id/enforce", post(handlers::enforcer::enforce))
        .route("/enforcer/:id/sync", post(handlers::enforcer::sync_enforcer))
        .route("/enforcer/:id/policy", get(handlers::enforcer::get_policy))
        // Model routes
        .route(
            "/model",
            post(handlers::model::create_model).get(handlers::model::list_models),
        )
        .route(
            "/model/:id",
            get(handlers::model::get_model)
                .put(handlers::model::update_model)
                .delete(handlers::model::delete_model),
        )
        // Adapter routes
        .route(
            "/adapter",
            post(handlers::adapter::create_adapter).get(handlers::adapter::list_adapters),
        )
        .route(
            "/adapter/:id",
            get(handlers::adapter::get_adapter)
                .put(handlers::adapter::update_adapter)
                .delete(handlers::adapter::delete_adapter),
        )
        // Group routes
        .route(
            "/group",
            post(handlers::group::create_group).get(handlers::group::list_groups),
        )
        .route(
            "/group/:id",
            get(handlers::group::get_group)
                .put(handlers::group::update_group)
                .delete(handlers::group::delete_group),
        )
        .route("/group/:id/closure", get(handlers::group::get_group_closure))
        .route(
            "/group/:id/user/:user_id",
            post(handlers::group::add_group_user).delete(handlers::group::remove_group_user),
        )
        // User routes
        .route(
            "/user",
            post(handlers::user::create_user).get(handlers::user::list_users),
        )
        .route(
            "/user/:id",
            get(handlers::user::get_user).delete(handlers::user::delete_user),
        );

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .nest("/v1/tenant/:tenant_id", tenant_routes);

    Router::new()
        .nest("/api", api_routes)
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Fallback handler for 404
pub async fn fallback() -> (StatusCode, Json<ApiResponse<()>>) {
    (StatusCode::NOT_FOUND, Json(ApiResponse::error("Not Found")))
}
