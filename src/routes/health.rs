use axum::{extract::State, response::Json};
use serde::Serialize;

use super::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub cached_enforcers: usize,
}

/// Liveness plus a ping of the primary database
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let database = match state.db.ping().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!("Health check: database ping failed: {}", e);
            "down"
        }
    };
    Json(ApiResponse::success(HealthStatus {
        status: if database == "up" { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        cached_enforcers: state.engine.cached_enforcers().await,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::handlers::tests::{app, call};

    #[tokio::test]
    async fn test_health_reports_database() {
        let (_dir, app) = app().await;
        let (status, body) = call(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "healthy");
        assert_eq!(body["data"]["database"], "up");
        assert_eq!(body["data"]["cached_enforcers"], 0);
    }
}
