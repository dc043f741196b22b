// handlers/public/root.rs - GET / and GET /health

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::database::DatabaseManager;

pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "eMarketer.pro API",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "session": "/auth/refresh (session)",
                "companies": "/api/me/companies, /api/companies/:company_id (membership)",
                "integrations": "/api/companies/:company_id/integrations[/:integration_id] (membership, manager to modify)",
                "sync": "/api/companies/:company_id/sync[/:log_id/cancel] (membership, manager to trigger)",
                "chat": "/api/companies/:company_id/chat (membership)",
                "cron": "/cron/run, /cron/sync-all (cron secret)"
            }
        }
    }))
}

/// GET /health - Liveness plus database reachability
///
/// Without a configured database the in-memory store is reported as `memory`.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    let Some(pool) = &state.pool else {
        return (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "status": "ok", "timestamp": now, "database": "memory" }
            })),
        );
    };

    match DatabaseManager::health_check(pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "status": "ok", "timestamp": now, "database": "ok" }
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "code": "SERVICE_UNAVAILABLE",
                    "data": { "status": "degraded", "timestamp": now }
                })),
            )
        }
    }
}
