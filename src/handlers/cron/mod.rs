// handlers/cron/mod.rs - Shared-secret endpoints driven by the scheduler
//
// POST /cron/run       validates the secret and calls /cron/sync-all
// POST /cron/sync-all  validates the secret and runs every active integration

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use std::time::Duration;

use crate::app::AppState;
use crate::auth::secrets_match;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::sync::SyncSummary;

/// Bearer secret from the request must match the configured cron secret
fn authorize_cron(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if secrets_match(presented, expected) {
        Ok(())
    } else {
        tracing::warn!("Rejected cron call with invalid secret");
        Err(ApiError::unauthorized())
    }
}

/// POST /cron/run - Trigger a full sync through /cron/sync-all
///
/// Returns the delegate's status code with `{ "ok": bool, "data": ... }`,
/// or 502 with `data: null` when the delegate cannot be reached.
pub async fn cron_run(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let secret = &state.config.security.cron_secret;
    authorize_cron(&headers, secret)?;

    let url = format!("{}/cron/sync-all", state.config.sync.self_base_url.trim_end_matches('/'));
    tracing::info!("Cron run delegating to {}", url);

    // A full sync outlasts the client's default timeout
    let timeout = Duration::from_secs(state.config.sync.cron_timeout_secs);
    let response = match state.http.post(&url).timeout(timeout).bearer_auth(secret).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Cron delegate {} unreachable: {}", url, e);
            return Ok((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "ok": false, "data": null, "error": "Sync endpoint unreachable" })),
            )
                .into_response());
        }
    };

    // reqwest and axum may carry different `http` versions
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let data = match body.get("data") {
        Some(data) => data.clone(),
        None => body,
    };

    Ok((status, Json(json!({ "ok": status.is_success(), "data": data }))).into_response())
}

/// POST /cron/sync-all - Sync every active integration
pub async fn cron_sync_all(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<SyncSummary>> {
    authorize_cron(&headers, &state.config.security.cron_secret)?;

    let summaries = state.orchestrator.spawn_all().await?;
    let failed = summaries.iter().filter(|s| s.error.is_some()).count();
    tracing::info!("Cron sync-all finished: {} integrations, {} unrecorded", summaries.len(), failed);
    Ok(ApiResponse::success(summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cron_secret_must_match() {
        let mut headers = HeaderMap::new();
        assert!(authorize_cron(&headers, "s3cret").is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(authorize_cron(&headers, "s3cret").is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorize_cron(&headers, "s3cret").is_ok());
        assert!(authorize_cron(&headers, "").is_err());
    }
}
