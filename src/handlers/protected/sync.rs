// handlers/protected/sync.rs - Manual sync trigger, run history and cancellation

use axum::{body::Bytes, extract::State, Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::{IntegrationOwner, Role, SyncLog};
use crate::error::ApiError;
use crate::middleware::{ApiPath, ApiQuery, ApiResponse, ApiResult, ValidatedMembership};
use crate::sync::SyncSummary;

const DEFAULT_LOG_LIMIT: i64 = 20;
const MAX_LOG_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub integration_id: Option<Uuid>,
}

/// GET /api/companies/:company_id/sync?limit=20 - Recent runs, newest first
pub async fn sync_get(
    State(state): State<AppState>,
    Extension(membership): Extension<ValidatedMembership>,
    ApiQuery(query): ApiQuery<LogQuery>,
) -> ApiResult<Vec<SyncLog>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let logs = state.store.list_sync_logs(membership.company_id(), limit).await?;
    Ok(ApiResponse::success(logs))
}

/// POST /api/companies/:company_id/sync - Run a sync now
///
/// With an empty body every active integration of the company is synced;
/// with `{ "integrationId": "..." }` only that one. Any other body is a 400.
/// Responds after the runs finish with one summary per integration. Requires
/// manager or above.
pub async fn sync_post(
    State(state): State<AppState>,
    Extension(membership): Extension<ValidatedMembership>,
    body: Bytes,
) -> ApiResult<Vec<SyncSummary>> {
    let company_id = membership.company_id();
    state.access.require_role(membership.user_id(), company_id, Role::Manager).await?;

    let request = parse_sync_request(&body)?;
    let summaries = match request.integration_id {
        Some(integration_id) => {
            let integration = state
                .store
                .find_integration(integration_id)
                .await?
                .filter(|i| i.owner == IntegrationOwner::Company(company_id))
                .ok_or_else(|| ApiError::not_found("Integration not found"))?;
            if !integration.is_active {
                return Err(ApiError::conflict("Integration is disabled"));
            }
            let result = state.orchestrator.spawn_run(&integration).await;
            vec![SyncSummary::from_result(&integration, result)]
        }
        None => state.orchestrator.spawn_for_company(company_id).await?,
    };

    tracing::info!("Manual sync by user {} in company {}: {} runs", membership.user_id(), company_id, summaries.len());
    Ok(ApiResponse::success(summaries))
}

/// Only a body with nothing but whitespace means "all integrations"
fn parse_sync_request(body: &[u8]) -> Result<SyncRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SyncRequest::default());
    }
    let Json(request) = Json::<SyncRequest>::from_bytes(body)?;
    Ok(request)
}

/// POST /api/companies/:company_id/sync/:log_id/cancel - Cancel a pending or running sync
pub async fn sync_cancel(
    State(state): State<AppState>,
    Extension(membership): Extension<ValidatedMembership>,
    ApiPath((_, log_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<SyncLog> {
    let company_id = membership.company_id();
    state.access.require_role(membership.user_id(), company_id, Role::Manager).await?;

    let log = state
        .store
        .find_sync_log(log_id)
        .await?
        .filter(|l| l.company_id == Some(company_id))
        .ok_or_else(|| ApiError::not_found("Sync run not found"))?;

    let cancelled = state.orchestrator.cancel(log.id).await?;
    Ok(ApiResponse::success(cancelled))
}
