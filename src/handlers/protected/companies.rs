// handlers/protected/companies.rs - Membership views

use axum::{extract::State, Extension};
use serde::Serialize;

use crate::app::AppState;
use crate::database::models::{Company, Integration, IntegrationOwner, Role};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, ValidatedMembership};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyView {
    #[serde(flatten)]
    pub company: Company,
    pub role: Role,
}

/// GET /api/me/companies - Companies the caller belongs to, oldest membership first
pub async fn me_companies(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Vec<Company>> {
    let companies = state.access.list_companies(user.user_id).await?;
    Ok(ApiResponse::success(companies))
}

/// GET /api/me/integrations - Integrations connected to the caller personally
pub async fn me_integrations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<Integration>> {
    let integrations = state.store.list_integrations(IntegrationOwner::User(user.user_id)).await?;
    Ok(ApiResponse::success(integrations))
}

/// GET /api/companies/:company_id - The company plus the caller's role in it
pub async fn company_get(
    State(state): State<AppState>,
    Extension(membership): Extension<ValidatedMembership>,
) -> ApiResult<CompanyView> {
    let company = state
        .store
        .find_company(membership.company_id())
        .await?
        // Membership without a company row means the FK was bypassed
        .ok_or_else(ApiError::access_denied)?;

    Ok(ApiResponse::success(CompanyView {
        company,
        role: membership.0.role,
    }))
}
