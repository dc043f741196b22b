// handlers/protected/integrations.rs - Company-owned ad account integrations

use axum::{extract::State, Extension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::{Integration, IntegrationOwner, NewIntegration, Platform, Role};
use crate::error::ApiError;
use crate::middleware::{ApiJson, ApiPath, ApiResponse, ApiResult, ValidatedMembership};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationRequest {
    pub platform: String,
    pub account_id: String,
    pub account_name: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl IntegrationRequest {
    /// Field-level validation into the upsert payload
    fn into_new(self, company_id: Uuid) -> Result<NewIntegration, ApiError> {
        let mut field_errors = HashMap::new();

        let platform = self.platform.parse::<Platform>().ok();
        if platform.is_none() {
            field_errors.insert("platform".to_string(), "must be one of meta, google-ads, ga4".to_string());
        }
        let account_id = self.account_id.trim().to_string();
        if account_id.is_empty() {
            field_errors.insert("accountId".to_string(), "is required".to_string());
        }
        if self.access_token.trim().is_empty() {
            field_errors.insert("accessToken".to_string(), "is required".to_string());
        }

        match platform {
            Some(platform) if field_errors.is_empty() => Ok(NewIntegration {
                owner: IntegrationOwner::Company(company_id),
                platform,
                account_name: self
                    .account_name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| account_id.clone()),
                account_id,
                access_token: self.access_token,
                refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            }),
            _ => Err(ApiError::validation_error("Invalid integration", Some(field_errors))),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivatedIntegration {
    pub id: Uuid,
    pub is_active: bool,
}

/// GET /api/companies/:company_id/integrations
pub async fn integrations_get(
    State(state): State<AppState>,
    Extension(membership): Extension<ValidatedMembership>,
) -> ApiResult<Vec<Integration>> {
    let integrations = state
        .store
        .list_integrations(IntegrationOwner::Company(membership.company_id()))
        .await?;
    Ok(ApiResponse::success(integrations))
}

/// POST /api/companies/:company_id/integrations - Connect or refresh an ad account
///
/// Upserts on (company, platform, accountId): reconnecting the same account
/// replaces its tokens and reactivates it. Requires manager or above.
///
/// Expected Input:
/// ```json
/// { "platform": "meta", "accountId": "act_123", "accountName": "Shop", "accessToken": "...", "refreshToken": "..." }
/// ```
pub async fn integrations_post(
    State(state): State<AppState>,
    Extension(membership): Extension<ValidatedMembership>,
    ApiJson(body): ApiJson<IntegrationRequest>,
) -> ApiResult<Integration> {
    let company_id = membership.company_id();
    state.access.require_role(membership.user_id(), company_id, Role::Manager).await?;

    let new = body.into_new(company_id)?;
    let integration = state.store.upsert_integration(new).await?;
    tracing::info!(
        "Integration {} ({} {}) saved for company {}",
        integration.id, integration.platform, integration.account_id, company_id
    );
    Ok(ApiResponse::created(integration))
}

/// DELETE /api/companies/:company_id/integrations/:integration_id - Soft-disable
pub async fn integration_delete(
    State(state): State<AppState>,
    Extension(membership): Extension<ValidatedMembership>,
    ApiPath((_, integration_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<DeactivatedIntegration> {
    let company_id = membership.company_id();
    state.access.require_role(membership.user_id(), company_id, Role::Manager).await?;

    let owned = state
        .store
        .find_integration(integration_id)
        .await?
        .is_some_and(|i| i.owner == IntegrationOwner::Company(company_id));
    if !owned || !state.store.deactivate_integration(integration_id).await? {
        return Err(ApiError::not_found("Integration not found"));
    }

    tracing::info!("Integration {} disabled in company {}", integration_id, company_id);
    Ok(ApiResponse::success(DeactivatedIntegration {
        id: integration_id,
        is_active: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(platform: &str, account_id: &str, token: &str) -> IntegrationRequest {
        IntegrationRequest {
            platform: platform.to_string(),
            account_id: account_id.to_string(),
            account_name: None,
            access_token: token.to_string(),
            refresh_token: Some(String::new()),
        }
    }

    #[test]
    fn valid_request_defaults_account_name() {
        let company = Uuid::new_v4();
        let new = request("google-ads", " 123-456 ", "tok").into_new(company).unwrap();
        assert_eq!(new.owner, IntegrationOwner::Company(company));
        assert_eq!(new.platform, Platform::GoogleAds);
        assert_eq!(new.account_name, "123-456");
        assert!(new.refresh_token.is_none());
    }

    #[test]
    fn invalid_fields_are_reported_together() {
        let err = request("tiktok", "", " ").into_new(Uuid::new_v4()).unwrap_err();
        match err {
            ApiError::ValidationError { field_errors: Some(fields), .. } => {
                assert!(fields.contains_key("platform"));
                assert!(fields.contains_key("accountId"));
                assert!(fields.contains_key("accessToken"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
