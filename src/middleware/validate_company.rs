use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use uuid::Uuid;

use super::auth::AuthUser;
use crate::app::AppState;
use crate::database::models::Membership;
use crate::error::ApiError;

/// Membership of the authenticated user in the company named by the path
#[derive(Clone, Debug)]
pub struct ValidatedMembership(pub Membership);

impl ValidatedMembership {
    pub fn company_id(&self) -> Uuid {
        self.0.company_id
    }

    pub fn user_id(&self) -> Uuid {
        self.0.user_id
    }
}

/// Resolves `:company_id` through the access guard before any company data
/// is touched. Must run after [`super::session_auth_middleware`].
pub async fn validate_company_middleware(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(ApiError::unauthorized)?;

    // A malformed id cannot name a company the user belongs to
    let company_id = params
        .get("company_id")
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(ApiError::access_denied)?;

    let membership = state.access.check_access(auth_user.user_id, company_id).await?;
    tracing::debug!("User {} acting in company {} as {}", membership.user_id, company_id, membership.role);

    request.extensions_mut().insert(ValidatedMembership(membership));
    Ok(next.run(request).await)
}
