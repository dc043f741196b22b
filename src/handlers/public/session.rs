// handlers/public/session.rs - POST /auth/refresh

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension,
};
use serde::Serialize;

use crate::app::AppState;
use crate::auth::{generate_jwt, Claims};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, AuthUser, SESSION_COOKIE};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedSession {
    pub token: String,
    pub expires_in: u64,
}

/// POST /auth/refresh - Re-issue the caller's session token
///
/// Requires a currently valid session (Bearer header or `session` cookie).
/// The new token is returned in the body and set as the session cookie.
///
/// Expected Output:
/// ```json
/// { "success": true, "data": { "token": "eyJhbGciOi...", "expiresIn": 604800 } }
/// ```
pub async fn session_refresh(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let security = &state.config.security;
    let claims = Claims::new(user.user_id, user.email.clone(), security.jwt_expiry_hours);
    let token = generate_jwt(&claims, &security.jwt_secret)?;
    let expires_in = security.jwt_expiry_hours * 3600;

    tracing::info!("Session refreshed for user {}", user.user_id);

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, expires_in
    );
    let mut response = ApiResponse::success(RefreshedSession { token, expires_in }).into_response();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(e) => tracing::warn!("Session cookie not set: {}", e),
    }
    Ok(response)
}
