use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName};

use crate::app::auth::AuthService;
use crate::http::AppError;
use crate::AppState;

const ADMIN_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-admin-token");

/// Caller identified by a bearer access token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

/// Internal callers (admin tools, completion-event producers) presenting the
/// shared `x-admin-token`.
#[derive(Debug, Clone, Copy)]
pub struct AdminToken;

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("invalid Authorization header"))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized("invalid Authorization header"))
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;

        let verifier = AuthService::new(state.paseto_access_key, state.access_ttl_minutes);
        let session = verifier
            .authenticate_access_token(token)
            .map_err(|err| {
                tracing::error!(error = ?err, "access token verification failed");
                AppError::internal("failed to authenticate")
            })?
            .filter(|session| session.user_id > 0)
            .ok_or_else(|| AppError::unauthorized("invalid token"))?;

        Ok(AuthUser {
            user_id: session.user_id,
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            return Err(AppError::forbidden("admin endpoints are disabled"));
        };

        match parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            Some(provided) if provided == expected => Ok(AdminToken),
            Some(_) => Err(AppError::forbidden("invalid admin token")),
            None => Err(AppError::forbidden("missing admin token")),
        }
    }
}
