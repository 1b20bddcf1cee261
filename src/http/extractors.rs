//! Shared axum extractors for the HTTP edge.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::EngineError;
use crate::http::AppState;

/// The authenticated caller, resolved from `Authorization: Bearer <jwt>`.
pub struct AuthUser(pub Uuid);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| EngineError::forbidden("missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| EngineError::forbidden("expected a Bearer token"))?;

        let user_id = state.tokens.verify_access_token(token)?;
        Ok(AuthUser(user_id))
    }
}
