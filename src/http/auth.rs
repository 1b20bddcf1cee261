//! Signup/login/refresh/logout. The only routes that don't require a bearer
//! token, since their whole purpose is to mint one.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, verify_password, User};
use crate::error::{EngineError, Result};
use crate::http::AppState;

#[derive(Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn signup(State(state): State<AppState>, Json(req): Json<SignupRequest>) -> Result<Json<TokenPairResponse>> {
    if req.username.trim().is_empty() || req.password.len() < 8 {
        return Err(EngineError::validation("username must be non-empty and password at least 8 characters"));
    }
    if state.persistence.mongo.get_user_by_username(&req.username).await?.is_some() {
        return Err(EngineError::validation("username already taken"));
    }

    let password_hash = hash_password(&req.password)?;
    let user = User::new(req.username, password_hash);
    state.persistence.mongo.create_user(&user).await?;

    issue_token_pair(&state, user.id)
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Json<TokenPairResponse>> {
    let user = state
        .persistence
        .mongo
        .get_user_by_username(&req.username)
        .await?
        .ok_or_else(|| EngineError::forbidden("invalid username or password"))?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(EngineError::forbidden("invalid username or password"));
    }

    issue_token_pair(&state, user.id)
}

pub async fn refresh_token(State(state): State<AppState>, Json(req): Json<RefreshRequest>) -> Result<Json<TokenPairResponse>> {
    let user_id = state.tokens.verify_refresh_token(&req.refresh_token)?;
    issue_token_pair(&state, user_id)
}

/// JWTs are stateless and carry their own expiry; there is no server-side
/// revocation list, so logout is a no-op the client observes by discarding
/// its tokens.
pub async fn logout() -> axum::http::StatusCode {
    axum::http::StatusCode::NO_CONTENT
}

fn issue_token_pair(state: &AppState, user_id: uuid::Uuid) -> Result<Json<TokenPairResponse>> {
    Ok(Json(TokenPairResponse {
        access_token: state.tokens.issue_access_token(user_id)?,
        refresh_token: state.tokens.issue_refresh_token(user_id)?,
    }))
}
