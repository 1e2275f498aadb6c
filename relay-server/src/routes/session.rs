//! `/signup`, `/login`, `/verify`, `/logout`: the challenge-response login
//! triple from spec.md §3/§6.

use crate::auth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use relay_core::event::Event;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub pubkey: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub pubkey: String,
}

/// Creates the first user; fails once any user already exists.
pub async fn signup(State(state): State<AppState>, Json(req): Json<SignupRequest>) -> ApiResult<Json<SignupResponse>> {
    if state.store.stats().any_user_exists().await? {
        return Err(ApiError::Conflict("a user already exists".to_string()));
    }
    state.store.stats().create_user(&req.pubkey).await?;
    Ok(Json(SignupResponse { pubkey: req.pubkey }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub pubkey: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub challenge: String,
}

/// Issues a fresh challenge for `pubkey`, replacing any prior one.
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<Json<LoginResponse>> {
    let (challenge, challenge_hash) = auth::generate_challenge();
    state.store.stats().save_challenge(&req.pubkey, &challenge, &challenge_hash).await?;
    Ok(Json(LoginResponse { challenge }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub event: Event,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Validates a signed event over the outstanding challenge, then issues a JWT.
pub async fn verify(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> ApiResult<Json<VerifyResponse>> {
    let event = req.event;
    auth::verify_event_signature(&event)?;

    let challenge = state.store.stats().get_challenge(&event.pubkey).await?;
    if !challenge.is_valid(Utc::now()) {
        return Err(ApiError::Unauthorized("challenge expired".to_string()));
    }
    if event.content != challenge.challenge {
        return Err(ApiError::Unauthorized("challenge mismatch".to_string()));
    }
    state.store.stats().expire_challenge(&event.pubkey).await?;

    let (token, expires_at) = auth::issue_jwt(&state.config.jwt_secret, &event.pubkey)?;
    state.store.stats().record_active_token(&token, &event.pubkey, expires_at).await?;

    Ok(Json(VerifyResponse { token, expires_at }))
}

/// Invalidates every active token for the bearer's pubkey.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<serde_json::Value>> {
    let claims = require_bearer(&state, &headers).await?;
    state.store.stats().invalidate_tokens_for(&claims.user_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Shared bearer-token guard: decodes the JWT, then checks the active-token
/// table is still the authority for session validity (spec.md §5).
pub async fn require_bearer(state: &AppState, headers: &HeaderMap) -> ApiResult<auth::Claims> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("expected Bearer token".to_string()))?;

    let claims = auth::verify_jwt(&state.config.jwt_secret, token)?;
    if !state.store.stats().is_active_token(token).await? {
        return Err(ApiError::Unauthorized("token not active".to_string()));
    }
    Ok(claims)
}
