//! `/api/relay-settings` and the generic `/api/settings/:group` pair. Both
//! are thin wrappers over `Stats::get_setting_group`/`set_setting_group`,
//! storing whatever JSON payload the caller sends verbatim.

use super::session::require_bearer;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

const RELAY_SETTINGS_GROUP: &str = "relay-settings";

pub async fn get_relay_settings(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<serde_json::Value>> {
    require_bearer(&state, &headers).await?;
    get_group(&state, RELAY_SETTINGS_GROUP).await
}

pub async fn put_relay_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    require_bearer(&state, &headers).await?;
    set_group(&state, RELAY_SETTINGS_GROUP, payload).await
}

pub async fn get_settings_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_bearer(&state, &headers).await?;
    get_group(&state, &group).await
}

pub async fn put_settings_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    require_bearer(&state, &headers).await?;
    set_group(&state, &group, payload).await
}

async fn get_group(state: &AppState, group: &str) -> ApiResult<Json<serde_json::Value>> {
    match state.store.stats().get_setting_group(group).await? {
        Some(payload) => {
            let value: serde_json::Value = serde_json::from_str(&payload)
                .map_err(|e| ApiError::InvalidInput(format!("stored settings payload is corrupt: {e}")))?;
            Ok(Json(value))
        }
        None => Ok(Json(serde_json::json!({}))),
    }
}

async fn set_group(state: &AppState, group: &str, payload: serde_json::Value) -> ApiResult<Json<serde_json::Value>> {
    let encoded = serde_json::to_string(&payload)
        .map_err(|e| ApiError::InvalidInput(format!("payload is not encodable: {e}")))?;
    state.store.stats().set_setting_group(group, &encoded).await?;
    Ok(Json(payload))
}
