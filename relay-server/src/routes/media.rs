//! `/api/media` listing and single-item fetch.

use super::session::require_bearer;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct MediaListQuery {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "pageSize", default = "default_page_size")]
    pub page_size: usize,
    pub cursor: Option<usize>,
}

fn default_page_size() -> usize {
    50
}

#[derive(Serialize)]
pub struct MediaListResponse {
    pub items: Vec<String>,
    pub cursor: Option<usize>,
}

pub async fn list_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MediaListQuery>,
) -> ApiResult<Json<MediaListResponse>> {
    require_bearer(&state, &headers).await?;
    let (items, cursor) = state.store.list_media(&query.kind, query.page_size, query.cursor.unwrap_or(0))?;
    Ok(Json(MediaListResponse { items, cursor }))
}

pub async fn get_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hash): Path<String>,
) -> ApiResult<Response> {
    require_bearer(&state, &headers).await?;
    let retrieved = state.store.retrieve_leaf(&hash, &hash, true)?;
    let bytes = match retrieved.data.leaf.content {
        Some(content) => content,
        None => Vec::new(),
    };

    let mime = mime_for_extension(&retrieved.data.leaf.item_name);
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

fn mime_for_extension(item_name: &str) -> &'static str {
    match item_name.rsplit('.').next().unwrap_or("").to_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
