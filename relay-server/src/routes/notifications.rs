//! `/api/notifications/:kind`: append-only moderation/payment/report streams
//! with pagination and a single unread-count aggregate (spec.md §4.8).

use super::session::require_bearer;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use relay_core::stats::NotificationKind;
use serde::{Deserialize, Serialize};

fn parse_kind(raw: &str) -> ApiResult<NotificationKind> {
    match raw {
        "moderation" => Ok(NotificationKind::Moderation),
        "payment" => Ok(NotificationKind::Payment),
        "report" => Ok(NotificationKind::Report),
        other => Err(ApiError::InvalidInput(format!("unknown notification stream {other}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "pageSize", default = "default_page_size")]
    pub page_size: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_page_size() -> i64 {
    25
}

#[derive(Serialize)]
pub struct NotificationsResponse {
    pub items: Vec<NotificationView>,
    pub unread_count: i64,
}

#[derive(Serialize)]
pub struct NotificationView {
    pub id: i64,
    pub message: String,
    pub read: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(kind): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<NotificationsResponse>> {
    require_bearer(&state, &headers).await?;
    let kind = parse_kind(&kind)?;
    let items = state.store.list_notifications(kind, query.page_size, query.offset).await?;
    let unread_count = state.store.stats().unread_notification_count(kind).await?;
    Ok(Json(NotificationsResponse {
        items: items
            .into_iter()
            .map(|n| NotificationView { id: n.id, message: n.message, read: n.read, created_at: n.created_at })
            .collect(),
        unread_count,
    }))
}
