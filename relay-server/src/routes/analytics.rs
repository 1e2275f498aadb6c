//! Read-only aggregate endpoints behind the dashboard: per-kind counts,
//! trends, storage totals, and the Bitcoin-denominated balance view.

use super::session::require_bearer;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::json;

#[derive(Serialize)]
pub struct KindSummaryRow {
    pub kind: i64,
    pub count: i64,
    pub total_mb: f64,
}

pub async fn kinds(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<KindSummaryRow>>> {
    require_bearer(&state, &headers).await?;
    let rows = state.store.stats().kinds_summary().await?;
    Ok(Json(
        rows.into_iter().map(|(kind, count, total_mb)| KindSummaryRow { kind, count, total_mb }).collect(),
    ))
}

pub async fn kind_trend(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(kind): Path<u64>,
) -> ApiResult<Json<Vec<(String, f64)>>> {
    require_bearer(&state, &headers).await?;
    let rows = state.store.stats().kind_trend_12mo(kind).await?;
    Ok(Json(rows))
}

pub async fn activitydata(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<(String, f64)>>> {
    require_bearer(&state, &headers).await?;
    let rows = state.store.stats().monthly_storage_gb().await?;
    Ok(Json(rows))
}

#[derive(Serialize)]
pub struct BarChartRow {
    pub month: String,
    pub notes_gb: f64,
    pub media_gb: f64,
}

pub async fn barchartdata(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<BarChartRow>>> {
    require_bearer(&state, &headers).await?;
    let rows = state.store.stats().monthly_notes_vs_media_gb().await?;
    Ok(Json(
        rows.into_iter().map(|(month, notes_gb, media_gb)| BarChartRow { month, notes_gb, media_gb }).collect(),
    ))
}

#[derive(Serialize)]
pub struct TimeseriesRow {
    pub month: String,
    pub total_profiles: i64,
    pub with_lightning: i64,
    pub with_dht_key: i64,
}

pub async fn timeseries(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<TimeseriesRow>>> {
    require_bearer(&state, &headers).await?;
    let rows = state.store.stats().profile_histogram_6mo().await?;
    Ok(Json(
        rows.into_iter()
            .map(|(month, total, lightning, dht)| TimeseriesRow {
                month,
                total_profiles: total,
                with_lightning: lightning,
                with_dht_key: dht,
            })
            .collect(),
    ))
}

pub async fn balance_usd(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<serde_json::Value>> {
    require_bearer(&state, &headers).await?;
    let balance = state.store.stats().latest_wallet_balance(&state.config.wallet_name).await?;
    let rate = state.store.stats().latest_bitcoin_rate().await?;
    let btc = balance.balance_sats as f64 / 100_000_000.0;
    Ok(Json(json!({
        "wallet_name": balance.wallet_name,
        "balance_sats": balance.balance_sats,
        "btc_usd_rate": rate.rate,
        "balance_usd": btc * rate.rate,
        "rate_timestamp": rate.timestamp,
    })))
}
