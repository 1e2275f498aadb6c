//! Wallet-sidecar push endpoints (API-key + HMAC) and the bearer-guarded
//! pending-transaction / rate-override endpoints behind them.

use super::session::require_bearer;
use crate::auth::{self, verify_wallet_hmac};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use relay_core::stats::PendingTransaction;
use relay_core::IncomingTransaction;
use serde::Deserialize;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))
}

fn require_wallet_hmac(state: &AppState, headers: &HeaderMap, body: &[u8]) -> ApiResult<()> {
    let api_key = header_str(headers, "X-API-Key")?;
    let timestamp = header_str(headers, "X-Timestamp")?;
    let signature = header_str(headers, "X-Signature")?;
    verify_wallet_hmac(&state.config.wallet_hmac_secret, api_key, &state.config.wallet_api_key, timestamp, signature, body)
}

#[derive(Debug, Deserialize)]
pub struct BalancePush {
    pub wallet_name: String,
    pub balance_sats: i64,
}

pub async fn push_balance(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    require_wallet_hmac(&state, &headers, &body)?;
    let push: BalancePush = serde_json::from_slice(&body).map_err(|e| ApiError::InvalidInput(e.to_string()))?;
    if push.wallet_name != state.config.wallet_name {
        return Err(ApiError::Store(relay_core::StoreError::PolicyRejected(format!(
            "balance push for unknown wallet {}",
            push.wallet_name
        ))));
    }
    state.store.stats().record_wallet_balance(&push.wallet_name, push.balance_sats).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct TransactionPush {
    pub address: String,
    pub date: chrono::DateTime<Utc>,
    pub output: String,
    pub value: f64,
    pub wallet_name: String,
    pub tx_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsPushBody {
    pub transactions: Vec<TransactionPush>,
}

/// Processes a confirmed-transaction batch, then signs and stores a
/// subscription-renewal event for every subscriber whose tier changed.
pub async fn push_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    require_wallet_hmac(&state, &headers, &body)?;
    let push: TransactionsPushBody = serde_json::from_slice(&body).map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let items: Vec<IncomingTransaction> = push
        .transactions
        .into_iter()
        .map(|t| IncomingTransaction {
            address: t.address,
            date: t.date,
            output: t.output,
            value_btc: t.value,
            wallet_name: t.wallet_name,
            tx_id: t.tx_id,
        })
        .collect();

    let updates = state.store.process_transactions(&state.config.wallet_name, items).await?;
    for update in updates {
        let event = auth::sign_subscription_event(
            &state.relay_private_key,
            &state.relay_pubkey_hex,
            &update.npub,
            &update.tier,
            update.expires_at,
        )?;
        state.store.store_event(event).await?;
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct AddressPush {
    pub index: i64,
    pub address: String,
    pub wallet_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddressesPushBody {
    pub addresses: Vec<AddressPush>,
}

pub async fn push_addresses(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    require_wallet_hmac(&state, &headers, &body)?;
    let push: AddressesPushBody = serde_json::from_slice(&body).map_err(|e| ApiError::InvalidInput(e.to_string()))?;
    for addr in push.addresses {
        state.store.save_address(&state.config.wallet_name, addr.index, &addr.address, &addr.wallet_name).await?;
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, serde::Serialize)]
pub struct PendingTransactionView {
    pub tx_id: String,
    pub address: String,
    pub amount: f64,
    pub created_at: chrono::DateTime<Utc>,
}

pub async fn list_pending(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<PendingTransactionView>>> {
    require_bearer(&state, &headers).await?;
    let rows = state.store.stats().list_pending_transactions().await?;
    Ok(Json(
        rows.into_iter()
            .map(|p| PendingTransactionView { tx_id: p.tx_id, address: p.address, amount: p.amount, created_at: p.created_at })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreatePendingTransaction {
    pub tx_id: String,
    pub address: String,
    pub amount: f64,
}

pub async fn create_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePendingTransaction>,
) -> ApiResult<Json<serde_json::Value>> {
    require_bearer(&state, &headers).await?;
    state
        .store
        .stats()
        .insert_pending_transaction(&PendingTransaction {
            tx_id: req.tx_id,
            address: req.address,
            amount: req.amount,
            created_at: Utc::now(),
        })
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct ReplacementTransaction {
    pub old_tx_id: String,
    pub tx_id: String,
    pub address: String,
    pub amount: f64,
}

pub async fn replace_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReplacementTransaction>,
) -> ApiResult<Json<serde_json::Value>> {
    require_bearer(&state, &headers).await?;
    state
        .store
        .stats()
        .replace_pending_transaction(
            &req.old_tx_id,
            &PendingTransaction {
                tx_id: req.tx_id,
                address: req.address,
                amount: req.amount,
                created_at: Utc::now(),
            },
        )
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRateRequest {
    pub rate: f64,
}

pub async fn update_rate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateRateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_bearer(&state, &headers).await?;
    state.store.save_bitcoin_rate(req.rate).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
