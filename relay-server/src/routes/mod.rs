pub mod analytics;
pub mod media;
pub mod notifications;
pub mod session;
pub mod settings;
pub mod wallet;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

async fn health() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/signup", post(session::signup))
        .route("/login", post(session::login))
        .route("/verify", post(session::verify))
        .route("/logout", post(session::logout))
        .route(
            "/api/relay-settings",
            get(settings::get_relay_settings).post(settings::put_relay_settings),
        )
        .route(
            "/api/settings/:group",
            get(settings::get_settings_group).post(settings::put_settings_group),
        )
        .route("/api/kinds", get(analytics::kinds))
        .route("/api/kind-trend/:kind", get(analytics::kind_trend))
        .route("/api/activitydata", get(analytics::activitydata))
        .route("/api/barchartdata", get(analytics::barchartdata))
        .route("/api/timeseries", get(analytics::timeseries))
        .route("/api/balance/usd", get(analytics::balance_usd))
        .route("/api/wallet/balance", post(wallet::push_balance))
        .route("/api/wallet/transactions", post(wallet::push_transactions))
        .route("/api/wallet/addresses", post(wallet::push_addresses))
        .route(
            "/api/pending-transactions",
            get(wallet::list_pending).post(wallet::create_pending),
        )
        .route("/api/replacement-transactions", post(wallet::replace_pending))
        .route("/api/updateRate", post(wallet::update_rate))
        .route("/api/media", get(media::list_media))
        .route("/api/media/:hash", get(media::get_media))
        .route("/api/notifications/:kind", get(notifications::list))
        .with_state(state)
}
