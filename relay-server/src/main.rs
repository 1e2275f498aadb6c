mod auth;
mod bitcoin_rate;
mod config;
mod error;
mod routes;
mod state;

use clap::Parser;
use config::Config;
use k256::schnorr::SigningKey;
use relay_core::scionic::{FileTypeMode, FileTypePolicy};
use relay_core::stats::Stats;
use relay_core::store::Store;
use relay_core::substrate::Substrate;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    let relay_private_key = auth::parse_private_key(&config.private_key)?;
    let signing_key = SigningKey::from_bytes(&relay_private_key)
        .map_err(|e| anyhow::anyhow!("invalid relay private key: {e}"))?;
    let relay_pubkey_hex = hex::encode(signing_key.verifying_key().to_bytes());

    info!("opening substrate at {}", config.substrate_path);
    let substrate = Substrate::open(&config.substrate_path)?;
    info!("opening statistics store at {}", config.relay_stats_db);
    let stats = Stats::open(&config.relay_stats_db).await?;

    // TODO: photo/video/audio allow-lists and file-type mode are not yet
    // exposed as config; relay-settings can override them at runtime via
    // /api/relay-settings until then.
    let policy = FileTypePolicy {
        mode: Some(FileTypeMode::Smart),
        photos: vec!["jpg".into(), "jpeg".into(), "png".into(), "gif".into(), "webp".into()],
        videos: vec!["mp4".into(), "webm".into(), "mov".into()],
        audio: vec!["mp3".into(), "wav".into(), "flac".into()],
        blocked: vec!["exe".into(), "dll".into(), "sh".into(), "bat".into()],
    };

    let store = Store::new(substrate, stats, policy, config.kind_whitelist.clone(), config.tiers());

    let state = AppState {
        store: Arc::new(store),
        config: Arc::new(config.clone()),
        relay_private_key,
        relay_pubkey_hex,
    };

    tokio::spawn(bitcoin_rate::run(
        state.store.clone(),
        config.price_sources.clone(),
        std::time::Duration::from_secs(config.rate_interval_secs),
    ));

    let app = routes::router(state).layer(CorsLayer::permissive()).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!("listening on {}", config.listen);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight requests");
}
