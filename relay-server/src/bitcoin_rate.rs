//! Round-robins over configured price sources on a fixed interval; on
//! success records the rate (deduplicated against the latest row by
//! `Store::save_bitcoin_rate`). A source failure rotates to the next one
//! rather than failing the tick, per spec.md §8.8/§7.

use relay_core::Store;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(alias = "price", alias = "rate", alias = "USD")]
    value: f64,
}

async fn fetch_from(client: &reqwest::Client, source: &str) -> Option<f64> {
    match client.get(source).send().await {
        Ok(resp) => match resp.json::<PriceResponse>().await {
            Ok(parsed) => Some(parsed.value),
            Err(e) => {
                warn!("price source {source} returned unparseable body: {e}");
                None
            }
        },
        Err(e) => {
            warn!("price source {source} unreachable: {e}");
            None
        }
    }
}

pub async fn run(store: Arc<Store>, sources: Vec<String>, interval: Duration) {
    if sources.is_empty() {
        warn!("no Bitcoin price sources configured; rate ticker idle");
        return;
    }
    info!("starting Bitcoin rate ticker over {} source(s)", sources.len());
    let client = reqwest::Client::new();
    let mut cursor = 0usize;

    loop {
        let mut rate = None;
        for _ in 0..sources.len() {
            let source = &sources[cursor % sources.len()];
            cursor += 1;
            if let Some(value) = fetch_from(&client, source).await {
                rate = Some(value);
                break;
            }
        }

        match rate {
            Some(value) => {
                if let Err(e) = store.save_bitcoin_rate(value).await {
                    warn!("failed to record bitcoin rate {value}: {e}");
                } else {
                    info!("bitcoin rate tick: {value}");
                }
            }
            None => warn!("all price sources failed this tick"),
        }

        tokio::time::sleep(interval).await;
    }
}
