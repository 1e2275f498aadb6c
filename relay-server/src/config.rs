//! Process configuration. Every field can come from an environment variable
//! or an equivalent CLI flag, the same pattern `zidecar`'s `Args` struct
//! uses (`#[arg(long, env, default_value = ...)]`).

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "relay-server")]
#[command(about = "content-addressed relay: event graph + chunked-tree store", long_about = None)]
pub struct Config {
    /// HTTP listen address.
    #[arg(long, env = "RELAY_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Relay signing key, bech32 (`nsec1...`) or 64-char hex.
    #[arg(long, env = "RELAY_PRIVATE_KEY")]
    pub private_key: String,

    /// Wallet name this relay instance accepts sidecar pushes for.
    #[arg(long, env = "RELAY_WALLET_NAME", default_value = "main")]
    pub wallet_name: String,

    /// Path to the sled substrate directory.
    #[arg(long, env = "RELAY_SUBSTRATE_PATH", default_value = "./data/substrate")]
    pub substrate_path: String,

    /// sqlite connection string for the statistics store.
    #[arg(long, env = "RELAY_STATS_DB", default_value = "sqlite://./data/relay_stats.db?mode=rwc")]
    pub relay_stats_db: String,

    /// HS256 signing secret for session JWTs.
    #[arg(long, env = "RELAY_JWT_SECRET")]
    pub jwt_secret: String,

    /// API key the wallet sidecar authenticates with.
    #[arg(long, env = "RELAY_WALLET_API_KEY")]
    pub wallet_api_key: String,

    /// Shared HMAC secret for wallet-sidecar request signatures.
    #[arg(long, env = "RELAY_WALLET_HMAC_SECRET")]
    pub wallet_hmac_secret: String,

    /// Comma-separated Bitcoin price source endpoints, tried round-robin.
    #[arg(long, env = "RELAY_PRICE_SOURCES", value_delimiter = ',')]
    pub price_sources: Vec<String>,

    /// Interval between Bitcoin-rate ticks.
    #[arg(long, env = "RELAY_RATE_INTERVAL_SECS", default_value_t = 300)]
    pub rate_interval_secs: u64,

    /// Subscription tiers, `name:data_limit_bytes:price_sats` triples.
    #[arg(long, env = "RELAY_SUBSCRIPTION_TIERS", value_delimiter = ',')]
    pub subscription_tiers: Vec<String>,

    /// Event kinds recorded as `KindRow` statistics.
    #[arg(long, env = "RELAY_KIND_WHITELIST", value_delimiter = ',', default_value = "0,1,3,5,6,7")]
    pub kind_whitelist: Vec<u64>,
}

impl Config {
    pub fn tiers(&self) -> Vec<relay_core::Tier> {
        self.subscription_tiers
            .iter()
            .filter_map(|spec| {
                let mut parts = spec.splitn(3, ':');
                let name = parts.next()?.to_string();
                let data_limit_bytes: i64 = parts.next()?.parse().ok()?;
                let price_sats: i64 = parts.next()?.parse().ok()?;
                Some(relay_core::Tier { name, data_limit_bytes, price_sats })
            })
            .collect()
    }

    /// Cancelled opens give up after this long, per spec.md §5.
    pub const OPEN_DEADLINE: Duration = Duration::from_secs(3);
}
