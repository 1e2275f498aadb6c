use crate::config::Config;
use relay_core::Store;
use std::sync::Arc;

/// Process-scoped context handed to every handler: the composed storage
/// engine plus everything that must exist before it (spec.md §9's
/// "Global state becomes an explicit context object").
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<Config>,
    pub relay_private_key: [u8; 32],
    pub relay_pubkey_hex: String,
}
