//! The write pipeline (spec.md §4.9): the only place that calls
//! `Substrate::commit`. Every high-level write — store a leaf, store an
//! event, store a blob, process a wallet transaction — is assembled here
//! from the pure mutate-and-return-handles operations exposed by the
//! `scionic`, `event`, `blob` and `address` modules, then committed in one
//! atomic step. Statistics-store rows are written afterwards, logged and
//! non-fatal on failure (spec.md §7).
//!
//! `Store` is the composed contract from spec.md §9's design notes: its
//! methods below are grouped into a `PrimaryStore` capability (substrate-
//! backed, via `Substrate`/`TreeHandle`) and a `StatisticsStore` capability
//! (relational, via `Stats`) rather than expressed as two formal traits —
//! there is exactly one implementation of each here, so a trait boundary
//! would add indirection without a second implementer to justify it.

use crate::address::{self, Address};
use crate::blob;
use crate::event::{self, Event, EventFilter};
use crate::scionic::{self, DagLeafData, FileTypePolicy, RetrievedLeaf, StoreLeafOutcome};
use crate::stats::{Stats, Subscriber, SubscriptionPeriod};
use crate::substrate::Substrate;
use crate::Result;
use chrono::{DateTime, Months, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

/// A named storage/price pairing, loaded from `subscription_tiers` config.
#[derive(Debug, Clone)]
pub struct Tier {
    pub name: String,
    pub data_limit_bytes: i64,
    pub price_sats: i64,
}

/// One confirmed payment as delivered by the wallet sidecar.
#[derive(Debug, Clone)]
pub struct IncomingTransaction {
    pub address: String,
    pub date: DateTime<Utc>,
    pub output: String,
    pub value_btc: f64,
    pub wallet_name: String,
    pub tx_id: String,
}

/// A subscription change that requires a freshly signed relay event.
/// Signing needs the relay's private key, which lives at the `relay-server`
/// boundary, not in this storage-only crate — so this is handed back for
/// the caller to sign and feed into `Store::store_event`.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub npub: String,
    pub tier: String,
    pub expires_at: DateTime<Utc>,
}

pub struct Store {
    substrate: Substrate,
    stats: Stats,
    policy: FileTypePolicy,
    kind_whitelist: Vec<u64>,
    tiers: Vec<Tier>,
}

impl Store {
    pub fn new(substrate: Substrate, stats: Stats, policy: FileTypePolicy, kind_whitelist: Vec<u64>, tiers: Vec<Tier>) -> Self {
        Self { substrate, stats, policy, kind_whitelist, tiers }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    // ---- PrimaryStore capability: chunked-tree (scionic) operations ----

    pub async fn store_leaf(&self, root_hash: &str, leaf_data: DagLeafData) -> Result<()> {
        let snapshot = self.substrate.snapshot();
        let StoreLeafOutcome { handles, file_info } =
            scionic::store_leaf(&self.substrate, &snapshot, root_hash, leaf_data, &self.policy)?;
        self.substrate.commit(handles)?;

        if let Some(info) = file_info {
            if let Err(e) = self.stats.insert_file_info(&info).await {
                warn!("failed to record file info for root {root_hash}: {e}");
            }
        }
        Ok(())
    }

    pub fn retrieve_leaf(&self, root_hash: &str, leaf_hash: &str, include_content: bool) -> Result<RetrievedLeaf> {
        let snapshot = self.substrate.snapshot();
        scionic::retrieve_leaf(&self.substrate, &snapshot, root_hash, leaf_hash, include_content)
    }

    pub fn retrieve_content(&self, content_hash: &[u8]) -> Result<Vec<u8>> {
        let snapshot = self.substrate.snapshot();
        scionic::retrieve_content(&self.substrate, &snapshot, content_hash)
    }

    pub fn query_dag(&self, filter: &HashMap<String, String>) -> Result<Vec<String>> {
        let snapshot = self.substrate.snapshot();
        scionic::query_dag(&self.substrate, &snapshot, filter)
    }

    /// Paginated listing of every root hash stored under file-type `kind_name`
    /// (the bucket a root leaf's extension maps to). `offset` is the opaque
    /// cursor; the returned cursor is `None` once the bucket is exhausted.
    pub fn list_media(&self, kind_name: &str, page_size: usize, offset: usize) -> Result<(Vec<String>, Option<usize>)> {
        let snapshot = self.substrate.snapshot();
        let all = crate::cache::list_all(&self.substrate, &snapshot, kind_name)?;
        let page: Vec<String> = all.iter().skip(offset).take(page_size).cloned().collect();
        let next = if offset + page.len() < all.len() { Some(offset + page.len()) } else { None };
        Ok((page, next))
    }

    // ---- PrimaryStore capability: event operations ----

    /// Stores the event, then (if it passes the whitelist / is kind 0)
    /// records the dependent statistics row. The statistics write happens
    /// only after the substrate commit succeeds and is best-effort.
    pub async fn store_event(&self, event: Event) -> Result<()> {
        if self.stats.allowed_users_active().await? && !self.stats.is_allowed_user(&event.pubkey).await? {
            if let Err(e) = self
                .stats
                .push_notification(
                    crate::stats::NotificationKind::Moderation,
                    &format!("rejected event {} from non-allowed pubkey {}", event.id, event.pubkey),
                )
                .await
            {
                warn!("failed to push moderation notification: {e}");
            }
            return Err(crate::StoreError::PolicyRejected(format!(
                "pubkey {} is not on the allowed-users list",
                event.pubkey
            )));
        }

        let snapshot = self.substrate.snapshot();
        let outcome = event::store_event(&self.substrate, &snapshot, &event)?;
        self.substrate.commit(outcome.handles)?;

        let size_mb = event.content.len() as f64 / 1_000_000.0;
        if let Err(e) = self
            .stats
            .insert_kind_row_if_whitelisted(&self.kind_whitelist, event.kind, &event.id, size_mb)
            .await
        {
            warn!("failed to record kind row for event {}: {e}", event.id);
        }
        if event.kind == 0 {
            if let Err(e) = self.stats.upsert_user_profile(&event.pubkey, &event.content).await {
                warn!("failed to upsert profile for {}: {e}", event.pubkey);
            }
        }
        info!("stored event {} (kind {})", event.id, event.kind);
        Ok(())
    }

    pub fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let snapshot = self.substrate.snapshot();
        event::query_events(&self.substrate, &snapshot, filter)
    }

    pub async fn delete_event(&self, id: &str) -> Result<()> {
        let snapshot = self.substrate.snapshot();
        let handle = event::delete_event(&self.substrate, &snapshot, id)?;
        self.substrate.commit(vec![handle])?;
        if let Err(e) = self.stats.delete_kind_row(id).await {
            warn!("failed to delete kind row for event {id}: {e}");
        }
        Ok(())
    }

    // ---- PrimaryStore capability: blob operations ----

    pub fn store_blob(&self, data: &[u8], hash: &[u8], pubkey: &str) -> Result<()> {
        let snapshot = self.substrate.snapshot();
        let handles = blob::store_blob(&self.substrate, &snapshot, data, hash, pubkey)?;
        self.substrate.commit(handles)
    }

    pub fn get_blob(&self, hex_hash: &str) -> Result<Vec<u8>> {
        let snapshot = self.substrate.snapshot();
        blob::get_blob(&self.substrate, &snapshot, hex_hash)
    }

    pub fn delete_blob(&self, hex_hash: &str) -> Result<()> {
        let snapshot = self.substrate.snapshot();
        let handle = blob::delete_blob(&self.substrate, &snapshot, hex_hash)?;
        self.substrate.commit(vec![handle])
    }

    // ---- PrimaryStore capability: address pool ----

    pub async fn save_address(&self, configured_wallet: &str, index: i64, address: &str, wallet_name: &str) -> Result<()> {
        let snapshot = self.substrate.snapshot();
        let handle = address::stage_save(&self.substrate, &snapshot, configured_wallet, index, address, wallet_name)?;
        if let Some(handle) = handle {
            self.substrate.commit(vec![handle])?;
        }
        if let Err(e) = self.stats.insert_address_row(address, wallet_name).await {
            warn!("failed to mirror address row for {address}: {e}");
        }
        Ok(())
    }

    pub async fn allocate_address(&self, npub: &str) -> Result<Address> {
        let snapshot = self.substrate.snapshot();
        let now = Utc::now();
        let outcome = address::allocate(&self.substrate, &snapshot, npub, now)?;
        self.substrate.commit(vec![outcome.handle])?;
        if let Err(e) = self.stats.mark_address_allocated(&outcome.address.address, npub, now).await {
            warn!("failed to mirror allocation for {}: {e}", outcome.address.address);
        }
        Ok(outcome.address)
    }

    // ---- StatisticsStore capability: Bitcoin rate / wallet bookkeeping ----

    pub async fn save_bitcoin_rate(&self, rate: f64) -> Result<()> {
        self.stats.save_bitcoin_rate(rate).await
    }

    /// Process one confirmed-transaction batch from the wallet sidecar
    /// (spec.md §4.7). Returns the subscription updates that still need a
    /// freshly signed relay event — `relay-server` signs and feeds each one
    /// back through `store_event`.
    pub async fn process_transactions(
        &self,
        configured_wallet: &str,
        items: Vec<IncomingTransaction>,
    ) -> Result<Vec<SubscriptionUpdate>> {
        let mut updates = Vec::new();
        for item in items {
            if item.wallet_name != configured_wallet {
                continue;
            }
            if let Err(e) = self.stats.delete_pending_transaction(&item.tx_id).await {
                warn!("failed to clear pending tx {}: {e}", item.tx_id);
            }

            let tx = crate::stats::WalletTransaction {
                address: item.address.clone(),
                date: item.date,
                output: item.output.clone(),
                value: item.value_btc,
                wallet_name: item.wallet_name.clone(),
                tx_id: item.tx_id.clone(),
            };
            let inserted = self.stats.record_wallet_transaction(&tx).await?;
            if !inserted {
                continue; // already processed: idempotent duplicate.
            }

            let subscriber = match self.stats.find_subscriber_by_address(&item.output).await? {
                Some(s) => s,
                None => continue,
            };

            let payment_sats = (item.value_btc * 100_000_000.0).round() as i64;
            let tier = match self
                .tiers
                .iter()
                .filter(|t| t.price_sats <= payment_sats)
                .max_by_key(|t| t.price_sats)
            {
                Some(t) => t,
                None => continue,
            };

            let now = Utc::now();
            let new_end = if subscriber.end_date > now {
                subscriber.end_date.checked_add_months(Months::new(1)).unwrap_or(subscriber.end_date)
            } else {
                now.checked_add_months(Months::new(1)).unwrap_or(now)
            };

            let period = SubscriptionPeriod {
                transaction_id: item.tx_id.clone(),
                npub: subscriber.npub.clone(),
                tier: tier.name.clone(),
                storage_limit_bytes: tier.data_limit_bytes,
                start_date: now,
                end_date: new_end,
                payment_amount: item.value_btc,
            };
            self.stats.insert_subscription_period(&period).await?;

            let updated = Subscriber {
                npub: subscriber.npub.clone(),
                address: subscriber.address.clone(),
                tier: tier.name.clone(),
                start_date: subscriber.start_date,
                end_date: new_end,
                last_transaction_id: Some(item.tx_id.clone()),
            };
            self.stats.upsert_subscriber(&updated).await?;

            let snapshot = self.substrate.snapshot();
            match address::mark_used(&self.substrate, &snapshot, &item.output) {
                Ok(handle) => {
                    if let Err(e) = self.substrate.commit(vec![handle]) {
                        warn!("failed to mark address {} used: {e}", item.output);
                    } else if let Err(e) = self.stats.mark_address_used(&item.output).await {
                        warn!("failed to mirror used status for {}: {e}", item.output);
                    }
                }
                Err(e) => warn!("address {} not found in pool when marking used: {e}", item.output),
            }

            info!("subscriber {} renewed to tier {} until {new_end}", subscriber.npub, tier.name);
            if let Err(e) = self
                .stats
                .push_notification(
                    crate::stats::NotificationKind::Payment,
                    &format!("{} renewed to tier {} via tx {}", subscriber.npub, tier.name, item.tx_id),
                )
                .await
            {
                warn!("failed to push payment notification: {e}");
            }
            updates.push(SubscriptionUpdate {
                npub: subscriber.npub,
                tier: tier.name.clone(),
                expires_at: new_end,
            });
        }
        Ok(updates)
    }

    pub async fn list_notifications(
        &self,
        kind: crate::stats::NotificationKind,
        page_size: i64,
        offset: i64,
    ) -> Result<Vec<crate::stats::Notification>> {
        self.stats.list_notifications(kind, page_size, offset).await
    }

    pub async fn push_notification(&self, kind: crate::stats::NotificationKind, message: &str) -> Result<()> {
        self.stats.push_notification(kind, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let stats = Stats::open("sqlite::memory:").await.unwrap();
        let store = Store::new(substrate, stats, FileTypePolicy::default(), vec![1], vec![]);
        (store, dir)
    }

    #[tokio::test]
    async fn store_event_then_query_roundtrips() {
        let (store, _dir) = test_store().await;
        let e = Event {
            id: "e1".into(),
            pubkey: "p1".into(),
            kind: 1,
            created_at: 100,
            tags: vec![],
            content: "hello".into(),
            sig: "sig".into(),
        };
        store.store_event(e.clone()).await.unwrap();

        let filter = EventFilter { ids: vec!["e1".into()], ..Default::default() };
        let results = store.query_events(&filter).unwrap();
        assert_eq!(results, vec![e]);
    }

    #[tokio::test]
    async fn allowed_users_gate_rejects_non_members() {
        let (store, _dir) = test_store().await;
        store.stats.add_allowed_user("p1").await.unwrap();

        let allowed = Event {
            id: "e1".into(),
            pubkey: "p1".into(),
            kind: 1,
            created_at: 100,
            tags: vec![],
            content: "hello".into(),
            sig: "sig".into(),
        };
        store.store_event(allowed).await.unwrap();

        let blocked = Event {
            id: "e2".into(),
            pubkey: "p2".into(),
            kind: 1,
            created_at: 100,
            tags: vec![],
            content: "hello".into(),
            sig: "sig".into(),
        };
        let err = store.store_event(blocked).await.unwrap_err();
        assert!(matches!(err, crate::StoreError::PolicyRejected(_)));

        let unread = store.stats.unread_notification_count(crate::stats::NotificationKind::Moderation).await.unwrap();
        assert_eq!(unread, 1);
    }

    #[tokio::test]
    async fn process_transactions_is_idempotent_and_emits_subscription_update() {
        let (store, _dir) = test_store().await;
        store.stats.upsert_subscriber(&Subscriber {
            npub: "npub1".into(),
            address: "addr1".into(),
            tier: "none".into(),
            start_date: Utc::now(),
            end_date: Utc::now(),
            last_transaction_id: None,
        }).await.unwrap();

        let tiers = vec![Tier { name: "basic".into(), data_limit_bytes: 1_000_000, price_sats: 1000 }];
        let dir2 = tempdir().unwrap();
        let store = Store::new(
            Substrate::open(dir2.path().to_str().unwrap()).unwrap(),
            store.stats,
            FileTypePolicy::default(),
            vec![1],
            tiers,
        );
        // re-seed subscriber against the fresh store's stats handle
        store.stats.upsert_subscriber(&Subscriber {
            npub: "npub1".into(),
            address: "addr1".into(),
            tier: "none".into(),
            start_date: Utc::now(),
            end_date: Utc::now(),
            last_transaction_id: None,
        }).await.unwrap();

        let item = IncomingTransaction {
            address: "addr1".into(),
            date: Utc::now(),
            output: "addr1".into(),
            value_btc: 0.00002,
            wallet_name: "main".into(),
            tx_id: "tx1".into(),
        };

        let updates = store.process_transactions("main", vec![item.clone()]).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].tier, "basic");

        // redelivering the same transaction is a no-op: no second update.
        let updates2 = store.process_transactions("main", vec![item]).await.unwrap();
        assert!(updates2.is_empty());
    }
}
