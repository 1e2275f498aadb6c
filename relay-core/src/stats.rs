//! Statistics store: a relational-style sidecar (sqlite via `sqlx`) holding
//! file metadata, per-kind size rows, user profiles, the login triple,
//! Bitcoin bookkeeping, and notification streams. Never part of the
//! substrate's atomic commit — failures here are logged and non-fatal,
//! per spec.md §7.

use crate::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileTypeCategory {
    Photos,
    Videos,
    Audio,
    Misc,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FileInfo {
    pub root: String,
    pub hash: String,
    pub file_name: String,
    pub mime_type: String,
    pub leaf_count: i64,
    pub size: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct KindRow {
    pub kind_number: i64,
    pub event_id: String,
    pub size: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserProfile {
    pub pubkey: String,
    pub has_lightning_address: bool,
    pub has_dht_key: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub pubkey: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserChallenge {
    pub pubkey: String,
    pub challenge: String,
    pub challenge_hash: String,
    pub created_at: DateTime<Utc>,
    pub expired: bool,
}

impl UserChallenge {
    pub const VALID_FOR: chrono::Duration = chrono::Duration::minutes(3);

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.expired && now - self.created_at < Self::VALID_FOR
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ActiveToken {
    pub token: String,
    pub pubkey: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BitcoinRate {
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WalletBalance {
    pub wallet_name: String,
    pub balance_sats: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WalletTransaction {
    pub address: String,
    pub date: DateTime<Utc>,
    pub output: String,
    pub value: f64,
    pub wallet_name: String,
    pub tx_id: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct PendingTransaction {
    pub tx_id: String,
    pub address: String,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressStatus {
    Available,
    Allocated,
    Used,
}

impl AddressStatus {
    fn as_str(self) -> &'static str {
        match self {
            AddressStatus::Available => "available",
            AddressStatus::Allocated => "allocated",
            AddressStatus::Used => "used",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Subscriber {
    pub npub: String,
    pub address: String,
    pub tier: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub last_transaction_id: Option<String>,
}

impl Subscriber {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.end_date
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionPeriod {
    pub transaction_id: String,
    pub npub: String,
    pub tier: String,
    pub storage_limit_bytes: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub payment_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Moderation,
    Payment,
    Report,
}

impl NotificationKind {
    fn table(self) -> &'static str {
        match self {
            NotificationKind::Moderation => "moderation_notifications",
            NotificationKind::Payment => "payment_notifications",
            NotificationKind::Report => "report_notifications",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Notification {
    pub id: i64,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Stats {
    pool: SqlitePool,
}

impl Stats {
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        let stats = Self { pool };
        stats.migrate().await?;
        Ok(stats)
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS file_info (
                root TEXT PRIMARY KEY, hash TEXT NOT NULL, file_name TEXT NOT NULL,
                mime_type TEXT NOT NULL, leaf_count INTEGER NOT NULL, size REAL NOT NULL,
                timestamp TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS kind_rows (
                kind_number INTEGER NOT NULL, event_id TEXT PRIMARY KEY,
                size REAL NOT NULL, timestamp TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS user_profiles (
                pubkey TEXT PRIMARY KEY, has_lightning_address INTEGER NOT NULL,
                has_dht_key INTEGER NOT NULL, timestamp TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT, pubkey TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS user_challenges (
                pubkey TEXT PRIMARY KEY, challenge TEXT NOT NULL, challenge_hash TEXT NOT NULL,
                created_at TEXT NOT NULL, expired INTEGER NOT NULL)",
            "CREATE TABLE IF NOT EXISTS active_tokens (
                token TEXT PRIMARY KEY, pubkey TEXT NOT NULL, expires_at TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS bitcoin_rates (
                id INTEGER PRIMARY KEY AUTOINCREMENT, rate REAL NOT NULL, timestamp TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS wallet_balances (
                id INTEGER PRIMARY KEY AUTOINCREMENT, wallet_name TEXT NOT NULL,
                balance_sats INTEGER NOT NULL, timestamp TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS wallet_transactions (
                address TEXT NOT NULL, date TEXT NOT NULL, output TEXT NOT NULL,
                value REAL NOT NULL, wallet_name TEXT NOT NULL, tx_id TEXT NOT NULL,
                PRIMARY KEY (address, date, output, value))",
            "CREATE TABLE IF NOT EXISTS pending_transactions (
                tx_id TEXT PRIMARY KEY, address TEXT NOT NULL, amount REAL NOT NULL,
                created_at TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS addresses (
                idx INTEGER NOT NULL, address TEXT PRIMARY KEY, wallet_name TEXT NOT NULL,
                status TEXT NOT NULL, allocated_at TEXT, npub TEXT)",
            "CREATE TABLE IF NOT EXISTS subscribers (
                npub TEXT PRIMARY KEY, address TEXT NOT NULL, tier TEXT NOT NULL,
                start_date TEXT NOT NULL, end_date TEXT NOT NULL, last_transaction_id TEXT)",
            "CREATE TABLE IF NOT EXISTS subscription_periods (
                transaction_id TEXT PRIMARY KEY, npub TEXT NOT NULL, tier TEXT NOT NULL,
                storage_limit_bytes INTEGER NOT NULL, start_date TEXT NOT NULL,
                end_date TEXT NOT NULL, payment_amount REAL NOT NULL)",
            "CREATE TABLE IF NOT EXISTS moderation_notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT, message TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0, created_at TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS payment_notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT, message TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0, created_at TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS report_notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT, message TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0, created_at TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS allowed_users (pubkey TEXT PRIMARY KEY)",
            "CREATE TABLE IF NOT EXISTS settings_groups (
                group_name TEXT PRIMARY KEY, payload TEXT NOT NULL)",
        ];
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn insert_file_info(&self, info: &FileInfo) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO file_info (root, hash, file_name, mime_type, leaf_count, size, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&info.root)
        .bind(&info.hash)
        .bind(&info.file_name)
        .bind(&info.mime_type)
        .bind(info.leaf_count as i64)
        .bind(info.size)
        .bind(info.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a `KindRow` only when `kind` is in the caller-supplied
    /// whitelist (spec.md §4.5 step 7).
    pub async fn insert_kind_row_if_whitelisted(
        &self,
        whitelist: &[u64],
        kind: u64,
        event_id: &str,
        size_mb: f64,
    ) -> Result<()> {
        if !whitelist.contains(&kind) {
            return Ok(());
        }
        sqlx::query(
            "INSERT OR REPLACE INTO kind_rows (kind_number, event_id, size, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(kind as i64)
        .bind(event_id)
        .bind(size_mb)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_kind_row(&self, event_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM kind_rows WHERE event_id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Upsert a profile from kind-0 event content fields `nip05`/`dht-key`.
    pub async fn upsert_user_profile(&self, pubkey: &str, content_json: &str) -> Result<()> {
        let parsed: serde_json::Value = serde_json::from_str(content_json).unwrap_or_default();
        let has_lightning = parsed.get("nip05").and_then(|v| v.as_str()).map(|s| !s.is_empty()).unwrap_or(false);
        let has_dht = parsed.get("dht-key").and_then(|v| v.as_str()).map(|s| !s.is_empty()).unwrap_or(false);
        sqlx::query(
            "INSERT OR REPLACE INTO user_profiles (pubkey, has_lightning_address, has_dht_key, timestamp)
             VALUES (?, ?, ?, ?)",
        )
        .bind(pubkey)
        .bind(has_lightning)
        .bind(has_dht)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn kinds_summary(&self) -> Result<Vec<(i64, i64, f64)>> {
        let rows: Vec<(i64, i64, f64)> = sqlx::query_as(
            "SELECT kind_number, COUNT(*) as cnt, COALESCE(SUM(size), 0.0) as total
             FROM kind_rows GROUP BY kind_number",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn kind_trend_12mo(&self, kind: u64) -> Result<Vec<(String, f64)>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT strftime('%Y-%m', timestamp) as month, COALESCE(SUM(size), 0.0) as total
             FROM kind_rows WHERE kind_number = ?
             GROUP BY month ORDER BY month DESC LIMIT 12",
        )
        .bind(kind as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn monthly_storage_gb(&self) -> Result<Vec<(String, f64)>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT strftime('%Y-%m', timestamp) as month, COALESCE(SUM(size), 0.0) / 1000.0 as gb
             FROM file_info GROUP BY month ORDER BY month",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Monthly (notes_gb, media_gb) pair: notes are kind-1 event rows, media
    /// is everything recorded in `file_info`.
    pub async fn monthly_notes_vs_media_gb(&self) -> Result<Vec<(String, f64, f64)>> {
        let notes: Vec<(String, f64)> = sqlx::query_as(
            "SELECT strftime('%Y-%m', timestamp) as month, COALESCE(SUM(size), 0.0) / 1000.0 as gb
             FROM kind_rows WHERE kind_number = 1 GROUP BY month",
        )
        .fetch_all(&self.pool)
        .await?;
        let media = self.monthly_storage_gb().await?;

        let mut months: Vec<String> = notes.iter().map(|(m, _)| m.clone()).collect();
        months.extend(media.iter().map(|(m, _)| m.clone()));
        months.sort();
        months.dedup();

        Ok(months
            .into_iter()
            .map(|month| {
                let notes_gb = notes.iter().find(|(m, _)| *m == month).map(|(_, g)| *g).unwrap_or(0.0);
                let media_gb = media.iter().find(|(m, _)| *m == month).map(|(_, g)| *g).unwrap_or(0.0);
                (month, notes_gb, media_gb)
            })
            .collect())
    }

    /// Six-month histogram of profile counts vs. lightning/DHT adoption.
    pub async fn profile_histogram_6mo(&self) -> Result<Vec<(String, i64, i64, i64)>> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            "SELECT strftime('%Y-%m', timestamp) as month, COUNT(*) as total,
                    SUM(has_lightning_address) as lightning, SUM(has_dht_key) as dht
             FROM user_profiles GROUP BY month ORDER BY month DESC LIMIT 6",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Save a new Bitcoin rate row, skipped when equal to the latest.
    pub async fn save_bitcoin_rate(&self, rate: f64) -> Result<()> {
        let latest: Option<(f64,)> = sqlx::query_as(
            "SELECT rate FROM bitcoin_rates ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        if latest.map(|(r,)| r) == Some(rate) {
            return Ok(());
        }
        sqlx::query("INSERT INTO bitcoin_rates (rate, timestamp) VALUES (?, ?)")
            .bind(rate)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn latest_bitcoin_rate(&self) -> Result<BitcoinRate> {
        sqlx::query_as("SELECT rate, timestamp FROM bitcoin_rates ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("no bitcoin rate recorded".to_string()))
    }

    pub async fn latest_wallet_balance(&self, wallet_name: &str) -> Result<WalletBalance> {
        sqlx::query_as(
            "SELECT wallet_name, balance_sats, timestamp FROM wallet_balances
             WHERE wallet_name = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(wallet_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("no balance for wallet {wallet_name}")))
    }

    pub async fn record_wallet_balance(&self, wallet_name: &str, balance_sats: i64) -> Result<()> {
        sqlx::query("INSERT INTO wallet_balances (wallet_name, balance_sats, timestamp) VALUES (?, ?, ?)")
            .bind(wallet_name)
            .bind(balance_sats)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Idempotent insert: a duplicate `(address, date, output, value)` is a
    /// no-op and reports `false` so the caller can skip downstream work.
    pub async fn record_wallet_transaction(&self, tx: &WalletTransaction) -> Result<bool> {
        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT tx_id FROM wallet_transactions WHERE address = ? AND date = ? AND output = ? AND value = ?",
        )
        .bind(&tx.address)
        .bind(tx.date)
        .bind(&tx.output)
        .bind(tx.value)
        .fetch_optional(&self.pool)
        .await?;
        if existing.is_some() {
            return Ok(false);
        }
        sqlx::query(
            "INSERT INTO wallet_transactions (address, date, output, value, wallet_name, tx_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&tx.address)
        .bind(tx.date)
        .bind(&tx.output)
        .bind(tx.value)
        .bind(&tx.wallet_name)
        .bind(&tx.tx_id)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    pub async fn delete_pending_transaction(&self, tx_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM pending_transactions WHERE tx_id = ?")
            .bind(tx_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_pending_transaction(&self, pending: &PendingTransaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO pending_transactions (tx_id, address, amount, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&pending.tx_id)
        .bind(&pending.address)
        .bind(pending.amount)
        .bind(pending.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_pending_transactions(&self) -> Result<Vec<PendingTransaction>> {
        let rows = sqlx::query_as("SELECT tx_id, address, amount, created_at FROM pending_transactions ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// RBF/CPFP-style replacement: fails when the original is unknown.
    pub async fn replace_pending_transaction(
        &self,
        old_tx_id: &str,
        new: &PendingTransaction,
    ) -> Result<()> {
        let existing: Option<(String,)> = sqlx::query_as("SELECT tx_id FROM pending_transactions WHERE tx_id = ?")
            .bind(old_tx_id)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_none() {
            return Err(StoreError::NotFound(format!("pending tx {old_tx_id} not found")));
        }
        self.delete_pending_transaction(old_tx_id).await?;
        self.insert_pending_transaction(new).await?;
        Ok(())
    }

    pub async fn push_notification(&self, kind: NotificationKind, message: &str) -> Result<()> {
        let table = kind.table();
        let sql = format!("INSERT INTO {table} (message, read, created_at) VALUES (?, 0, ?)");
        sqlx::query(&sql).bind(message).bind(Utc::now()).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn list_notifications(
        &self,
        kind: NotificationKind,
        page_size: i64,
        offset: i64,
    ) -> Result<Vec<Notification>> {
        let table = kind.table();
        let sql = format!(
            "SELECT id, message, read, created_at FROM {table} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query_as(&sql).bind(page_size).bind(offset).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn unread_notification_count(&self, kind: NotificationKind) -> Result<i64> {
        let table = kind.table();
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE read = 0");
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn is_allowed_user(&self, pubkey: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT pubkey FROM allowed_users WHERE pubkey = ?")
            .bind(pubkey)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// An empty allow-list means moderation is off (every pubkey may
    /// publish); a non-empty one makes it an allow-list gate.
    pub async fn allowed_users_active(&self) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM allowed_users").fetch_one(&self.pool).await?;
        Ok(count > 0)
    }

    pub async fn add_allowed_user(&self, pubkey: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO allowed_users (pubkey) VALUES (?)")
            .bind(pubkey)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn any_user_exists(&self) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users").fetch_one(&self.pool).await?;
        Ok(count > 0)
    }

    pub async fn create_user(&self, pubkey: &str) -> Result<()> {
        sqlx::query("INSERT INTO users (pubkey, created_at) VALUES (?, ?)")
            .bind(pubkey)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Conflict("user already exists".to_string())
                }
                other => StoreError::from(other),
            })?;
        Ok(())
    }

    pub async fn save_challenge(&self, pubkey: &str, challenge: &str, challenge_hash: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO user_challenges (pubkey, challenge, challenge_hash, created_at, expired)
             VALUES (?, ?, ?, ?, 0)",
        )
        .bind(pubkey)
        .bind(challenge)
        .bind(challenge_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_challenge(&self, pubkey: &str) -> Result<UserChallenge> {
        sqlx::query_as(
            "SELECT pubkey, challenge, challenge_hash, created_at, expired FROM user_challenges WHERE pubkey = ?",
        )
        .bind(pubkey)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("no challenge for {pubkey}")))
    }

    pub async fn expire_challenge(&self, pubkey: &str) -> Result<()> {
        sqlx::query("UPDATE user_challenges SET expired = 1 WHERE pubkey = ?")
            .bind(pubkey)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_active_token(&self, token: &str, pubkey: &str, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO active_tokens (token, pubkey, expires_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(pubkey)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_active_token(&self, token: &str) -> Result<bool> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as("SELECT expires_at FROM active_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(matches!(row, Some((exp,)) if exp > Utc::now()))
    }

    pub async fn invalidate_tokens_for(&self, pubkey: &str) -> Result<()> {
        sqlx::query("DELETE FROM active_tokens WHERE pubkey = ?")
            .bind(pubkey)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Idempotent insert of an address row; mirrors the substrate
    /// `relay_addresses` tree that `address::allocate` treats as authoritative.
    pub async fn insert_address_row(&self, address: &str, wallet_name: &str) -> Result<()> {
        let (next_idx,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(idx), -1) + 1 FROM addresses")
            .fetch_one(&self.pool)
            .await?;
        sqlx::query(
            "INSERT OR IGNORE INTO addresses (idx, address, wallet_name, status, allocated_at, npub)
             VALUES (?, ?, ?, 'available', NULL, NULL)",
        )
        .bind(next_idx)
        .bind(address)
        .bind(wallet_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Keeps the mirror row in sync after an allocation is committed against
    /// the substrate tree. Best-effort: a failure here is logged, not fatal.
    pub async fn mark_address_allocated(&self, address: &str, npub: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE addresses SET status = ?, allocated_at = ?, npub = ? WHERE address = ?",
        )
        .bind(AddressStatus::Allocated.as_str())
        .bind(at)
        .bind(npub)
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mirrors an address's transition to `used` once a payment has been
    /// processed against it. Best-effort: a failure here is logged, not fatal.
    pub async fn mark_address_used(&self, address: &str) -> Result<()> {
        sqlx::query("UPDATE addresses SET status = ? WHERE address = ?")
            .bind(AddressStatus::Used.as_str())
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_subscriber(&self, npub: &str) -> Result<Option<Subscriber>> {
        let row = sqlx::query_as(
            "SELECT npub, address, tier, start_date, end_date, last_transaction_id
             FROM subscribers WHERE npub = ?",
        )
        .bind(npub)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_subscriber_by_address(&self, address: &str) -> Result<Option<Subscriber>> {
        let row = sqlx::query_as(
            "SELECT npub, address, tier, start_date, end_date, last_transaction_id
             FROM subscribers WHERE address = ?",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert_subscriber(&self, sub: &Subscriber) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscribers (npub, address, tier, start_date, end_date, last_transaction_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(npub) DO UPDATE SET
                address = excluded.address, tier = excluded.tier,
                start_date = excluded.start_date, end_date = excluded.end_date,
                last_transaction_id = excluded.last_transaction_id",
        )
        .bind(&sub.npub)
        .bind(&sub.address)
        .bind(&sub.tier)
        .bind(sub.start_date)
        .bind(sub.end_date)
        .bind(&sub.last_transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Immutable receipt; never updated or deleted once written.
    pub async fn insert_subscription_period(&self, period: &SubscriptionPeriod) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscription_periods
                (transaction_id, npub, tier, storage_limit_bytes, start_date, end_date, payment_amount)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&period.transaction_id)
        .bind(&period.npub)
        .bind(&period.tier)
        .bind(period.storage_limit_bytes)
        .bind(period.start_date)
        .bind(period.end_date)
        .bind(period.payment_amount)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_setting_group(&self, group: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT payload FROM settings_groups WHERE group_name = ?")
            .bind(group)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(p,)| p))
    }

    pub async fn set_setting_group(&self, group: &str, payload: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings_groups (group_name, payload) VALUES (?, ?)
             ON CONFLICT(group_name) DO UPDATE SET payload = excluded.payload",
        )
        .bind(group)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memdb() -> Stats {
        Stats::open("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn bitcoin_rate_dedup() {
        let stats = memdb().await;
        stats.save_bitcoin_rate(62345.10).await.unwrap();
        stats.save_bitcoin_rate(62345.10).await.unwrap();
        stats.save_bitcoin_rate(62345.11).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bitcoin_rates")
            .fetch_one(&stats.pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn wallet_transaction_is_idempotent() {
        let stats = memdb().await;
        let tx = WalletTransaction {
            address: "addr1".into(),
            date: Utc::now(),
            output: "addr1".into(),
            value: 0.001,
            wallet_name: "main".into(),
            tx_id: "tx1".into(),
        };
        assert!(stats.record_wallet_transaction(&tx).await.unwrap());
        assert!(!stats.record_wallet_transaction(&tx).await.unwrap());
    }

    #[tokio::test]
    async fn signup_rejects_second_user() {
        let stats = memdb().await;
        stats.create_user("p1").await.unwrap();
        let err = stats.create_user("p1").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
