//! Bitcoin address pool: a substrate tree `relay_addresses` keyed by
//! address string, mirrored (best-effort) into the statistics store for
//! listing/reporting. The substrate tree is authoritative for allocation —
//! selection, transition, and commit happen under one commit lock, so two
//! concurrent allocations cannot pick the same address (spec.md §5).

use crate::substrate::{Snapshot, Substrate, TreeHandle};
use crate::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TREE_NAME: &str = "relay_addresses";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Available,
    Allocated,
    Used,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub index: i64,
    pub address: String,
    pub wallet_name: String,
    pub status: Status,
    pub allocated_at: Option<DateTime<Utc>>,
    pub npub: Option<String>,
}

impl Address {
    pub fn new_available(index: i64, address: String, wallet_name: String) -> Self {
        Self {
            index,
            address,
            wallet_name,
            status: Status::Available,
            allocated_at: None,
            npub: None,
        }
    }
}

fn decode(bytes: &[u8]) -> Result<Address> {
    Ok(serde_json::from_slice(bytes)?)
}

fn encode(addr: &Address) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(addr)?)
}

/// Accept an incoming address from the wallet sidecar. Rejects a wallet
/// mismatch; idempotently inserts otherwise (same address seen twice is a
/// no-op, not an error).
pub fn stage_save(
    substrate: &Substrate,
    snapshot: &Snapshot,
    configured_wallet: &str,
    index: i64,
    address: &str,
    wallet_name: &str,
) -> Result<Option<TreeHandle>> {
    if wallet_name != configured_wallet {
        return Err(StoreError::PolicyRejected(format!(
            "address {address} belongs to wallet {wallet_name}, not {configured_wallet}"
        )));
    }
    let mut handle = substrate.tree(snapshot, TREE_NAME)?;
    if handle.get(address.as_bytes())?.is_some() {
        return Ok(None);
    }
    let record = Address::new_available(index, address.to_string(), wallet_name.to_string());
    handle.put(address.as_bytes().to_vec(), encode(&record)?);
    Ok(Some(handle))
}

/// Outcome of a successful allocation: the committed substrate handle plus
/// the address record the caller should mirror into the statistics store.
pub struct AllocateOutcome {
    pub handle: TreeHandle,
    pub address: Address,
}

/// Select the first `available` address (cursor order), transition it to
/// `allocated`, and stage the write. Fails `Exhausted` when none are free.
pub fn allocate(substrate: &Substrate, snapshot: &Snapshot, npub: &str, now: DateTime<Utc>) -> Result<AllocateOutcome> {
    let mut handle = substrate.tree(snapshot, TREE_NAME)?;
    let mut found: Option<Address> = None;
    for item in handle.cursor() {
        let (_, bytes) = item?;
        let candidate = decode(&bytes)?;
        if candidate.status == Status::Available {
            found = Some(candidate);
            break;
        }
    }
    let mut record = found.ok_or_else(|| StoreError::Exhausted("no addresses available".to_string()))?;
    record.status = Status::Allocated;
    record.allocated_at = Some(now);
    record.npub = Some(npub.to_string());
    handle.put(record.address.as_bytes().to_vec(), encode(&record)?);
    Ok(AllocateOutcome { handle, address: record })
}

/// Transition an address to `used` once its subscriber's payment has been
/// processed against it. Best-effort lookup; `NotFound` if unknown.
pub fn mark_used(substrate: &Substrate, snapshot: &Snapshot, address: &str) -> Result<TreeHandle> {
    let mut handle = substrate.tree(snapshot, TREE_NAME)?;
    let bytes = handle
        .get(address.as_bytes())?
        .ok_or_else(|| StoreError::NotFound(format!("address {address} not found")))?;
    let mut record = decode(&bytes)?;
    record.status = Status::Used;
    handle.put(address.as_bytes().to_vec(), encode(&record)?);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn wrong_wallet_is_rejected() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();
        let err = stage_save(&substrate, &snap, "main", 0, "addr1", "other").unwrap_err();
        assert!(matches!(err, StoreError::PolicyRejected(_)));
    }

    #[test]
    fn allocate_picks_first_available_and_is_exhausted_when_empty() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let err = allocate(&substrate, &snap, "npubA", Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::Exhausted(_)));

        let handle = stage_save(&substrate, &snap, "main", 0, "addr1", "main").unwrap().unwrap();
        substrate.commit(vec![handle]).unwrap();

        let snap2 = substrate.snapshot();
        let outcome = allocate(&substrate, &snap2, "npubA", Utc::now()).unwrap();
        assert_eq!(outcome.address.status, Status::Allocated);
        assert_eq!(outcome.address.npub.as_deref(), Some("npubA"));
        substrate.commit(vec![outcome.handle]).unwrap();

        let snap3 = substrate.snapshot();
        let err = allocate(&substrate, &snap3, "npubB", Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::Exhausted(_)));
    }
}
