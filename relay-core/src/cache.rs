//! Inverted-list cache layer. `(bucket, key)` maps to a deduplicated,
//! insertion-ordered list of hashes, stored at `cache:<bucket>`/`key`.
//!
//! `add` never commits by itself: it returns the cache tree handle it
//! touched, or `None` if `hash` was already a member, so a caller can fold
//! it into one high-level atomic commit alongside primary data. `add` does
//! not register the bucket in the MBL itself — a write that calls `add`
//! against more than one bucket must collect every name returned by
//! `tree_name` and register them together through `mbl::register_many`, so
//! the commit stages at most one `mbl` handle for that write.

use crate::substrate::{Snapshot, Substrate, TreeHandle};
use crate::Result;
use tracing::debug;

pub fn tree_name(bucket: &str) -> String {
    format!("cache:{bucket}")
}

fn decode(bytes: &[u8]) -> Result<Vec<String>> {
    Ok(serde_json::from_slice(bytes)?)
}

fn encode(hashes: &[String]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(hashes)?)
}

/// Append `hash` to the list at `(bucket, key)` if not already present.
/// Returns the mutated cache tree handle, or `None` if `hash` was already a
/// member (duplicate `add` leaves list and commit semantics unchanged).
pub fn add(
    substrate: &Substrate,
    snapshot: &Snapshot,
    bucket: &str,
    key: &str,
    hash: &str,
) -> Result<Option<TreeHandle>> {
    let name = tree_name(bucket);
    let mut cache_tree = substrate.tree(snapshot, &name)?;
    let key_bytes = key.as_bytes();

    let mut hashes = match cache_tree.get(key_bytes)? {
        Some(bytes) => decode(&bytes)?,
        None => Vec::new(),
    };

    if hashes.iter().any(|h| h == hash) {
        debug!("cache.add no-op: {hash} already in {name}/{key}");
        return Ok(None);
    }

    hashes.push(hash.to_string());
    cache_tree.put(key_bytes.to_vec(), encode(&hashes)?);
    Ok(Some(cache_tree))
}

/// Current list at `(bucket, key)`, or empty when absent. Cache-lookup
/// failures are swallowed by the caller's fallback to a primary scan, not
/// surfaced here as errors — an absent key is simply an empty list.
pub fn get(substrate: &Substrate, snapshot: &Snapshot, bucket: &str, key: &str) -> Result<Vec<String>> {
    let cache_tree = substrate.tree(snapshot, &tree_name(bucket))?;
    match cache_tree.get(key.as_bytes())? {
        Some(bytes) => decode(&bytes),
        None => Ok(Vec::new()),
    }
}

/// Every hash registered under `bucket`, across all keys, in key-cursor
/// order. Used by media listing, which browses a whole file-type bucket
/// rather than one author's slice of it.
pub fn list_all(substrate: &Substrate, snapshot: &Snapshot, bucket: &str) -> Result<Vec<String>> {
    let cache_tree = substrate.tree(snapshot, &tree_name(bucket))?;
    let mut all = Vec::new();
    for item in cache_tree.cursor() {
        let (_, bytes) = item?;
        all.extend(decode(&bytes)?);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_dedups_and_preserves_order() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let handle = add(&substrate, &snap, "pdf", "author1", "hash-a").unwrap().unwrap();
        substrate.commit(vec![handle]).unwrap();
        let snap = substrate.snapshot();
        let handle = add(&substrate, &snap, "pdf", "author1", "hash-b").unwrap().unwrap();
        substrate.commit(vec![handle]).unwrap();
        let snap = substrate.snapshot();
        // duplicate add: no handle, list unchanged
        let handle = add(&substrate, &snap, "pdf", "author1", "hash-a").unwrap();
        assert!(handle.is_none());

        let list = get(&substrate, &snap, "pdf", "author1").unwrap();
        assert_eq!(list, vec!["hash-a".to_string(), "hash-b".to_string()]);
    }

    #[test]
    fn get_on_absent_key_is_empty() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();
        assert_eq!(get(&substrate, &snap, "pdf", "nobody").unwrap(), Vec::<String>::new());
    }
}
