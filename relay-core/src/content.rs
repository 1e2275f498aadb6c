//! Content store: the single point of truth for raw bytes, addressed by
//! `ContentHash`. Deduplicates chunked-tree leaf content and opaque blobs
//! alike — nothing outside this tree stores bytes above a small inline
//! limit; everyone else resolves a `ContentHash` lazily.

use crate::substrate::{Snapshot, Substrate, TreeHandle};
use crate::{Result, StoreError};

pub const TREE_NAME: &str = "content";

/// Stage a `(content_hash -> bytes)` write. Same hash implies same bytes by
/// construction, so re-inserting an existing hash is harmless — callers are
/// not required to check first.
pub fn put(substrate: &Substrate, snapshot: &Snapshot, content_hash: &[u8], bytes: &[u8]) -> Result<TreeHandle> {
    let mut handle = substrate.tree(snapshot, TREE_NAME)?;
    handle.put(content_hash.to_vec(), bytes.to_vec());
    Ok(handle)
}

/// Fetch bytes for `content_hash`. Empty/absent resolves to `NotFound`.
pub fn get(substrate: &Substrate, snapshot: &Snapshot, content_hash: &[u8]) -> Result<Vec<u8>> {
    let handle = substrate.tree(snapshot, TREE_NAME)?;
    match handle.get(content_hash)? {
        Some(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(StoreError::NotFound(format!(
            "content {} not found",
            hex::encode(content_hash)
        ))),
    }
}

/// Remove a content row. Per spec.md §4.9 (deletion without GC), callers
/// MUST NOT use this to opportunistically collect referenced content — it
/// exists only for explicit blob deletion, which tolerates dangling cache
/// entries.
pub fn delete(substrate: &Substrate, snapshot: &Snapshot, content_hash: &[u8]) -> Result<TreeHandle> {
    let mut handle = substrate.tree(snapshot, TREE_NAME)?;
    handle.delete(content_hash.to_vec());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let handle = put(&substrate, &snap, b"hash-c", b"hello world").unwrap();
        substrate.commit(vec![handle]).unwrap();

        let snap2 = substrate.snapshot();
        assert_eq!(get(&substrate, &snap2, b"hash-c").unwrap(), b"hello world".to_vec());
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();
        assert!(matches!(get(&substrate, &snap, b"nope"), Err(StoreError::NotFound(_))));
    }
}
