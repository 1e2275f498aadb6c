//! Unchunked opaque-binary upload surface, layered directly on the content
//! store.

use crate::cache;
use crate::content;
use crate::mbl;
use crate::substrate::{Snapshot, Substrate, TreeHandle};
use crate::{Result, StoreError};

pub const BLOSSOM_BUCKET: &str = "blossom";

pub fn store_blob(
    substrate: &Substrate,
    snapshot: &Snapshot,
    data: &[u8],
    hash: &[u8],
    pubkey: &str,
) -> Result<Vec<TreeHandle>> {
    let mut handles = vec![content::put(substrate, snapshot, hash, data)?];
    if let Some(h) = cache::add(substrate, snapshot, pubkey, BLOSSOM_BUCKET, &hex::encode(hash))? {
        handles.push(h);
        if let Some(mbl_handle) = mbl::register(substrate, snapshot, mbl::CLASS_CACHE, &cache::tree_name(pubkey))? {
            handles.push(mbl_handle);
        }
    }
    Ok(handles)
}

pub fn get_blob(substrate: &Substrate, snapshot: &Snapshot, hex_hash: &str) -> Result<Vec<u8>> {
    let hash = hex::decode(hex_hash).map_err(|e| StoreError::InvalidInput(format!("bad hex: {e}")))?;
    content::get(substrate, snapshot, &hash)
}

/// Deletes only the `content` row; the `blossom` cache entry is left
/// dangling intentionally (readers tolerate missing primaries).
pub fn delete_blob(substrate: &Substrate, snapshot: &Snapshot, hex_hash: &str) -> Result<TreeHandle> {
    let hash = hex::decode(hex_hash).map_err(|e| StoreError::InvalidInput(format!("bad hex: {e}")))?;
    content::delete(substrate, snapshot, &hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::Digest;
    use tempfile::tempdir;

    #[test]
    fn store_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let data = b"opaque bytes";
        let hash = sha2::Sha256::digest(data).to_vec();

        let handles = store_blob(&substrate, &snap, data, &hash, "pub1").unwrap();
        substrate.commit(handles).unwrap();

        let snap2 = substrate.snapshot();
        let fetched = get_blob(&substrate, &snap2, &hex::encode(&hash)).unwrap();
        assert_eq!(fetched, data);
    }
}
