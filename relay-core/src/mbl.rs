//! Master Bucket List: enumerates bucket names by class, since sled itself
//! has no "list trees" operation.

use crate::substrate::{Snapshot, Substrate, TreeHandle};
use crate::Result;

pub const TREE_NAME: &str = "mbl";
pub const CLASS_CACHE: &str = "cache";
pub const CLASS_KINDS: &str = "kinds";

fn key_for(class: &str) -> Vec<u8> {
    format!("mbl_{class}").into_bytes()
}

fn decode(bytes: &[u8]) -> Result<Vec<String>> {
    Ok(serde_json::from_slice(bytes)?)
}

fn encode(names: &[String]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(names)?)
}

/// Idempotently add every name in `tree_names` to the set registered under
/// `class`, in one read-modify-write. Returns a single mutated `mbl` handle
/// when membership actually changed, `None` when every name was already
/// registered (so callers can elide an empty commit).
///
/// Callers that stage more than one cache-bucket registration within the
/// same high-level write must go through this rather than calling
/// `register` once per name: each `register` call reads `mbl_<class>`
/// fresh, so two calls racing on the same key within one commit would
/// compute their `Put` from the same stale base and the later one would
/// silently drop the earlier name (last-writer-wins).
pub fn register_many(
    substrate: &Substrate,
    snapshot: &Snapshot,
    class: &str,
    tree_names: &[String],
) -> Result<Option<TreeHandle>> {
    if tree_names.is_empty() {
        return Ok(None);
    }
    let mut handle = substrate.tree(snapshot, TREE_NAME)?;
    let key = key_for(class);
    let mut names = match handle.get(&key)? {
        Some(bytes) => decode(&bytes)?,
        None => Vec::new(),
    };
    let mut changed = false;
    for tree_name in tree_names {
        if !names.iter().any(|n| n == tree_name) {
            names.push(tree_name.clone());
            changed = true;
        }
    }
    if !changed {
        return Ok(None);
    }
    handle.put(key, encode(&names)?);
    Ok(Some(handle))
}

/// Idempotently add `tree_name` to the set registered under `class`. See
/// `register_many` when a single write touches more than one bucket.
pub fn register(
    substrate: &Substrate,
    snapshot: &Snapshot,
    class: &str,
    tree_name: &str,
) -> Result<Option<TreeHandle>> {
    register_many(substrate, snapshot, class, &[tree_name.to_string()])
}

/// Current set of bucket names registered under `class`.
pub fn list(substrate: &Substrate, snapshot: &Snapshot, class: &str) -> Result<Vec<String>> {
    let handle = substrate.tree(snapshot, TREE_NAME)?;
    match handle.get(&key_for(class))? {
        Some(bytes) => decode(&bytes),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn register_is_idempotent_and_elides_commit() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let h1 = register(&substrate, &snap, CLASS_CACHE, "cache:pdf").unwrap();
        assert!(h1.is_some());
        substrate.commit(vec![h1.unwrap()]).unwrap();

        let snap2 = substrate.snapshot();
        let h2 = register(&substrate, &snap2, CLASS_CACHE, "cache:pdf").unwrap();
        assert!(h2.is_none());

        let names = list(&substrate, &snap2, CLASS_CACHE).unwrap();
        assert_eq!(names, vec!["cache:pdf".to_string()]);
    }

    #[test]
    fn register_many_merges_names_in_one_commit() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let names = vec!["cache:author1".to_string(), "cache:pdf".to_string()];
        let handle = register_many(&substrate, &snap, CLASS_CACHE, &names).unwrap().unwrap();
        substrate.commit(vec![handle]).unwrap();

        let snap2 = substrate.snapshot();
        let registered = list(&substrate, &snap2, CLASS_CACHE).unwrap();
        assert_eq!(registered, names, "both names must survive a single merged commit");
    }
}
