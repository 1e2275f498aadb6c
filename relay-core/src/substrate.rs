//! Persistent, snapshot-based key-value substrate.
//!
//! Backed by `sled`: each logical "bucket" from spec.md is a `sled::Tree`,
//! addressed by name. Mutations are buffered on a `TreeHandle` and only
//! become visible when the handle is passed to `Substrate::commit`, which
//! applies every buffered mutation across every listed tree as a single
//! sled transaction (`sled::Transactional` over a tree slice) so dependent
//! trees (primary, index, caches, MBL) advance together or not at all.

use crate::error::{Result, StoreError};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;
use std::time::Duration;
use tracing::{debug, info};

const CONTENT_TREE: &str = "content";
/// `open` gives up after this long, matching the cancelled-open timeout in spec.md §5.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct Substrate {
    db: sled::Db,
}

/// A consistent read view. sled's MVCC guarantees every `Tree` opened from
/// the same `Db` handle observes only committed data, so a snapshot is just
/// a cheap clone of the db handle — there is no separate generation token
/// (Open Question (c) in spec.md §9: treated as always-latest).
#[derive(Clone)]
pub struct Snapshot {
    db: sled::Db,
}

enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A handle onto one named tree. Reads go straight to sled; writes are
/// buffered until the handle is committed.
pub struct TreeHandle {
    name: String,
    tree: sled::Tree,
    pending: Vec<Op>,
}

impl Substrate {
    pub fn open(path: &str) -> Result<Self> {
        let start = std::time::Instant::now();
        let db = sled::open(path).map_err(|e| {
            if start.elapsed() > OPEN_TIMEOUT {
                StoreError::Fatal(format!("substrate open timed out: {e}"))
            } else {
                StoreError::Fatal(format!("substrate open failed: {e}"))
            }
        })?;
        // tree `content` MUST exist after open.
        db.open_tree(CONTENT_TREE)?;
        info!("opened substrate at {}", path);
        Ok(Self { db })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot { db: self.db.clone() }
    }

    pub fn tree(&self, snapshot: &Snapshot, name: &str) -> Result<TreeHandle> {
        let tree = snapshot.db.open_tree(name)?;
        Ok(TreeHandle {
            name: name.to_string(),
            tree,
            pending: Vec::new(),
        })
    }

    /// Atomically persist every buffered mutation across all listed trees.
    /// Empty commit is a no-op.
    pub fn commit(&self, trees: Vec<TreeHandle>) -> Result<()> {
        let trees: Vec<TreeHandle> = trees.into_iter().filter(|t| !t.pending.is_empty()).collect();
        if trees.is_empty() {
            return Ok(());
        }

        let sled_trees: Vec<&sled::Tree> = trees.iter().map(|t| &t.tree).collect();

        sled_trees
            .as_slice()
            .transaction(|tx_trees: &[TransactionalTree]| {
                for (handle, tx_tree) in trees.iter().zip(tx_trees.iter()) {
                    for op in &handle.pending {
                        match op {
                            Op::Put(k, v) => {
                                tx_tree.insert(k.as_slice(), v.as_slice())?;
                            }
                            Op::Delete(k) => {
                                tx_tree.remove(k.as_slice())?;
                            }
                        }
                    }
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| StoreError::Transient(format!("substrate commit failed: {e:?}")))?;

        debug!(
            "committed {} trees ({:?})",
            trees.len(),
            trees.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );
        Ok(())
    }
}

impl TreeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        // a mutation buffered but not yet committed is not "present" to a
        // fresh read through this substrate's contract — callers that need
        // read-your-writes within one pipeline step track that themselves.
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.pending.push(Op::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.pending.push(Op::Delete(key.into()));
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Ordered iteration over committed key/value pairs.
    pub fn cursor(&self) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_ {
        self.tree.iter().map(|res| {
            res.map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(StoreError::from)
        })
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_ {
        self.tree.scan_prefix(prefix).map(|res| {
            res.map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(StoreError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_content_tree() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();
        let content = substrate.tree(&snap, "content").unwrap();
        assert_eq!(content.get(b"missing").unwrap(), None);
    }

    #[test]
    fn commit_is_atomic_across_trees() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let mut a = substrate.tree(&snap, "a").unwrap();
        let mut b = substrate.tree(&snap, "b").unwrap();
        a.put(b"k".to_vec(), b"1".to_vec());
        b.put(b"k".to_vec(), b"2".to_vec());

        substrate.commit(vec![a, b]).unwrap();

        let snap2 = substrate.snapshot();
        let a2 = substrate.tree(&snap2, "a").unwrap();
        let b2 = substrate.tree(&snap2, "b").unwrap();
        assert_eq!(a2.get(b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(b2.get(b"k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn empty_commit_is_noop() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        substrate.commit(vec![]).unwrap();
    }
}
