//! Scionic store: chunked Merkle-tree ("DAG") leaves, content deduplication,
//! and the derived root→bucket / author / application-path indexes.

use crate::cache;
use crate::content;
use crate::mbl;
use crate::stats::FileTypeCategory;
use crate::substrate::{Snapshot, Substrate, TreeHandle};
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

pub const SCIONIC_INDEX_TREE: &str = "scionic_index";
/// Fixed chunk size used to estimate on-disk size from `leaf_count` when a
/// root leaf has no inline content of its own. Not configurable per
/// spec.md; chosen to match the teacher's own fixed constants (e.g.
/// `EPOCH_SIZE`) rather than threading a magic number through call sites.
pub const CHUNK_SIZE_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafType {
    File,
    Directory,
    Chunk,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagLeaf {
    pub hash: String,
    #[serde(rename = "type")]
    pub leaf_type: LeafType,
    pub item_name: String,
    pub content_hash: Option<Vec<u8>>,
    /// Only set transiently on write; stripped before the leaf is encoded
    /// and restored on read when `include_content` is requested.
    pub content: Option<Vec<u8>>,
    pub leaf_count: u64,
    pub additional_data: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagLeafData {
    pub leaf: DagLeaf,
    pub public_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTypeMode {
    Smart,
    Unlimited,
}

/// Allow/block lists driving bucket-category classification at root write.
/// Per spec.md §9 Open Question (a): `Smart` and `Unlimited` are accepted as
/// distinct configuration values but do not diverge in behavior here,
/// matching what the source relay actually does.
#[derive(Debug, Clone, Default)]
pub struct FileTypePolicy {
    pub mode: Option<FileTypeMode>,
    pub photos: Vec<String>,
    pub videos: Vec<String>,
    pub audio: Vec<String>,
    pub blocked: Vec<String>,
}

impl FileTypePolicy {
    pub fn classify(&self, kind_name: &str) -> Result<FileTypeCategory> {
        let kind_name = kind_name.to_lowercase();
        if self.blocked.iter().any(|b| b.to_lowercase() == kind_name) {
            return Err(StoreError::PolicyRejected(format!(
                "file type .{kind_name} is blocked"
            )));
        }
        if self.photos.iter().any(|e| e.to_lowercase() == kind_name) {
            return Ok(FileTypeCategory::Photos);
        }
        if self.videos.iter().any(|e| e.to_lowercase() == kind_name) {
            return Ok(FileTypeCategory::Videos);
        }
        if self.audio.iter().any(|e| e.to_lowercase() == kind_name) {
            return Ok(FileTypeCategory::Audio);
        }
        Ok(FileTypeCategory::Misc)
    }
}

/// Extension-or-type-derived bucket name for a leaf.
pub fn bucket_for(item_name: &str, leaf_type: LeafType) -> String {
    if let Some(idx) = item_name.find('.') {
        item_name[idx + 1..].to_lowercase()
    } else if leaf_type == LeafType::Directory {
        "directory".to_string()
    } else {
        "file".to_string()
    }
}

fn kind_name_for(item_name: &str) -> String {
    item_name
        .rfind('.')
        .map(|idx| item_name[idx + 1..].to_lowercase())
        .unwrap_or_else(|| "misc".to_string())
}

fn app_and_path(value: &str) -> (String, String) {
    let app = value.split('/').next().unwrap_or(value).to_string();
    (app, value.to_string())
}

/// Resolve the bucket a root hash's leaves live in.
pub fn resolve_bucket(substrate: &Substrate, snapshot: &Snapshot, root_hash: &str) -> Result<String> {
    let index = substrate.tree(snapshot, SCIONIC_INDEX_TREE)?;
    match index.get(root_hash.as_bytes())? {
        Some(bytes) => Ok(String::from_utf8_lossy(&bytes).to_string()),
        None => Err(StoreError::NotFound(format!("unknown root {root_hash}"))),
    }
}

/// The set of staged mutations plus book-keeping a single `store_leaf` call
/// produces, handed back so the write pipeline can commit them in one step
/// and, independently, record statistics.
pub struct StoreLeafOutcome {
    pub handles: Vec<TreeHandle>,
    pub file_info: Option<crate::stats::FileInfo>,
}

/// Store one DAG leaf. `policy` is only consulted when `leaf_data.leaf` is
/// the root (i.e. `leaf.hash == root_hash`).
pub fn store_leaf(
    substrate: &Substrate,
    snapshot: &Snapshot,
    root_hash: &str,
    mut leaf_data: DagLeafData,
    policy: &FileTypePolicy,
) -> Result<StoreLeafOutcome> {
    if leaf_data.leaf.content_hash.is_some() && leaf_data.leaf.content.is_none() {
        return Err(StoreError::InvalidInput(
            "leaf has content_hash but no inline content".to_string(),
        ));
    }

    let mut handles = Vec::new();
    let content_len = leaf_data.leaf.content.as_ref().map(|c| c.len()).unwrap_or(0);

    if let (Some(content_hash), Some(bytes)) = (
        leaf_data.leaf.content_hash.clone(),
        leaf_data.leaf.content.take(),
    ) {
        handles.push(content::put(substrate, snapshot, &content_hash, &bytes)?);
    }

    let is_root = leaf_data.leaf.hash == root_hash;
    let mut file_info = None;

    let bucket = if is_root {
        let category = policy.classify(&kind_name_for(&leaf_data.leaf.item_name))?;
        let bucket = bucket_for(&leaf_data.leaf.item_name, leaf_data.leaf.leaf_type);
        debug!("root leaf {root_hash} classified as {category:?}, bucket={bucket}");
        bucket
    } else {
        resolve_bucket(substrate, snapshot, root_hash)?
    };

    let mut bucket_tree = substrate.tree(snapshot, &bucket)?;
    let encoded = bincode::serialize(&leaf_data)?;
    bucket_tree.put(leaf_data.leaf.hash.as_bytes().to_vec(), encoded);
    handles.push(bucket_tree);

    if is_root {
        let mut index = substrate.tree(snapshot, SCIONIC_INDEX_TREE)?;
        index.put(root_hash.as_bytes().to_vec(), bucket.as_bytes().to_vec());
        handles.push(index);

        let mut cache_buckets = Vec::new();

        // Author cache: cache:<pubkey>[<filetype>] = [root, ...].
        if let Some(h) = cache::add(substrate, snapshot, &leaf_data.public_key, &bucket, root_hash)? {
            handles.push(h);
            cache_buckets.push(cache::tree_name(&leaf_data.public_key));
        }

        // Type index read by `Store::list_media`, a distinct bucket from the
        // author cache above: cache:<filetype>[<pubkey>] = [root, ...].
        if let Some(h) = cache::add(substrate, snapshot, &bucket, &leaf_data.public_key, root_hash)? {
            handles.push(h);
            cache_buckets.push(cache::tree_name(&bucket));
        }

        if let Some(path) = leaf_data.leaf.additional_data.get("f") {
            let (app, folder) = app_and_path(path);
            let app_bucket = format!("{}:{}", leaf_data.public_key, app);
            if let Some(h) = cache::add(substrate, snapshot, &app_bucket, &folder, root_hash)? {
                handles.push(h);
                cache_buckets.push(cache::tree_name(&app_bucket));
            }
        }

        // Up to three distinct cache trees may have been touched above; merge
        // their MBL registrations so the commit stages a single `mbl` handle
        // rather than racing several independently-computed ones on the same
        // key (see `mbl::register_many`).
        cache_buckets.sort();
        cache_buckets.dedup();
        if let Some(mbl_handle) = mbl::register_many(substrate, snapshot, mbl::CLASS_CACHE, &cache_buckets)? {
            handles.push(mbl_handle);
        }

        let kind_name = kind_name_for(&leaf_data.leaf.item_name);
        let size_bytes = if leaf_data.leaf.leaf_count > 0 {
            leaf_data.leaf.leaf_count * CHUNK_SIZE_BYTES
        } else {
            content_len as u64
        };
        let size_mb = size_bytes as f64 / 1_000_000.0;

        file_info = Some(crate::stats::FileInfo {
            root: root_hash.to_string(),
            hash: leaf_data.leaf.hash.clone(),
            file_name: leaf_data.leaf.item_name.clone(),
            mime_type: kind_name,
            leaf_count: leaf_data.leaf.leaf_count,
            size: size_mb,
            timestamp: chrono::Utc::now(),
        });

        info!("stored root {root_hash} in bucket {bucket} ({size_mb:.4} MB)");
    }

    Ok(StoreLeafOutcome { handles, file_info })
}

#[derive(Debug, Clone)]
pub struct RetrievedLeaf {
    pub data: DagLeafData,
}

/// Fetch one leaf, decoding it and optionally hydrating its content bytes.
pub fn retrieve_leaf(
    substrate: &Substrate,
    snapshot: &Snapshot,
    root_hash: &str,
    leaf_hash: &str,
    include_content: bool,
) -> Result<RetrievedLeaf> {
    let bucket = resolve_bucket(substrate, snapshot, root_hash)?;
    let bucket_tree = substrate.tree(snapshot, &bucket)?;
    let bytes = bucket_tree
        .get(leaf_hash.as_bytes())?
        .ok_or_else(|| StoreError::NotFound(format!("leaf {leaf_hash} not found in {bucket}")))?;
    let mut data: DagLeafData = bincode::deserialize(&bytes)?;

    if include_content {
        if let Some(content_hash) = data.leaf.content_hash.clone() {
            let bytes = content::get(substrate, snapshot, &content_hash)?;
            data.leaf.content = Some(bytes);
        }
    }

    Ok(RetrievedLeaf { data })
}

pub fn retrieve_content(substrate: &Substrate, snapshot: &Snapshot, content_hash: &[u8]) -> Result<Vec<u8>> {
    content::get(substrate, snapshot, content_hash)
}

/// `filter` maps bucket -> key; for each entry the accumulated cache list
/// is appended to the result. An empty filter returns an empty list.
pub fn query_dag(
    substrate: &Substrate,
    snapshot: &Snapshot,
    filter: &HashMap<String, String>,
) -> Result<Vec<String>> {
    let mut hashes = Vec::new();
    for (bucket, key) in filter {
        hashes.extend(cache::get(substrate, snapshot, bucket, key)?);
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn policy() -> FileTypePolicy {
        FileTypePolicy {
            mode: Some(FileTypeMode::Smart),
            photos: vec!["jpg".into(), "png".into()],
            videos: vec!["mp4".into()],
            audio: vec!["mp3".into()],
            blocked: vec!["exe".into()],
        }
    }

    fn root_leaf(hash: &str, name: &str) -> DagLeafData {
        DagLeafData {
            leaf: DagLeaf {
                hash: hash.to_string(),
                leaf_type: LeafType::File,
                item_name: name.to_string(),
                content_hash: None,
                content: None,
                leaf_count: 1,
                additional_data: HashMap::new(),
            },
            public_key: "pubkey1".to_string(),
        }
    }

    #[test]
    fn store_then_retrieve_roundtrips_content() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let mut leaf = root_leaf("R", "report.pdf");
        leaf.leaf.content_hash = Some(b"C".to_vec());
        leaf.leaf.content = Some(b"hello pdf bytes".to_vec());

        let outcome = store_leaf(&substrate, &snap, "R", leaf, &policy()).unwrap();
        substrate.commit(outcome.handles).unwrap();
        assert!(outcome.file_info.is_some());

        let snap2 = substrate.snapshot();
        let retrieved = retrieve_leaf(&substrate, &snap2, "R", "R", true).unwrap();
        assert_eq!(retrieved.data.leaf.content, Some(b"hello pdf bytes".to_vec()));

        let bucket = resolve_bucket(&substrate, &snap2, "R").unwrap();
        assert_eq!(bucket, "pdf");
    }

    #[test]
    fn root_write_caches_by_pubkey_and_registers_every_bucket_once() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let mut leaf = root_leaf("R", "report.pdf");
        leaf.leaf.additional_data.insert("f".to_string(), "myapp/docs/2024".to_string());

        let outcome = store_leaf(&substrate, &snap, "R", leaf, &policy()).unwrap();
        substrate.commit(outcome.handles).unwrap();

        let snap2 = substrate.snapshot();

        // Spec's author cache: cache:<pubkey>[<filetype>] = [root].
        let by_author = cache::get(&substrate, &snap2, "pubkey1", "pdf").unwrap();
        assert_eq!(by_author, vec!["R".to_string()]);

        // Distinct type index kept for `Store::list_media`: cache:<filetype>[<pubkey>].
        let by_type = cache::list_all(&substrate, &snap2, "pdf").unwrap();
        assert_eq!(by_type, vec!["R".to_string()]);

        // All three buckets touched by this one write are registered together.
        let mut registered = mbl::list(&substrate, &snap2, mbl::CLASS_CACHE).unwrap();
        registered.sort();
        let mut expected = vec![
            cache::tree_name("pubkey1"),
            cache::tree_name("pdf"),
            cache::tree_name("pubkey1:myapp"),
        ];
        expected.sort();
        assert_eq!(registered, expected);
    }

    #[test]
    fn missing_content_with_hash_is_invalid() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let mut leaf = root_leaf("R", "report.pdf");
        leaf.leaf.content_hash = Some(b"C".to_vec());

        let err = store_leaf(&substrate, &snap, "R", leaf, &policy()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn blocked_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let leaf = root_leaf("R", "virus.exe");
        let err = store_leaf(&substrate, &snap, "R", leaf, &policy()).unwrap_err();
        assert!(matches!(err, StoreError::PolicyRejected(_)));
    }

    #[test]
    fn unknown_root_is_not_found() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();
        let err = retrieve_leaf(&substrate, &snap, "ghost", "ghost", false).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn query_dag_with_empty_filter_is_empty() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();
        let hashes = query_dag(&substrate, &snap, &HashMap::new()).unwrap();
        assert!(hashes.is_empty());
    }
}
