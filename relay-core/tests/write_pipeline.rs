//! Cross-module write-pipeline scenarios exercised through `Store`, the one
//! entry point spec.md §4.9 requires every high-level write to go through.

use relay_core::address::Status;
use relay_core::event::{Event, EventFilter};
use relay_core::scionic::{DagLeaf, DagLeafData, FileTypePolicy, LeafType};
use relay_core::stats::Stats;
use relay_core::store::Store;
use relay_core::substrate::Substrate;
use sha2::Digest;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;

async fn test_store() -> (Arc<Store>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
    let stats = Stats::open("sqlite::memory:").await.unwrap();
    let policy = FileTypePolicy {
        mode: None,
        photos: vec!["jpg".into()],
        videos: vec!["mp4".into()],
        audio: vec!["mp3".into()],
        blocked: vec!["exe".into()],
    };
    let store = Store::new(substrate, stats, policy, vec![1], vec![]);
    (Arc::new(store), dir)
}

/// Scenario 1 (spec.md §8): publish a root leaf and a content-bearing chunk
/// leaf for the same file, through the full write pipeline.
#[tokio::test]
async fn publish_root_and_chunk_records_file_info_and_content() {
    let (store, _dir) = test_store().await;

    let root = DagLeafData {
        leaf: DagLeaf {
            hash: "R".to_string(),
            leaf_type: LeafType::File,
            item_name: "report.pdf".to_string(),
            content_hash: None,
            content: None,
            leaf_count: 16,
            additional_data: HashMap::new(),
        },
        public_key: "author1".to_string(),
    };
    store.store_leaf("R", root).await.unwrap();

    let chunk = DagLeafData {
        leaf: DagLeaf {
            hash: "chunk1".to_string(),
            leaf_type: LeafType::Chunk,
            item_name: "report.pdf".to_string(),
            content_hash: Some(b"C".to_vec()),
            content: Some(vec![7u8; 4096]),
            leaf_count: 0,
            additional_data: HashMap::new(),
        },
        public_key: "author1".to_string(),
    };
    store.store_leaf("R", chunk).await.unwrap();

    let retrieved = store.retrieve_leaf("R", "chunk1", true).unwrap();
    assert_eq!(retrieved.data.leaf.content, Some(vec![7u8; 4096]));

    let mut filter = HashMap::new();
    filter.insert("pdf".to_string(), "author1".to_string());
    let hashes = store.query_dag(&filter).unwrap();
    assert_eq!(hashes, vec!["R".to_string()]);

    let kinds = store.stats().kinds_summary().await.unwrap();
    assert!(kinds.is_empty(), "file_info is its own table, not kind_rows: {kinds:?}");
}

/// Scenario 2/3 combined: tag-filter and path-wildcard queries through the
/// composed `Store`, not the bare `event` module.
#[tokio::test]
async fn query_events_through_store_respects_tag_and_wildcard_filters() {
    let (store, _dir) = test_store().await;

    let news = Event {
        id: "news".into(),
        pubkey: "P".into(),
        kind: 1,
        created_at: 10,
        tags: vec![vec!["t".into(), "news".into()]],
        content: "breaking".into(),
        sig: "sig".into(),
    };
    let sport = Event {
        id: "sport".into(),
        pubkey: "P".into(),
        kind: 1,
        created_at: 20,
        tags: vec![vec!["t".into(), "sport".into()]],
        content: "score".into(),
        sig: "sig".into(),
    };
    let photo = Event {
        id: "photo".into(),
        pubkey: "P".into(),
        kind: 1,
        created_at: 30,
        tags: vec![vec!["f".into(), "alice/photos/2024".into()]],
        content: "pic".into(),
        sig: "sig".into(),
    };

    store.store_event(news).await.unwrap();
    store.store_event(sport).await.unwrap();
    store.store_event(photo).await.unwrap();

    let mut tags = HashMap::new();
    tags.insert('t', vec!["news".to_string()]);
    let filter = EventFilter { authors: vec!["P".into()], tags, ..Default::default() };
    let results = store.query_events(&filter).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "news");

    let mut wildcard_tags = HashMap::new();
    wildcard_tags.insert('f', vec!["alice/*/2024".to_string()]);
    let filter = EventFilter { authors: vec!["P".into()], tags: wildcard_tags, ..Default::default() };
    let results = store.query_events(&filter).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "photo");
}

/// Scenario 4 (spec.md §8): two concurrent allocations against a single
/// available address — exactly one succeeds, the loser is `Exhausted`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocation_never_double_allocates() {
    let (store, _dir) = test_store().await;
    store.save_address("main", 0, "addr1", "main").await.unwrap();

    let store_a = store.clone();
    let store_b = store.clone();
    let a = tokio::spawn(async move { store_a.allocate_address("npubA").await });
    let b = tokio::spawn(async move { store_b.allocate_address("npubB").await });

    let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
    let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one allocation must succeed: {ra:?} / {rb:?}");

    let winner = ra.as_ref().ok().or(rb.as_ref().ok()).unwrap();
    assert_eq!(winner.status, Status::Allocated);
    assert!(winner.allocated_at.is_some());
}

/// Round-trip law: store_blob -> get_blob returns the original bytes.
#[tokio::test]
async fn blob_roundtrips_through_store() {
    let (store, _dir) = test_store().await;
    let data = b"opaque upload bytes";
    let hash = sha2::Sha256::digest(data);
    store.store_blob(data, &hash, "uploader1").unwrap();
    let fetched = store.get_blob(&hex::encode(hash)).unwrap();
    assert_eq!(fetched, data);
}
