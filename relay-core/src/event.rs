//! Event store: signed JSON events, sharded by kind, with cache-accelerated
//! author/tag queries and a full-scan fallback.

use crate::cache;
use crate::mbl;
use crate::substrate::{Snapshot, Substrate, TreeHandle};
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub kind: u64,
    pub created_at: i64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    pub fn bucket(&self) -> String {
        bucket_for_kind(self.kind)
    }

    /// Single-letter tag keys present on this event, e.g. `t`, `f`, `d`.
    pub fn single_letter_tag_keys(&self) -> Vec<char> {
        let mut keys: Vec<char> = self
            .tags
            .iter()
            .filter_map(|t| t.first())
            .filter(|k| k.chars().count() == 1)
            .filter_map(|k| k.chars().next())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    fn tag_values(&self, letter: char) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|t| t.first().map(|k| k.len() == 1 && k.starts_with(letter)).unwrap_or(false))
            .filter_map(|t| t.get(1).map(|s| s.as_str()))
            .collect()
    }
}

pub fn bucket_for_kind(kind: u64) -> String {
    format!("kind:{kind}")
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub authors: Vec<String>,
    pub tags: HashMap<char, Vec<String>>,
    pub kinds: Vec<u64>,
    pub ids: Vec<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

/// `f`/`d` tags compare `/`-separated path segments, `*` matching exactly
/// one segment; other tag keys compare for strict equality.
fn tag_value_matches(letter: char, event_value: &str, filter_value: &str) -> bool {
    if letter == 'f' || letter == 'd' {
        let event_segs: Vec<&str> = event_value.split('/').collect();
        let filter_segs: Vec<&str> = filter_value.split('/').collect();
        if event_segs.len() != filter_segs.len() {
            return false;
        }
        event_segs
            .iter()
            .zip(filter_segs.iter())
            .all(|(e, f)| *f == "*" || e == f)
    } else {
        event_value == filter_value
    }
}

fn matches_filter(event: &Event, filter: &EventFilter) -> bool {
    if !filter.ids.is_empty() && !filter.ids.contains(&event.id) {
        return false;
    }
    if !filter.authors.is_empty() && !filter.authors.contains(&event.pubkey) {
        return false;
    }
    if !filter.kinds.is_empty() && !filter.kinds.contains(&event.kind) {
        return false;
    }
    for (letter, wanted_values) in &filter.tags {
        let have = event.tag_values(*letter);
        let matched = wanted_values
            .iter()
            .any(|w| have.iter().any(|v| tag_value_matches(*letter, v, w)));
        if !matched {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        if !event.content.to_lowercase().contains(&search.to_lowercase()) {
            return false;
        }
    }
    true
}

pub struct StoreEventOutcome {
    pub handles: Vec<TreeHandle>,
}

/// Write one event and every dependent cache/index entry. Statistics rows
/// (`KindRow`, `UserProfile`) are recorded separately by the caller after
/// this commit succeeds — they are not part of the atomic substrate commit.
pub fn store_event(substrate: &Substrate, snapshot: &Snapshot, event: &Event) -> Result<StoreEventOutcome> {
    let bucket = event.bucket();
    let mut bucket_tree = substrate.tree(snapshot, &bucket)?;
    let encoded = serde_json::to_vec(event)?;
    bucket_tree.put(event.id.as_bytes().to_vec(), encoded);

    let mut handles = vec![bucket_tree];
    let mut cache_buckets = Vec::new();

    if let Some(h) = cache::add(substrate, snapshot, &event.pubkey, &bucket, &event.id)? {
        handles.push(h);
        cache_buckets.push(cache::tree_name(&event.pubkey));
    }

    for letter in event.single_letter_tag_keys() {
        let key = format!("#{letter}");
        if let Some(h) = cache::add(substrate, snapshot, &event.pubkey, &key, &event.id)? {
            handles.push(h);
            cache_buckets.push(cache::tree_name(&event.pubkey));
        }
    }

    // All of the above share one cache tree (`cache:<pubkey>`); dedup before
    // registering so one write never stages two `mbl` handles for the same
    // class (see `mbl::register_many`).
    cache_buckets.sort();
    cache_buckets.dedup();
    if let Some(mbl_handle) = mbl::register_many(substrate, snapshot, mbl::CLASS_CACHE, &cache_buckets)? {
        handles.push(mbl_handle);
    }

    if let Some(mbl_handle) = mbl::register(substrate, snapshot, mbl::CLASS_KINDS, &bucket)? {
        handles.push(mbl_handle);
    }

    debug!("staged event {} ({bucket})", event.id);
    Ok(StoreEventOutcome { handles })
}

/// Recursively resolve a set of candidate ids into full `Event`s, then
/// re-apply the filter (the cache fast path only narrows by author+tag; it
/// does not itself enforce kinds/search/other tags).
fn resolve_ids(substrate: &Substrate, snapshot: &Snapshot, ids: &[String]) -> Result<Vec<Event>> {
    let kind_buckets = mbl::list(substrate, snapshot, mbl::CLASS_KINDS)?;
    let mut found = Vec::new();
    for bucket in kind_buckets {
        let tree = substrate.tree(snapshot, &bucket)?;
        for id in ids {
            if let Some(bytes) = tree.get(id.as_bytes())? {
                if let Ok(event) = serde_json::from_slice::<Event>(&bytes) {
                    found.push(event);
                }
            }
        }
    }
    Ok(found)
}

fn sort_and_truncate(mut events: Vec<Event>, limit: Option<usize>) -> Vec<Event> {
    events.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
    events.dedup_by(|a, b| a.id == b.id);
    if let Some(limit) = limit {
        events.truncate(limit);
    }
    events
}

/// Query events. Prefers the cache-accelerated path (author × single-letter
/// tag); falls back to a full scan over every `kind:*` bucket registered in
/// the MBL when no such pair is usable.
pub fn query_events(substrate: &Substrate, snapshot: &Snapshot, filter: &EventFilter) -> Result<Vec<Event>> {
    let fast_pairs: Vec<(String, char)> = filter
        .authors
        .iter()
        .flat_map(|a| filter.tags.keys().map(move |l| (a.clone(), *l)))
        .collect();

    if !fast_pairs.is_empty() {
        let mut ids = Vec::new();
        for (author, letter) in &fast_pairs {
            ids.extend(cache::get(substrate, snapshot, author, &format!("#{letter}"))?);
        }
        ids.sort();
        ids.dedup();
        let candidates = resolve_ids(substrate, snapshot, &ids)?;
        let matched: Vec<Event> = candidates.into_iter().filter(|e| matches_filter(e, filter)).collect();
        return Ok(sort_and_truncate(matched, filter.limit));
    }

    if !filter.ids.is_empty() {
        let candidates = resolve_ids(substrate, snapshot, &filter.ids)?;
        let matched: Vec<Event> = candidates.into_iter().filter(|e| matches_filter(e, filter)).collect();
        return Ok(sort_and_truncate(matched, filter.limit));
    }

    // slow path: scan every registered kind bucket
    let kind_buckets = mbl::list(substrate, snapshot, mbl::CLASS_KINDS)?;
    let mut matched = Vec::new();
    for bucket in kind_buckets {
        if !bucket.starts_with("kind") {
            continue;
        }
        let tree = substrate.tree(snapshot, &bucket)?;
        for item in tree.cursor() {
            let (_, bytes) = item?;
            if let Ok(event) = serde_json::from_slice::<Event>(&bytes) {
                if matches_filter(&event, filter) {
                    matched.push(event);
                }
            }
        }
    }
    Ok(sort_and_truncate(matched, filter.limit))
}

/// Resolve an event's kind bucket by id (used by delete), then remove it.
pub fn delete_event(substrate: &Substrate, snapshot: &Snapshot, id: &str) -> Result<TreeHandle> {
    let filter = EventFilter {
        ids: vec![id.to_string()],
        ..Default::default()
    };
    let found = query_events(substrate, snapshot, &filter)?;
    let event = found
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(format!("event {id} not found")))?;
    let mut tree = substrate.tree(snapshot, &event.bucket())?;
    tree.delete(id.as_bytes().to_vec());
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn event(id: &str, pubkey: &str, kind: u64, created_at: i64, tags: Vec<Vec<&str>>) -> Event {
        Event {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            kind,
            created_at,
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(str::to_string).collect())
                .collect(),
            content: "hello".to_string(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn store_then_query_by_id_roundtrips() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();
        let e = event("e1", "p1", 1, 100, vec![]);
        let outcome = store_event(&substrate, &snap, &e).unwrap();
        substrate.commit(outcome.handles).unwrap();

        let snap2 = substrate.snapshot();
        let filter = EventFilter { ids: vec!["e1".into()], ..Default::default() };
        let results = query_events(&substrate, &snap2, &filter).unwrap();
        assert_eq!(results, vec![e]);
    }

    #[test]
    fn tag_filter_uses_cache_fast_path() {
        let dir = tempdir().unwrap();
        let substrate = Substrate::open(dir.path().to_str().unwrap()).unwrap();
        let snap = substrate.snapshot();

        let news = event("e-news", "P", 1, 10, vec![vec!["t", "news"]]);
        let sport = event("e-sport", "P", 1, 20, vec![vec!["t", "sport"]]);

        let h1 = store_event(&substrate, &snap, &news).unwrap();
        substrate.commit(h1.handles).unwrap();
        let snap = substrate.snapshot();
        let h2 = store_event(&substrate, &snap, &sport).unwrap();
        substrate.commit(h2.handles).unwrap();

        let snap = substrate.snapshot();
        let mut tags = HashMap::new();
        tags.insert('t', vec!["news".to_string()]);
        let filter = EventFilter {
            authors: vec!["P".to_string()],
            tags,
            ..Default::default()
        };
        let results = query_events(&substrate, &snap, &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "e-news");
    }

    #[test]
    fn wildcard_path_match() {
        let e = event("e1", "P", 1, 1, vec![vec!["f", "alice/photos/2024"]]);
        assert!(tag_value_matches('f', &e.tag_values('f')[0], "alice/*/2024"));
        assert!(!tag_value_matches('f', &e.tag_values('f')[0], "alice/*"));
    }

    #[test]
    fn sort_is_created_at_desc_then_id_desc() {
        let a = event("a", "P", 1, 100, vec![]);
        let b = event("b", "P", 1, 100, vec![]);
        let c = event("c", "P", 1, 50, vec![]);
        let sorted = sort_and_truncate(vec![c.clone(), a.clone(), b.clone()], None);
        assert_eq!(sorted, vec![b, a, c]);
    }
}
