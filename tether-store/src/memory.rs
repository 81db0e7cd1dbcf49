//! In-memory store.
//!
//! Uses DashMap for thread-safe concurrent access. Suitable for tests and
//! single-process deployments; sessions kept here do not survive a restart.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::traits::{KeyScanner, RemoteStore, STARTING_CURSOR, ScanPage, WriteOp};

const DEFAULT_PAGE_SIZE: usize = 10;

/// Snapshot of the operations a [`MemoryStore`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    /// `GET`, `EXISTS`, `HGET`, `HMGET`, `HKEYS`
    pub reads: usize,
    /// `SET`, `HSET`, `RENAME`
    pub writes: usize,
    /// `DEL`, `HDEL`
    pub deletes: usize,
    /// `SCAN` pages
    pub scans: usize,
}

#[derive(Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    scans: AtomicUsize,
}

/// In-memory key/hash store.
pub struct MemoryStore {
    strings: DashMap<String, String>,
    hashes: DashMap<String, HashMap<String, String>>,
    /// Single operations hold it shared, atomic batches hold it exclusively.
    batch_gate: RwLock<()>,
    counters: Counters,
    available: AtomicBool,
    page_size: usize,
    latency: Option<Duration>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        debug!("Creating new in-memory store");
        Self {
            strings: DashMap::new(),
            hashes: DashMap::new(),
            batch_gate: RwLock::new(()),
            counters: Counters::default(),
            available: AtomicBool::new(true),
            page_size: DEFAULT_PAGE_SIZE,
            latency: None,
        }
    }

    /// Set how many keys each scan page examines.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay every operation, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Operation counters so far.
    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            reads: self.counters.reads.load(Ordering::SeqCst),
            writes: self.counters.writes.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
            scans: self.counters.scans.load(Ordering::SeqCst),
        }
    }

    /// Reset the operation counters.
    pub fn reset_counters(&self) {
        self.counters.reads.store(0, Ordering::SeqCst);
        self.counters.writes.store(0, Ordering::SeqCst);
        self.counters.deletes.store(0, Ordering::SeqCst);
        self.counters.scans.store(0, Ordering::SeqCst);
    }

    /// Number of keys held.
    pub fn key_count(&self) -> usize {
        self.strings.len() + self.hashes.len()
    }

    async fn enter(&self, counter: &AtomicUsize) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply(&self, op: WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::Set { key, value } => {
                self.counters.writes.fetch_add(1, Ordering::SeqCst);
                self.hashes.remove(&key);
                self.strings.insert(key, value);
            }
            WriteOp::Del { key } => {
                self.counters.deletes.fetch_add(1, Ordering::SeqCst);
                self.delete_key(&key);
            }
            WriteOp::HSet { key, field, value } => {
                self.counters.writes.fetch_add(1, Ordering::SeqCst);
                self.write_field(key, field, value)?;
            }
            WriteOp::HDel { key, field } => {
                self.counters.deletes.fetch_add(1, Ordering::SeqCst);
                self.delete_field(&key, &field);
            }
            WriteOp::Rename { from, to } => {
                self.counters.writes.fetch_add(1, Ordering::SeqCst);
                self.move_key(&from, to)?;
            }
        }
        Ok(())
    }

    fn delete_key(&self, key: &str) -> bool {
        let removed_string = self.strings.remove(key).is_some();
        let removed_hash = self.hashes.remove(key).is_some();
        removed_string || removed_hash
    }

    fn write_field(&self, key: String, field: String, value: String) -> StoreResult<()> {
        if self.strings.contains_key(&key) {
            return Err(wrong_type(&key));
        }
        self.hashes.entry(key).or_default().insert(field, value);
        Ok(())
    }

    fn delete_field(&self, key: &str, field: &str) -> bool {
        let removed = match self.hashes.get_mut(key) {
            Some(mut hash) => hash.remove(field).is_some(),
            None => false,
        };
        // Empty hashes disappear, as in Redis
        self.hashes.remove_if(key, |_, hash| hash.is_empty());
        removed
    }

    fn move_key(&self, from: &str, to: String) -> StoreResult<()> {
        if let Some((_, value)) = self.strings.remove(from) {
            self.delete_key(&to);
            self.strings.insert(to, value);
            Ok(())
        } else if let Some((_, hash)) = self.hashes.remove(from) {
            self.delete_key(&to);
            self.hashes.insert(to, hash);
            Ok(())
        } else {
            Err(StoreError::Command(format!("ERR no such key: {}", from)))
        }
    }

    fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .strings
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.hashes.iter().map(|entry| entry.key().clone()))
            .collect();
        keys.sort();
        keys
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

/// Cursors past the first page carry the last key examined, so keys deleted
/// between pages never shift the resume point.
fn decode_cursor(cursor: &str) -> StoreResult<Option<String>> {
    if cursor == STARTING_CURSOR {
        return Ok(None);
    }
    STANDARD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .map(Some)
        .ok_or_else(|| StoreError::Command(format!("ERR invalid cursor: {}", cursor)))
}

/// Translate a Redis glob (`*`, `?`, `[...]`, `\` escapes) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 8);
    regex.push_str("(?s)^");

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '[' => {
                regex.push('[');
                if chars.peek() == Some(&'^') || chars.peek() == Some(&'!') {
                    chars.next();
                    regex.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    match inner {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '-' => regex.push('-'),
                        other => regex.push_str(&regex::escape(&other.to_string())),
                    }
                }
                if !closed {
                    return Err(StoreError::Command(format!(
                        "unterminated character class in pattern {:?}",
                        pattern
                    )));
                }
                regex.push(']');
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }

    regex.push('$');
    Regex::new(&regex).map_err(|e| StoreError::Command(format!("bad pattern {:?}: {}", pattern, e)))
}

#[async_trait]
impl KeyScanner for MemoryStore {
    async fn scan_page(&self, cursor: &str, pattern: &str) -> StoreResult<ScanPage> {
        self.enter(&self.counters.scans).await?;

        let resume_after = decode_cursor(cursor)?;
        let matcher = glob_to_regex(pattern)?;

        let keys = {
            let _gate = self.batch_gate.read();
            self.sorted_keys()
        };

        let start = match &resume_after {
            Some(last) => keys.partition_point(|key| key <= last),
            None => 0,
        };
        let end = start.saturating_add(self.page_size).min(keys.len());
        let examined = &keys[start..end];
        let page: Vec<String> = examined
            .iter()
            .filter(|key| matcher.is_match(key))
            .cloned()
            .collect();

        let next = match examined.last() {
            Some(last) if end < keys.len() => STANDARD.encode(last),
            _ => STARTING_CURSOR.to_string(),
        };

        trace!(cursor = %cursor, next = %next, matched = page.len(), "Memory scan page");
        Ok(ScanPage::new(next, page))
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.enter(&self.counters.reads).await?;
        let _gate = self.batch_gate.read();
        if self.hashes.contains_key(key) {
            return Err(wrong_type(key));
        }
        Ok(self.strings.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.enter(&self.counters.writes).await?;
        let _gate = self.batch_gate.read();
        self.hashes.remove(key);
        self.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.enter(&self.counters.deletes).await?;
        let _gate = self.batch_gate.read();
        Ok(self.delete_key(key))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.enter(&self.counters.reads).await?;
        let _gate = self.batch_gate.read();
        Ok(self.strings.contains_key(key) || self.hashes.contains_key(key))
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        self.enter(&self.counters.writes).await?;
        let _gate = self.batch_gate.read();
        self.move_key(from, to.to_string())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.enter(&self.counters.reads).await?;
        let _gate = self.batch_gate.read();
        if self.strings.contains_key(key) {
            return Err(wrong_type(key));
        }
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        self.enter(&self.counters.reads).await?;
        let _gate = self.batch_gate.read();
        if self.strings.contains_key(key) {
            return Err(wrong_type(key));
        }
        let hash = self.hashes.get(key);
        Ok(fields
            .iter()
            .map(|field| hash.as_ref().and_then(|h| h.get(*field).cloned()))
            .collect())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.enter(&self.counters.writes).await?;
        let _gate = self.batch_gate.read();
        self.write_field(key.to_string(), field.to_string(), value.to_string())
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.enter(&self.counters.deletes).await?;
        let _gate = self.batch_gate.read();
        Ok(self.delete_field(key, field))
    }

    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        self.enter(&self.counters.reads).await?;
        let _gate = self.batch_gate.read();
        let mut fields: Vec<String> = self
            .hashes
            .get(key)
            .map(|hash| hash.keys().cloned().collect())
            .unwrap_or_default();
        fields.sort();
        Ok(fields)
    }

    async fn apply_atomic(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }

        let _gate = self.batch_gate.write();
        // Like EXEC: every queued command runs, the first failure is reported
        let mut first_error = None;
        for op in ops {
            if let Err(e) = self.apply(op) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("SESS:*:meta").unwrap();
        assert!(re.is_match("SESS:a:meta"));
        assert!(re.is_match("SESS::meta"));
        assert!(!re.is_match("SESS:a:attributes"));

        let re = glob_to_regex("h?llo").unwrap();
        assert!(re.is_match("hello"));
        assert!(!re.is_match("heello"));

        let re = glob_to_regex("h[ae]llo").unwrap();
        assert!(re.is_match("hallo"));
        assert!(!re.is_match("hillo"));

        let re = glob_to_regex("h[^e]llo").unwrap();
        assert!(re.is_match("hallo"));
        assert!(!re.is_match("hello"));

        let re = glob_to_regex(r"a\*b.c").unwrap();
        assert!(re.is_match("a*b.c"));
        assert!(!re.is_match("axb.c"));
        assert!(!re.is_match("a*bxc"));

        assert!(glob_to_regex("h[ae").is_err());
    }

    #[tokio::test]
    async fn test_strings_and_hashes() {
        let store = MemoryStore::new();

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.hget("k", "f").await.is_err());

        store.hset("h", "a", "1").await.unwrap();
        store.hset("h", "b", "2").await.unwrap();
        assert_eq!(store.hkeys("h").await.unwrap(), vec!["a", "b"]);
        assert_eq!(
            store.hmget("h", &["b", "c"]).await.unwrap(),
            vec![Some("2".to_string()), None]
        );

        assert!(store.hdel("h", "a").await.unwrap());
        assert!(store.hdel("h", "b").await.unwrap());
        assert!(!store.exists("h").await.unwrap());
        assert_eq!(store.key_count(), 1);
    }

    #[tokio::test]
    async fn test_rename_requires_source() {
        let store = MemoryStore::new();
        store.hset("old", "f", "1").await.unwrap();

        store.rename("old", "new").await.unwrap();
        assert_eq!(store.hget("new", "f").await.unwrap(), Some("1".to_string()));
        assert!(!store.exists("old").await.unwrap());

        assert!(store.rename("old", "newer").await.is_err());
    }

    #[tokio::test]
    async fn test_atomic_batch_runs_every_op() {
        let store = MemoryStore::new();
        store.hset("attrs", "x", "1").await.unwrap();

        let result = store
            .apply_atomic(vec![
                WriteOp::HSet {
                    key: "meta".into(),
                    field: "IS_VALID".into(),
                    value: "0".into(),
                },
                WriteOp::Rename {
                    from: "missing".into(),
                    to: "elsewhere".into(),
                },
                WriteOp::Del {
                    key: "attrs".into(),
                },
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(
            store.hget("meta", "IS_VALID").await.unwrap(),
            Some("0".to_string())
        );
        assert!(!store.exists("attrs").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_pages_cover_all_matching_keys() {
        let store = MemoryStore::new().with_page_size(2);
        for id in ["a", "b", "c", "d", "e"] {
            store.hset(&format!("S:{}:meta", id), "f", "1").await.unwrap();
        }
        store.set("unrelated", "x").await.unwrap();

        let mut cursor = STARTING_CURSOR.to_string();
        let mut found = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.scan_page(&cursor, "S:*:meta").await.unwrap();
            pages += 1;
            found.extend(page.keys.clone());
            if page.is_last() {
                break;
            }
            cursor = page.cursor;
        }

        assert_eq!(pages, 3);
        assert_eq!(found.len(), 5);
        assert_eq!(store.counters().scans, 3);
    }

    #[tokio::test]
    async fn test_scan_survives_deletes_between_pages() {
        let store = MemoryStore::new().with_page_size(2);
        for id in ["a", "b", "c", "d", "e", "f"] {
            store.set(&format!("S:{}", id), "1").await.unwrap();
        }

        let first = store.scan_page(STARTING_CURSOR, "S:*").await.unwrap();
        assert_eq!(first.keys, vec!["S:a", "S:b"]);
        assert!(!first.is_last());

        store.del("S:a").await.unwrap();

        let mut cursor = first.cursor;
        let mut rest = Vec::new();
        loop {
            let page = store.scan_page(&cursor, "S:*").await.unwrap();
            rest.extend(page.keys.clone());
            if page.is_last() {
                break;
            }
            cursor = page.cursor;
        }

        assert_eq!(rest, vec!["S:c", "S:d", "S:e", "S:f"]);
    }

    #[tokio::test]
    async fn test_scan_rejects_malformed_cursor() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();

        assert!(matches!(
            store.scan_page("not a cursor!", "*").await,
            Err(StoreError::Command(_))
        ));
    }

    #[tokio::test]
    async fn test_outage_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.scan_page("0", "*").await.is_err());
        assert!(store.apply_atomic(vec![]).await.is_err());

        store.set_available(true);
        assert!(store.get("k").await.unwrap().is_none());
    }
}
