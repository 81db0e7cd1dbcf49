//! Store trait definitions.

use crate::error::StoreResult;
use async_trait::async_trait;

/// The cursor that both starts and ends a full scan.
pub const STARTING_CURSOR: &str = "0";

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// The cursor to pass to the next call; `"0"` when the scan is complete.
    pub cursor: String,
    /// Keys found on this page. May repeat keys seen on earlier pages.
    pub keys: Vec<String>,
}

impl ScanPage {
    /// Create a new page.
    pub fn new(cursor: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            cursor: cursor.into(),
            keys,
        }
    }

    /// Whether this is the last page of the scan.
    pub fn is_last(&self) -> bool {
        self.cursor == STARTING_CURSOR
    }
}

/// A write queued for atomic execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// `SET key value`
    Set { key: String, value: String },
    /// `DEL key`
    Del { key: String },
    /// `HSET key field value`
    HSet {
        key: String,
        field: String,
        value: String,
    },
    /// `HDEL key field`
    HDel { key: String, field: String },
    /// `RENAME from to`
    Rename { from: String, to: String },
}

/// Paginated key enumeration.
#[async_trait]
pub trait KeyScanner: Send + Sync {
    /// Fetch the page that starts at `cursor`, filtered by the glob `pattern`.
    async fn scan_page(&self, cursor: &str, pattern: &str) -> StoreResult<ScanPage>;
}

/// Physical operations against a remote key/hash store.
///
/// Missing keys and fields are reported as `None`, never as errors.
#[async_trait]
pub trait RemoteStore: KeyScanner {
    /// Get a string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a string value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a key of any type. Returns whether it existed.
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Rename a key. Fails if `from` does not exist.
    async fn rename(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Get one field of a hash.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Get several fields of a hash, in the order given.
    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>>;

    /// Set one field of a hash.
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Delete one field of a hash. Returns whether it existed.
    async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// List the field names of a hash.
    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Apply every write in `ops` as one transaction.
    async fn apply_atomic(&self, ops: Vec<WriteOp>) -> StoreResult<()>;
}
