//! Splittable key scans.
//!
//! A [`KeyScan`] walks every key matching a glob by chaining `SCAN` pages.
//! Each page becomes a node that starts fetching its successor on a separate
//! task as soon as it exists, so consuming one page overlaps the network
//! latency of the next. A scan can be split into disjoint scans that are
//! drained independently, each owning a whole run of not-yet-visited pages.
//!
//! Keys are yielded as the store reports them. `SCAN` may return a key more
//! than once and the duplicates are kept; de-duplicate in the consumer.
//!
//! ```rust,ignore
//! let scan = KeyScan::start(store.clone(), "SESS:*:meta").await?;
//! let keys = scan.collect_parallel(4).await?;
//! ```

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, Stream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::traits::{KeyScanner, STARTING_CURSOR, ScanPage};

/// What follows a node in the chain.
enum NextNode {
    /// The store reported the end of the scan.
    Tail,
    /// The next page is being fetched.
    Pending(JoinHandle<StoreResult<Arc<ScanNode>>>),
    Ready(Arc<ScanNode>),
    Failed(String),
}

impl NextNode {
    fn settle(outcome: Result<StoreResult<Arc<ScanNode>>, JoinError>) -> Self {
        match outcome {
            Ok(Ok(node)) => Self::Ready(node),
            Ok(Err(e)) => Self::Failed(e.to_string()),
            Err(e) => Self::Failed(format!("page fetch task ended: {}", e)),
        }
    }
}

struct ScanNode {
    keys: Vec<String>,
    claimed: AtomicUsize,
    next: Mutex<NextNode>,
}

impl ScanNode {
    /// Build a node for `page`, starting the fetch of its successor.
    fn from_page(scanner: Arc<dyn KeyScanner>, pattern: Arc<str>, page: ScanPage) -> Arc<Self> {
        let next = if page.is_last() {
            NextNode::Tail
        } else {
            NextNode::Pending(tokio::spawn(fetch(scanner, page.cursor, pattern)))
        };

        Arc::new(Self {
            keys: page.keys,
            claimed: AtomicUsize::new(0),
            next: Mutex::new(next),
        })
    }

    /// Claim the next unvisited key of this page.
    fn claim(&self) -> Option<&str> {
        let len = self.keys.len();
        self.claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| {
                (i < len).then_some(i + 1)
            })
            .ok()
            .and_then(|i| self.keys.get(i))
            .map(String::as_str)
    }

    fn remaining(&self) -> usize {
        self.keys
            .len()
            .saturating_sub(self.claimed.load(Ordering::Acquire))
    }

    /// Wait for the successor, if any. A failed fetch fails every later call.
    async fn resolve(slot: &mut NextNode) -> StoreResult<Option<Arc<ScanNode>>> {
        if let NextNode::Pending(handle) = &mut *slot {
            let outcome = handle.await;
            *slot = NextNode::settle(outcome);
        }

        match &*slot {
            NextNode::Tail => Ok(None),
            NextNode::Ready(node) => Ok(Some(node.clone())),
            NextNode::Failed(reason) => Err(StoreError::Scan(reason.clone())),
            // Settled above
            NextNode::Pending(_) => Ok(None),
        }
    }

    async fn resolve_next(&self) -> StoreResult<Option<Arc<ScanNode>>> {
        let mut slot = self.next.lock().await;
        Self::resolve(&mut slot).await
    }

    /// Detach a run of pages after this node.
    ///
    /// Half the time the successor is asked to split first, which pushes
    /// splits toward the end of the chain and leaves the pages already in
    /// hand with the original scan.
    fn split(&self) -> BoxFuture<'_, StoreResult<Option<Arc<ScanNode>>>> {
        async move {
            let mut slot = self.next.lock().await;
            let Some(next) = Self::resolve(&mut slot).await? else {
                return Ok(None);
            };

            if rand::random::<bool>()
                && let Some(split) = next.split().await?
            {
                return Ok(Some(split));
            }

            *slot = NextNode::Tail;
            Ok(Some(next))
        }
        .boxed()
    }

    /// Remaining keys here plus a rough guess for what follows.
    fn estimate_size(&self) -> usize {
        let remaining = self.remaining();
        let Ok(mut slot) = self.next.try_lock() else {
            return doubled(remaining);
        };

        if let NextNode::Pending(handle) = &mut *slot
            && handle.is_finished()
            && let Some(outcome) = handle.now_or_never()
        {
            *slot = NextNode::settle(outcome);
        }

        match &*slot {
            NextNode::Tail | NextNode::Failed(_) => remaining,
            NextNode::Pending(_) => doubled(remaining),
            NextNode::Ready(next) => remaining.saturating_add(next.shallow_estimate()),
        }
    }

    /// Estimate without resolving or following the successor.
    fn shallow_estimate(&self) -> usize {
        let remaining = self.remaining();
        match self.next.try_lock().as_deref() {
            Ok(NextNode::Tail) | Ok(NextNode::Failed(_)) => remaining,
            _ => doubled(remaining),
        }
    }
}

impl Drop for ScanNode {
    fn drop(&mut self) {
        // Nobody can reach the rest of the chain any more
        if let NextNode::Pending(handle) = self.next.get_mut() {
            handle.abort();
        }
    }
}

fn doubled(remaining: usize) -> usize {
    remaining.saturating_add(1).saturating_mul(2)
}

fn fetch(
    scanner: Arc<dyn KeyScanner>,
    cursor: String,
    pattern: Arc<str>,
) -> BoxFuture<'static, StoreResult<Arc<ScanNode>>> {
    async move {
        let page = scanner.scan_page(&cursor, &pattern).await?;
        trace!(
            pattern = %pattern,
            cursor = %cursor,
            next = %page.cursor,
            keys = page.keys.len(),
            "Scan page fetched"
        );
        Ok(ScanNode::from_page(scanner, pattern, page))
    }
    .boxed()
}

/// A lazily extended, splittable sequence of the keys matching a pattern.
pub struct KeyScan {
    /// First node that may still have unvisited keys.
    current: Arc<ScanNode>,
}

impl KeyScan {
    /// Start a full scan for `pattern`.
    pub async fn start(
        scanner: Arc<dyn KeyScanner>,
        pattern: impl Into<String>,
    ) -> StoreResult<Self> {
        Self::start_at(scanner, STARTING_CURSOR, pattern).await
    }

    /// Start a scan at `cursor`. The first page is fetched before returning.
    pub async fn start_at(
        scanner: Arc<dyn KeyScanner>,
        cursor: &str,
        pattern: impl Into<String>,
    ) -> StoreResult<Self> {
        let pattern: Arc<str> = Arc::from(pattern.into());
        debug!(pattern = %pattern, cursor = %cursor, "Starting key scan");
        let current = fetch(scanner, cursor.to_string(), pattern).await?;
        Ok(Self { current })
    }

    /// Visit the next key. Returns `false` once the scan is exhausted.
    ///
    /// Waits for the next page only when the current one is used up.
    pub async fn try_advance<F>(&mut self, visit: F) -> StoreResult<bool>
    where
        F: FnOnce(&str),
    {
        loop {
            if let Some(key) = self.current.claim() {
                visit(key);
                return Ok(true);
            }

            let next = self.current.resolve_next().await?;
            match next {
                Some(next) => self.current = next,
                None => return Ok(false),
            }
        }
    }

    /// The next key, or `None` once exhausted.
    pub async fn next_key(&mut self) -> StoreResult<Option<String>> {
        let mut found = None;
        self.try_advance(|key| found = Some(key.to_string())).await?;
        Ok(found)
    }

    /// Split off a scan over a disjoint, unvisited run of later pages.
    ///
    /// Returns `None` when no page follows the current one.
    pub async fn try_split(&mut self) -> StoreResult<Option<KeyScan>> {
        let split = self.current.split().await?;
        Ok(split.map(|current| KeyScan { current }))
    }

    /// Rough count of the keys left.
    ///
    /// Exact once the last page is in hand. While the next page is still in
    /// flight the guess errs high, which invites further splitting.
    pub fn estimate_size(&self) -> usize {
        self.current.estimate_size()
    }

    /// Split repeatedly until there are `parts` scans or nothing is left to split.
    pub async fn split_into(self, parts: usize) -> StoreResult<Vec<KeyScan>> {
        let parts = parts.max(1);
        let mut scans = vec![self];

        while scans.len() < parts {
            let mut grew = false;
            for i in 0..scans.len() {
                if scans.len() >= parts {
                    break;
                }
                if let Some(split) = scans[i].try_split().await? {
                    scans.push(split);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        Ok(scans)
    }

    /// Drain the scan over up to `parallelism` tasks and gather every key.
    ///
    /// Duplicates reported by the store are kept. Any failed page fails the
    /// whole collection.
    pub async fn collect_parallel(self, parallelism: usize) -> StoreResult<Vec<String>> {
        let parts = self.split_into(parallelism).await?;
        debug!(parts = parts.len(), "Draining key scan in parallel");

        let handles: Vec<JoinHandle<StoreResult<Vec<String>>>> = parts
            .into_iter()
            .map(|mut scan| {
                tokio::spawn(async move {
                    let mut keys = Vec::new();
                    while let Some(key) = scan.next_key().await? {
                        keys.push(key);
                    }
                    Ok(keys)
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            let keys = handle
                .await
                .map_err(|e| StoreError::Scan(format!("scan task ended: {}", e)))??;
            all.extend(keys);
        }
        Ok(all)
    }

    /// Turn the scan into a stream of keys. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = StoreResult<String>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut scan = state?;
            match scan.next_key().await {
                Ok(Some(key)) => Some((Ok(key), Some(scan))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl std::fmt::Debug for KeyScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyScan")
            .field("page_remaining", &self.current.remaining())
            .finish()
    }
}
