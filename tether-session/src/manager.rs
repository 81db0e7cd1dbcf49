//! Session manager.
//!
//! Creates, finds and retires [`RemoteSession`]s, and runs the background
//! maintenance that expires idle sessions and keeps the statistics keys
//! current. Maintenance enumerates sessions with a parallel [`KeyScan`] over
//! the metadata keys.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tether_store::{
    BooleanConverter, Converter, IntegerConverter, KeyScan, KeyScanner, LongConverter,
    RemoteStore, TimestampConverter, WriteOp,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::convention::{Convention, Statistic, fields};
use crate::error::SessionResult;
use crate::session::{RemoteSession, expires_at, invalidation_ops};

/// Generate a new unique session ID.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Outcome of one maintenance cycle. `None` marks a step that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Sessions invalidated because they sat idle too long
    pub cleaned: Option<i64>,
    pub active: Option<i64>,
    pub expired: Option<i64>,
    /// Seconds
    pub max_alive_time: Option<i64>,
    /// Seconds
    pub average_alive_time: Option<i64>,
    /// Sessions per minute
    pub create_rate: Option<i64>,
    /// Sessions per minute
    pub expire_rate: Option<i64>,
}

/// Metadata of one stored session, as read during maintenance.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionRecord {
    id: String,
    is_valid: bool,
    creation_time: Option<i64>,
    last_end: Option<i64>,
    ttl: Option<i32>,
    expired_at: Option<i64>,
}

impl SessionRecord {
    /// When the session runs out of idle time. Sessions with no recorded
    /// activity count as expired since the epoch.
    fn expiration(&self) -> i64 {
        match (self.last_end, self.ttl) {
            (Some(_), Some(ttl)) if ttl < 0 => i64::MAX,
            (Some(last_end), Some(ttl)) => expires_at(last_end, ttl),
            _ => 0,
        }
    }

    /// Millis between creation and expiry, for expired sessions.
    fn alive_time(&self) -> Option<i64> {
        Some(self.expired_at? - self.creation_time?).filter(|t| *t >= 0)
    }
}

/// Sessions per minute, measured from the earliest moment until `now`.
fn sessions_per_minute(moments: impl IntoIterator<Item = i64>, now: i64) -> i64 {
    let (count, earliest) = moments
        .into_iter()
        .fold((0i64, i64::MAX), |(count, earliest), at| {
            (count + 1, earliest.min(at))
        });
    if count == 0 || earliest >= now {
        return 0;
    }
    count.saturating_mul(60_000) / (now - earliest)
}

/// Manages store-backed sessions.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tether_session::{SessionConfig, SessionManager};
/// use tether_store::{StoreClient, StoreConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = StoreClient::new(StoreConfig::from_env().build()).await?;
/// let manager = Arc::new(SessionManager::new(Arc::new(client), SessionConfig::default())?);
///
/// let session = manager.create_session(None).await?;
/// session.set_attribute("user_id", &123).await?;
///
/// manager.clone().spawn_maintenance();
/// # Ok(())
/// # }
/// ```
pub struct SessionManager {
    store: Arc<dyn RemoteStore>,
    convention: Convention,
    config: SessionConfig,
    session_counter: AtomicU64,
}

impl SessionManager {
    /// Create a manager over `store`.
    pub fn new(store: Arc<dyn RemoteStore>, config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        let convention = Convention::new(&config.prefix)?;
        Ok(Self {
            store,
            convention,
            config,
            session_counter: AtomicU64::new(0),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the key convention.
    pub fn convention(&self) -> &Convention {
        &self.convention
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Sessions created by this manager since startup.
    pub fn session_counter(&self) -> u64 {
        self.session_counter.load(Ordering::Relaxed)
    }

    fn bind(&self, id: impl Into<String>) -> SessionResult<RemoteSession> {
        RemoteSession::new(
            id,
            self.store.clone(),
            &self.convention,
            self.config.max_inactive_secs(),
        )
    }

    /// Create a session, generating an id when none is given.
    pub async fn create_session(&self, id: Option<&str>) -> SessionResult<RemoteSession> {
        let id = id.map(str::to_string).unwrap_or_else(generate_session_id);
        let session = self.bind(id)?;

        let now = Utc::now().timestamp_millis();
        session.set_creation_time(now).await;
        session.access().await;
        session.end_access().await;
        session
            .set_max_inactive_interval(self.config.max_inactive_secs())
            .await;
        session.set_valid(true).await;

        self.session_counter.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = %session.id(), "Session created");
        Ok(session)
    }

    /// Find a valid session. Store failures are logged and reported as absent.
    pub async fn find_session(&self, id: &str) -> Option<RemoteSession> {
        let key = match self.convention.metadata_key(id) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "Not a session id");
                return None;
            }
        };

        match self.store.exists(&key).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                error!(session_id = %id, error = %e, "Could not retrieve session");
                return None;
            }
        }

        let session = self.bind(id).ok()?;
        if session.is_valid().await {
            Some(session)
        } else {
            None
        }
    }

    /// Every valid session, after expiring idle ones. Empty when the scan fails.
    pub async fn find_sessions(&self) -> Vec<RemoteSession> {
        if let Err(e) = self.clean_sessions().await {
            warn!(error = %e, "Could not expire idle sessions before listing");
        }

        let records = match self.records().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Could not retrieve sessions; returning none");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .filter(|record| record.is_valid)
            .filter_map(|record| self.bind(record.id).ok())
            .collect()
    }

    /// Invalidate a session, optionally refreshing the expiry statistics.
    pub async fn remove_session(&self, id: &str, update_stats: bool) -> SessionResult<()> {
        self.invalidate_session(id).await?;
        if update_stats {
            let rate = self.calculate_expire_rate().await?;
            self.store_statistic(Statistic::SessionExpireRate, rate).await?;
            let expired = self.count_expired().await?;
            self.store_statistic(Statistic::ExpiredSessions, expired).await?;
        }
        Ok(())
    }

    /// Atomically stamp `EXPIRED_AT`, clear `IS_VALID` and drop the attributes.
    pub async fn invalidate_session(&self, id: &str) -> SessionResult<()> {
        let ops = invalidation_ops(
            &self.convention.metadata_key(id)?,
            &self.convention.attributes_key(id)?,
        )?;
        if let Err(e) = self.store.apply_atomic(ops).await {
            error!(session_id = %id, error = %e, "Could not invalidate session");
            return Err(e.into());
        }
        debug!(session_id = %id, "Session invalidated");
        Ok(())
    }

    /// Move a session's keys to a new id and return the session rebound to it.
    ///
    /// The existence checks run before the atomic batch, so the move is
    /// best-effort against concurrent writers: an attributes hash first
    /// created between the check and the batch stays under the old id.
    pub async fn change_session_id(
        &self,
        session: RemoteSession,
        new_id: Option<&str>,
    ) -> SessionResult<RemoteSession> {
        let new_id = new_id.map(str::to_string).unwrap_or_else(generate_session_id);
        let mapping = self.convention.change_id_mapping(session.id(), &new_id)?;

        // A session without attributes has no attributes hash to rename.
        // Best-effort: these checks are not part of the batch below.
        let mut ops = Vec::with_capacity(mapping.len());
        for (from, to) in mapping {
            if self.store.exists(&from).await? {
                ops.push(WriteOp::Rename { from, to });
            }
        }
        self.store.apply_atomic(ops).await?;

        info!(old_id = %session.id(), new_id = %new_id, "Session id changed");
        self.bind(new_id)
    }

    /// Run one maintenance cycle. Each step fails independently and is logged.
    pub async fn background_process(&self) -> MaintenanceReport {
        let cleaned = self
            .step("clean sessions", async {
                self.clean_sessions().await.map(|n| n as i64)
            })
            .await;

        let active = self
            .step("active sessions", async {
                let active = self.count_active().await?;
                self.store_statistic(Statistic::CurrentActive, active).await?;
                if self.max_active().await < active {
                    self.set_max_active(active).await?;
                }
                Ok(active)
            })
            .await;

        let expired = self
            .step("expired sessions", async {
                let expired = self.count_expired().await?;
                self.store_statistic(Statistic::ExpiredSessions, expired).await?;
                Ok(expired)
            })
            .await;

        let max_alive_time = self
            .step("max alive time", async {
                let secs = self.calculate_max_alive_time().await?;
                self.store_statistic(Statistic::MaxAliveTime, secs).await?;
                Ok(secs)
            })
            .await;

        let average_alive_time = self
            .step("average alive time", async {
                let secs = self.calculate_average_alive_time().await?;
                self.store_statistic(Statistic::AverageAliveTime, secs).await?;
                Ok(secs)
            })
            .await;

        let create_rate = self
            .step("create rate", async {
                let rate = self.calculate_create_rate().await?;
                self.store_statistic(Statistic::SessionCreateRate, rate).await?;
                Ok(rate)
            })
            .await;

        let expire_rate = self
            .step("expire rate", async {
                let rate = self.calculate_expire_rate().await?;
                self.store_statistic(Statistic::SessionExpireRate, rate).await?;
                Ok(rate)
            })
            .await;

        MaintenanceReport {
            cleaned,
            active,
            expired,
            max_alive_time,
            average_alive_time,
            create_rate,
            expire_rate,
        }
    }

    /// Run [`background_process`](Self::background_process) every maintenance interval.
    pub fn spawn_maintenance(self: Arc<Self>) -> JoinHandle<()> {
        let every = self.config.maintenance_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = self.background_process().await;
                debug!(?report, "Session maintenance cycle finished");
            }
        })
    }

    async fn step<F>(&self, name: &'static str, work: F) -> Option<i64>
    where
        F: Future<Output = SessionResult<i64>>,
    {
        match work.await {
            Ok(value) => Some(value),
            Err(e) => {
                error!(step = name, error = %e, "Session maintenance step failed");
                None
            }
        }
    }

    // ========== Statistics ==========

    pub async fn active_sessions(&self) -> i64 {
        self.statistic(Statistic::CurrentActive).await
    }

    pub async fn max_active(&self) -> i64 {
        self.statistic(Statistic::MaxActive).await
    }

    pub async fn set_max_active(&self, max_active: i64) -> SessionResult<()> {
        self.store_statistic(Statistic::MaxActive, max_active).await
    }

    pub async fn expired_sessions(&self) -> i64 {
        self.statistic(Statistic::ExpiredSessions).await
    }

    /// Seconds.
    pub async fn session_max_alive_time(&self) -> i64 {
        self.statistic(Statistic::MaxAliveTime).await
    }

    /// Seconds.
    pub async fn session_average_alive_time(&self) -> i64 {
        self.statistic(Statistic::AverageAliveTime).await
    }

    /// Sessions per minute.
    pub async fn session_create_rate(&self) -> i64 {
        self.statistic(Statistic::SessionCreateRate).await
    }

    /// Sessions per minute.
    pub async fn session_expire_rate(&self) -> i64 {
        self.statistic(Statistic::SessionExpireRate).await
    }

    /// A stored statistic; 0 when absent or unreadable.
    pub async fn statistic(&self, statistic: Statistic) -> i64 {
        let key = self.convention.statistic_key(statistic);
        match self.store.get(&key).await {
            Ok(None) => 0,
            Ok(Some(raw)) if raw.is_empty() => 0,
            Ok(Some(raw)) => LongConverter.decode(&raw).unwrap_or_else(|e| {
                error!(key = %key, error = %e, "Unreadable statistic; returning 0");
                0
            }),
            Err(e) => {
                error!(key = %key, error = %e, "Error retrieving statistic; returning 0");
                0
            }
        }
    }

    async fn store_statistic(&self, statistic: Statistic, value: i64) -> SessionResult<()> {
        let key = self.convention.statistic_key(statistic);
        self.store.set(&key, &LongConverter.encode(&value)?).await?;
        Ok(())
    }

    // ========== Enumeration ==========

    /// Ids of every stored session, valid or not.
    pub async fn session_ids(&self) -> SessionResult<Vec<String>> {
        let scanner: Arc<dyn KeyScanner> = self.store.clone();
        let keys = KeyScan::start(scanner, self.convention.metadata_pattern())
            .await?
            .collect_parallel(self.config.scan_parallelism)
            .await?;

        // SCAN may repeat keys
        let ids: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| match self.convention.session_id_from_metadata_key(key) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "Skipping key that does not name a session");
                    None
                }
            })
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn records(&self) -> SessionResult<Vec<SessionRecord>> {
        let ids = self.session_ids().await?;
        let records: Vec<SessionRecord> = stream::iter(ids)
            .map(|id| self.record(id))
            .buffer_unordered(self.config.scan_parallelism)
            .filter_map(|record| async move { record })
            .collect()
            .await;
        Ok(records)
    }

    async fn record(&self, id: String) -> Option<SessionRecord> {
        let key = self.convention.metadata_key(&id).ok()?;
        let values = match self
            .store
            .hmget(
                &key,
                &[
                    fields::IS_VALID,
                    fields::CREATION_TIME,
                    fields::LAST_REQUEST_END_TIME,
                    fields::TTL,
                    fields::EXPIRED_AT,
                ],
            )
            .await
        {
            Ok(values) => values,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Could not read session metadata; skipping");
                return None;
            }
        };

        let raw = |i: usize| values.get(i).cloned().flatten().filter(|v| !v.is_empty());
        Some(SessionRecord {
            is_valid: decode(&BooleanConverter, raw(0), &id).unwrap_or(false),
            creation_time: decode(&TimestampConverter, raw(1), &id),
            last_end: decode(&TimestampConverter, raw(2), &id),
            ttl: decode(&IntegerConverter, raw(3), &id),
            expired_at: decode(&TimestampConverter, raw(4), &id),
            id,
        })
    }

    // ========== Maintenance steps ==========

    async fn clean_sessions(&self) -> SessionResult<usize> {
        let now = Utc::now().timestamp_millis();
        let idle: Vec<String> = self
            .records()
            .await?
            .into_iter()
            .filter(|record| record.is_valid && record.expiration() < now)
            .map(|record| record.id)
            .collect();

        let mut cleaned = 0;
        for id in idle {
            // Failures are logged by invalidate_session
            if self.invalidate_session(&id).await.is_ok() {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            info!(cleaned, "Expired idle sessions");
        }
        Ok(cleaned)
    }

    async fn count_active(&self) -> SessionResult<i64> {
        let records = self.records().await?;
        Ok(records.iter().filter(|r| r.is_valid).count() as i64)
    }

    async fn count_expired(&self) -> SessionResult<i64> {
        let records = self.records().await?;
        Ok(records.iter().filter(|r| !r.is_valid).count() as i64)
    }

    async fn calculate_max_alive_time(&self) -> SessionResult<i64> {
        let records = self.records().await?;
        Ok(records
            .iter()
            .filter_map(SessionRecord::alive_time)
            .max()
            .map_or(0, |millis| millis / 1000))
    }

    async fn calculate_average_alive_time(&self) -> SessionResult<i64> {
        let records = self.records().await?;
        let times: Vec<i64> = records
            .iter()
            .filter(|r| !r.is_valid)
            .filter_map(SessionRecord::alive_time)
            .collect();
        if times.is_empty() {
            return Ok(0);
        }
        let total: i128 = times.iter().map(|t| i128::from(*t)).sum();
        Ok((total / times.len() as i128 / 1000) as i64)
    }

    async fn calculate_create_rate(&self) -> SessionResult<i64> {
        let records = self.records().await?;
        let now = Utc::now().timestamp_millis();
        Ok(sessions_per_minute(
            records.iter().map(|r| r.creation_time.unwrap_or(now)),
            now,
        ))
    }

    async fn calculate_expire_rate(&self) -> SessionResult<i64> {
        let records = self.records().await?;
        let now = Utc::now().timestamp_millis();
        Ok(sessions_per_minute(
            records
                .iter()
                .filter(|r| !r.is_valid)
                .map(|r| r.expired_at.unwrap_or_else(|| r.expiration())),
            now,
        ))
    }
}

fn decode<T, C: Converter<T>>(converter: &C, raw: Option<String>, id: &str) -> Option<T> {
    let raw = raw?;
    match converter.decode(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(session_id = %id, error = %e, "Ignoring unreadable metadata field");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(is_valid: bool) -> SessionRecord {
        SessionRecord {
            id: "abc".to_string(),
            is_valid,
            creation_time: None,
            last_end: None,
            ttl: None,
            expired_at: None,
        }
    }

    #[test]
    fn test_rate_per_minute() {
        let now = 10 * 60_000;
        // Six sessions over the last two minutes
        let moments = (0..6).map(|i| now - 120_000 + i * 1000);
        assert_eq!(sessions_per_minute(moments, now), 3);
        assert_eq!(sessions_per_minute(Vec::new(), now), 0);
        assert_eq!(sessions_per_minute(vec![now + 5], now), 0);
    }

    #[test]
    fn test_record_expiration() {
        let mut r = record(true);
        assert_eq!(r.expiration(), 0);

        r.last_end = Some(1_000);
        r.ttl = Some(60);
        assert_eq!(r.expiration(), 61_000);

        r.ttl = Some(-1);
        assert_eq!(r.expiration(), i64::MAX);
    }

    #[test]
    fn test_record_alive_time() {
        let mut r = record(false);
        assert_eq!(r.alive_time(), None);

        r.creation_time = Some(1_000);
        r.expired_at = Some(31_000);
        assert_eq!(r.alive_time(), Some(30_000));

        r.expired_at = Some(500);
        assert_eq!(r.alive_time(), None);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(generate_session_id(), generate_session_id());
        assert_eq!(generate_session_id().len(), 36);
    }

    // ========== Against the in-memory store ==========

    use std::time::Duration;
    use tether_store::MemoryStore;

    fn manager() -> (Arc<MemoryStore>, SessionManager) {
        let store = Arc::new(MemoryStore::new().with_page_size(2));
        let manager = SessionManager::new(store.clone(), SessionConfig::default()).unwrap();
        (store, manager)
    }

    async fn make_idle(store: &MemoryStore, manager: &SessionManager, id: &str) {
        let key = manager.convention().metadata_key(id).unwrap();
        let long_ago = Utc::now().timestamp_millis() - 2 * 3600 * 1000;
        store
            .hset(
                &key,
                fields::LAST_REQUEST_END_TIME,
                &TimestampConverter.encode(&long_ago).unwrap(),
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_rejects_invalid_config() {
        let store = Arc::new(MemoryStore::new());
        assert!(SessionManager::new(store, SessionConfig::new("")).is_err());
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let (store, manager) = manager();
        let session = manager.create_session(Some("abc")).await.unwrap();
        session.set_attribute("user_id", &123).await.unwrap();

        let meta = store
            .hmget(
                "TOMCAT_SESSION:abc:metadata",
                &[fields::IS_VALID, fields::TTL],
            )
            .await
            .unwrap();
        assert_eq!(meta, vec![Some("1".to_string()), Some("3600".to_string())]);

        let found = manager.find_session("abc").await.unwrap();
        assert_eq!(found.attribute::<i32>("user_id").await, Some(123));
        assert_eq!(manager.session_counter(), 1);
    }

    #[tokio::test]
    async fn test_find_missing_or_invalid() {
        let (_store, manager) = manager();
        assert!(manager.find_session("nope").await.is_none());
        assert!(manager.find_session("").await.is_none());

        manager.create_session(Some("gone")).await.unwrap();
        manager.invalidate_session("gone").await.unwrap();
        assert!(manager.find_session("gone").await.is_none());
    }

    #[tokio::test]
    async fn test_generated_id_when_none_given() {
        let (_store, manager) = manager();
        let session = manager.create_session(None).await.unwrap();
        assert_eq!(session.id().len(), 36);
        assert!(manager.find_session(session.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_drops_attributes() {
        let (store, manager) = manager();
        let session = manager.create_session(Some("abc")).await.unwrap();
        session.set_attribute("cart", &vec![1, 2]).await.unwrap();

        manager.invalidate_session("abc").await.unwrap();

        assert!(!store.exists("TOMCAT_SESSION:abc:attributes").await.unwrap());
        let expired_at = store
            .hget("TOMCAT_SESSION:abc:metadata", fields::EXPIRED_AT)
            .await
            .unwrap();
        assert!(expired_at.is_some());
    }

    #[tokio::test]
    async fn test_change_session_id() {
        let (store, manager) = manager();
        let session = manager.create_session(Some("old")).await.unwrap();
        session.set_attribute("theme", "dark").await.unwrap();

        let moved = manager
            .change_session_id(session, Some("new"))
            .await
            .unwrap();

        assert_eq!(moved.id(), "new");
        assert!(!store.exists("TOMCAT_SESSION:old:metadata").await.unwrap());
        assert!(!store.exists("TOMCAT_SESSION:old:attributes").await.unwrap());
        assert_eq!(
            moved.attribute::<String>("theme").await.as_deref(),
            Some("dark")
        );
        assert!(moved.is_valid().await);
    }

    #[tokio::test]
    async fn test_change_session_id_without_attributes() {
        let (store, manager) = manager();
        let session = manager.create_session(Some("old")).await.unwrap();

        let moved = manager.change_session_id(session, None).await.unwrap();

        assert_ne!(moved.id(), "old");
        assert!(store.exists(moved.metadata_key()).await.unwrap());
        assert!(!store.exists(moved.attributes_key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_background_process() {
        let (store, manager) = manager();
        for id in ["a", "b", "c"] {
            manager.create_session(Some(id)).await.unwrap();
        }
        make_idle(&store, &manager, "c").await;

        let report = manager.background_process().await;

        assert_eq!(report.cleaned, Some(1));
        assert_eq!(report.active, Some(2));
        assert_eq!(report.expired, Some(1));
        assert!(report.max_alive_time.is_some());
        assert!(report.average_alive_time.is_some());
        assert!(report.create_rate.is_some());
        assert!(report.expire_rate.is_some());

        assert_eq!(manager.active_sessions().await, 2);
        assert_eq!(manager.max_active().await, 2);
        assert_eq!(manager.expired_sessions().await, 1);
        assert_eq!(
            store.get("TOMCAT_SESSION:CURRENT_ACTIVE").await.unwrap(),
            Some("2".to_string())
        );
        assert!(manager.find_session("c").await.is_none());
        assert_eq!(manager.find_sessions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_max_active_only_rises() {
        let (_store, manager) = manager();
        manager.set_max_active(10).await.unwrap();
        manager.create_session(Some("a")).await.unwrap();

        manager.background_process().await;

        assert_eq!(manager.active_sessions().await, 1);
        assert_eq!(manager.max_active().await, 10);
    }

    #[tokio::test]
    async fn test_alive_time_statistics() {
        let (store, manager) = manager();
        manager.create_session(Some("a")).await.unwrap();
        let key = manager.convention().metadata_key("a").unwrap();
        let now = Utc::now().timestamp_millis();
        store
            .hset(
                &key,
                fields::CREATION_TIME,
                &TimestampConverter.encode(&(now - 90_000)).unwrap(),
            )
            .await
            .unwrap();
        manager.invalidate_session("a").await.unwrap();

        let report = manager.background_process().await;

        assert_eq!(report.max_alive_time, Some(90));
        assert_eq!(report.average_alive_time, Some(90));
        assert_eq!(manager.session_max_alive_time().await, 90);
    }

    #[tokio::test]
    async fn test_malformed_keys_skipped() {
        let (store, manager) = manager();
        manager.create_session(Some("a")).await.unwrap();
        store
            .hset("TOMCAT_SESSION::metadata", fields::IS_VALID, "1")
            .await
            .unwrap();

        assert_eq!(manager.session_ids().await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_session_updates_stats() {
        let (_store, manager) = manager();
        manager.create_session(Some("a")).await.unwrap();
        manager.create_session(Some("b")).await.unwrap();

        manager.remove_session("a", true).await.unwrap();

        assert_eq!(manager.expired_sessions().await, 1);
        assert!(manager.find_session("a").await.is_none());
    }

    #[tokio::test]
    async fn test_outage_degrades_to_defaults() {
        let (store, manager) = manager();
        manager.create_session(Some("a")).await.unwrap();
        manager.background_process().await;

        store.set_available(false);

        assert_eq!(manager.background_process().await, MaintenanceReport::default());
        assert_eq!(manager.active_sessions().await, 0);
        assert!(manager.find_session("a").await.is_none());
        assert!(manager.find_sessions().await.is_empty());
        assert!(manager.invalidate_session("a").await.is_err());

        store.set_available(true);
        assert_eq!(manager.active_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_unreadable_statistic_reads_zero() {
        let (store, manager) = manager();
        store
            .set("TOMCAT_SESSION:MAX_ACTIVE", "lots")
            .await
            .unwrap();
        assert_eq!(manager.max_active().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_maintenance_runs() {
        let store = Arc::new(MemoryStore::new());
        let config = SessionConfig::default().with_maintenance_interval(Duration::from_secs(5));
        let manager = Arc::new(SessionManager::new(store.clone(), config).unwrap());
        manager.create_session(Some("a")).await.unwrap();

        let handle = manager.clone().spawn_maintenance();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.active_sessions().await, 1);

        handle.abort();
    }
}
