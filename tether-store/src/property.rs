//! Lazy, write-through property caches.
//!
//! A [`PropertyCache`] mirrors one remote value, either a bare key or one
//! field of a hash, into a local slot. The first [`trigger`](PropertyCache::trigger)
//! performs a single remote read no matter how many tasks call it at once;
//! [`store`](PropertyCache::store) writes through, skipping writes that would
//! not change anything.
//!
//! Load and store paths never fail the caller. Store errors are logged and the
//! local slot keeps the caller's value, so a session stays usable while the
//! store is unreachable.

use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::converter::Converter;
use crate::error::{StoreError, StoreResult};
use crate::traits::RemoteStore;

/// Where a cached value lives remotely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteLocation {
    /// A bare string key.
    Key(String),
    /// One field of a hash.
    HashField { key: String, field: String },
}

impl RemoteLocation {
    /// A bare key. Empty names are rejected.
    pub fn key(key: impl Into<String>) -> StoreResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(StoreError::Config("remote key must not be empty".to_string()));
        }
        Ok(Self::Key(key))
    }

    /// A field inside a hash. Empty names are rejected.
    pub fn hash_field(key: impl Into<String>, field: impl Into<String>) -> StoreResult<Self> {
        let key = key.into();
        let field = field.into();
        if key.is_empty() || field.is_empty() {
            return Err(StoreError::Config(format!(
                "hash key and field must not be empty (key {:?}, field {:?})",
                key, field
            )));
        }
        Ok(Self::HashField { key, field })
    }

    /// The key holding the value (the hash key for hash fields).
    pub fn key_name(&self) -> &str {
        match self {
            Self::Key(key) | Self::HashField { key, .. } => key,
        }
    }

    async fn read(&self, store: &dyn RemoteStore) -> StoreResult<Option<String>> {
        match self {
            Self::Key(key) => store.get(key).await,
            Self::HashField { key, field } => store.hget(key, field).await,
        }
    }

    async fn write(&self, store: &dyn RemoteStore, value: &str) -> StoreResult<()> {
        match self {
            Self::Key(key) => store.set(key, value).await,
            Self::HashField { key, field } => store.hset(key, field, value).await,
        }
    }

    async fn delete(&self, store: &dyn RemoteStore) -> StoreResult<()> {
        match self {
            Self::Key(key) => store.del(key).await.map(|_| ()),
            Self::HashField { key, field } => store.hdel(key, field).await.map(|_| ()),
        }
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{}", key),
            Self::HashField { key, field } => write!(f, "{}#{}", key, field),
        }
    }
}

/// Receives every value a property loads or stores.
///
/// Used to keep an owner's in-memory state in step with the cache.
pub trait PropertySetter<T>: Send + Sync {
    fn assign(&self, value: Option<&T>);
}

impl<T, F> PropertySetter<T> for F
where
    F: Fn(Option<&T>) + Send + Sync,
{
    fn assign(&self, value: Option<&T>) {
        self(value)
    }
}

struct CachedField<T> {
    loaded: bool,
    value: Option<T>,
}

/// One remote value, loaded at most once and written through on change.
pub struct PropertyCache<T> {
    store: Arc<dyn RemoteStore>,
    location: RemoteLocation,
    converter: Arc<dyn Converter<T>>,
    setter: Option<Box<dyn PropertySetter<T>>>,
    slot: Mutex<CachedField<T>>,
}

impl<T> PropertyCache<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create an unloaded cache for `location`.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        location: RemoteLocation,
        converter: Arc<dyn Converter<T>>,
    ) -> Self {
        Self {
            store,
            location,
            converter,
            setter: None,
            slot: Mutex::new(CachedField {
                loaded: false,
                value: None,
            }),
        }
    }

    /// Attach a setter called with each loaded or stored value.
    pub fn with_setter(mut self, setter: impl PropertySetter<T> + 'static) -> Self {
        self.setter = Some(Box::new(setter));
        self
    }

    /// Where this property lives.
    pub fn location(&self) -> &RemoteLocation {
        &self.location
    }

    /// Load the remote value unless already loaded.
    ///
    /// A missing value marks the property loaded without calling the setter.
    /// Read or decode failures are logged and leave it unloaded, so the next
    /// trigger retries.
    pub async fn trigger(&self) {
        let mut slot = self.slot.lock().await;
        if slot.loaded {
            return;
        }

        let raw = match self.location.read(self.store.as_ref()).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(location = %self.location, error = %e, "Failed to load property");
                return;
            }
        };

        let value = match raw {
            Some(raw) => match self.converter.decode(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(location = %self.location, error = %e, "Failed to decode property");
                    return;
                }
            },
            None => None,
        };

        debug!(location = %self.location, present = value.is_some(), "Property loaded");
        slot.loaded = true;
        slot.value = value;
        if let (Some(value), Some(setter)) = (slot.value.as_ref(), self.setter.as_ref()) {
            setter.assign(Some(value));
        }
    }

    /// Write `value` through to the store. `None` deletes the remote value.
    ///
    /// The remote call is skipped when the loaded value already equals
    /// `value`. The local slot and the setter always receive `value`, even
    /// when the remote call fails.
    pub async fn store(&self, value: Option<T>) {
        let mut slot = self.slot.lock().await;

        if slot.loaded && slot.value == value {
            debug!(location = %self.location, "Property unchanged, skipping write");
        } else {
            let outcome = match value.as_ref() {
                None => self.location.delete(self.store.as_ref()).await,
                Some(v) => match self.converter.encode(v) {
                    Ok(text) => self.location.write(self.store.as_ref(), &text).await,
                    Err(e) => Err(e.into()),
                },
            };
            if let Err(e) = outcome {
                warn!(location = %self.location, error = %e, "Failed to store property");
            }
        }

        slot.loaded = true;
        slot.value = value;
        if let Some(setter) = self.setter.as_ref() {
            setter.assign(slot.value.as_ref());
        }
    }

    /// Trigger, then return the cached value.
    pub async fn get(&self) -> Option<T> {
        self.trigger().await;
        self.cached().await
    }

    /// The cached value, without any remote I/O.
    pub async fn cached(&self) -> Option<T> {
        self.slot.lock().await.value.clone()
    }

    /// Whether a load or store has completed.
    pub async fn is_loaded(&self) -> bool {
        self.slot.lock().await.loaded
    }

    /// Forget the cached value so the next trigger reads the store again.
    pub async fn invalidate_local(&self) {
        let mut slot = self.slot.lock().await;
        slot.loaded = false;
        slot.value = None;
    }
}

impl<T> fmt::Debug for PropertyCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyCache")
            .field("location", &self.location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{LongConverter, StringConverter};
    use crate::memory::MemoryStore;
    use parking_lot::Mutex as SyncMutex;
    use std::time::Duration;

    fn string_property(
        store: &Arc<MemoryStore>,
        location: RemoteLocation,
    ) -> PropertyCache<String> {
        PropertyCache::new(store.clone(), location, Arc::new(StringConverter))
    }

    #[test]
    fn test_location_rejects_empty_names() {
        assert!(RemoteLocation::key("").is_err());
        assert!(RemoteLocation::hash_field("meta", "").is_err());
        assert!(RemoteLocation::hash_field("", "IS_VALID").is_err());
        assert_eq!(
            RemoteLocation::hash_field("meta", "TTL").unwrap().to_string(),
            "meta#TTL"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_read_once() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(20)));
        store.set("greeting", "hello").await.unwrap();
        store.reset_counters();

        let property = Arc::new(string_property(&store, RemoteLocation::key("greeting").unwrap()));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let property = property.clone();
                tokio::spawn(async move { property.get().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some("hello".to_string()));
        }
        assert_eq!(store.counters().reads, 1);
    }

    #[tokio::test]
    async fn test_repeated_store_writes_once() {
        let store = Arc::new(MemoryStore::new());
        let property = string_property(&store, RemoteLocation::key("name").unwrap());

        property.store(Some("alice".to_string())).await;
        property.store(Some("alice".to_string())).await;

        assert_eq!(store.counters().writes, 1);
        assert_eq!(store.get("name").await.unwrap(), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn test_store_none_deletes() {
        let store = Arc::new(MemoryStore::new());
        store.set("answer", "42").await.unwrap();
        store.reset_counters();

        let property: PropertyCache<i64> = PropertyCache::new(
            store.clone(),
            RemoteLocation::key("answer").unwrap(),
            Arc::new(LongConverter),
        );
        assert_eq!(property.get().await, Some(42));

        property.store(None).await;

        let counters = store.counters();
        assert_eq!(counters.deletes, 1);
        assert_eq!(counters.writes, 0);
        assert_eq!(property.cached().await, None);
        assert!(!store.exists("answer").await.unwrap());
    }

    #[tokio::test]
    async fn test_absent_value_skips_setter() {
        let store = Arc::new(MemoryStore::new());
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = seen.clone();

        let property = string_property(&store, RemoteLocation::key("missing").unwrap())
            .with_setter(move |value: Option<&String>| sink.lock().push(value.cloned()));

        property.trigger().await;

        assert!(property.is_loaded().await);
        assert_eq!(property.cached().await, None);
        assert!(seen.lock().is_empty());

        property.store(Some("now".to_string())).await;
        property.store(None).await;
        assert_eq!(*seen.lock(), vec![Some("now".to_string()), None]);
    }

    #[tokio::test]
    async fn test_decode_failure_is_retryable() {
        let store = Arc::new(MemoryStore::new());
        store.set("count", "not a number").await.unwrap();

        let property: PropertyCache<i64> = PropertyCache::new(
            store.clone(),
            RemoteLocation::key("count").unwrap(),
            Arc::new(LongConverter),
        );

        property.trigger().await;
        assert!(!property.is_loaded().await);

        store.set("count", "7").await.unwrap();
        assert_eq!(property.get().await, Some(7));
    }

    #[tokio::test]
    async fn test_outage_keeps_local_value() {
        let store = Arc::new(MemoryStore::new());
        let property = string_property(&store, RemoteLocation::key("k").unwrap());

        store.set_available(false);
        property.trigger().await;
        assert!(!property.is_loaded().await);

        property.store(Some("v".to_string())).await;
        assert_eq!(property.cached().await, Some("v".to_string()));

        store.set_available(true);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hash_field_addressing() {
        let store = Arc::new(MemoryStore::new());
        store.hset("S:abc:metadata", "AUTH_TYPE", "BASIC").await.unwrap();

        let property = string_property(
            &store,
            RemoteLocation::hash_field("S:abc:metadata", "AUTH_TYPE").unwrap(),
        );
        assert_eq!(property.get().await, Some("BASIC".to_string()));

        property.store(Some("FORM".to_string())).await;
        assert_eq!(
            store.hget("S:abc:metadata", "AUTH_TYPE").await.unwrap(),
            Some("FORM".to_string())
        );

        property.store(None).await;
        assert!(!store.exists("S:abc:metadata").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_local_reloads() {
        let store = Arc::new(MemoryStore::new());
        store.set("k", "one").await.unwrap();
        let property = string_property(&store, RemoteLocation::key("k").unwrap());

        assert_eq!(property.get().await, Some("one".to_string()));
        store.set("k", "two").await.unwrap();
        assert_eq!(property.get().await, Some("one".to_string()));

        property.invalidate_local().await;
        assert_eq!(property.get().await, Some("two".to_string()));
    }
}
