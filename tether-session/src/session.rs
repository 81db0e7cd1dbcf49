//! Store-backed session facade.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tether_store::{
    BooleanConverter, Converter, IntegerConverter, PropertyCache, RemoteLocation, RemoteStore,
    SerializableConverter, StringConverter, TimestampConverter, WriteOp,
};
use tracing::{debug, error};

use crate::convention::{Convention, fields};
use crate::error::SessionResult;

/// The authenticated user bound to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User name
    pub name: String,
    /// Granted roles
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    /// Create a principal with no roles.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
        }
    }

    /// Add a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

/// In-memory mirror of a session, kept current by the property setters.
///
/// Only values that have been loaded or stored through the session appear here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub auth_type: Option<String>,
    /// Millis since the epoch
    pub creation_time: i64,
    /// Start of the current request, millis since the epoch
    pub this_accessed_time: i64,
    /// End of the last request, millis since the epoch
    pub last_accessed_time: i64,
    /// Seconds
    pub max_inactive_interval: i32,
    pub principal: Option<Principal>,
    pub is_valid: bool,
    pub attributes: HashMap<String, Value>,
}

type Assign<T> = fn(&mut SessionSnapshot, Option<&T>);

/// A session whose state lives in the store.
///
/// Every metadata field is a lazily loaded hash field of the metadata key;
/// every attribute is a lazily loaded hash field of the attributes key.
/// Reads that cannot reach the store return defaults rather than errors.
pub struct RemoteSession {
    id: String,
    metadata_key: String,
    attributes_key: String,
    store: Arc<dyn RemoteStore>,
    state: Arc<RwLock<SessionSnapshot>>,
    default_max_inactive: i32,
    auth_type: PropertyCache<String>,
    creation_time: PropertyCache<i64>,
    this_accessed_time: PropertyCache<i64>,
    last_accessed_time: PropertyCache<i64>,
    max_inactive_interval: PropertyCache<i32>,
    principal: PropertyCache<Principal>,
    is_valid: PropertyCache<bool>,
    attributes: Mutex<HashMap<String, Arc<PropertyCache<Value>>>>,
}

impl RemoteSession {
    /// Bind a session object to `id`. Nothing is read or written yet.
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn RemoteStore>,
        convention: &Convention,
        default_max_inactive: i32,
    ) -> SessionResult<Self> {
        let id = id.into();
        let metadata_key = convention.metadata_key(&id)?;
        let attributes_key = convention.attributes_key(&id)?;
        let state = Arc::new(RwLock::new(SessionSnapshot {
            max_inactive_interval: default_max_inactive,
            ..Default::default()
        }));

        let field = Field {
            store: &store,
            key: &metadata_key,
            state: &state,
        };

        Ok(Self {
            auth_type: field.property::<String, _>(
                fields::AUTH_TYPE,
                StringConverter,
                |s, v| s.auth_type = v.cloned(),
            )?,
            creation_time: field.property::<i64, _>(
                fields::CREATION_TIME,
                TimestampConverter,
                |s, v| s.creation_time = v.copied().unwrap_or_default(),
            )?,
            this_accessed_time: field.property::<i64, _>(
                fields::LAST_REQUEST_START_TIME,
                TimestampConverter,
                |s, v| s.this_accessed_time = v.copied().unwrap_or_default(),
            )?,
            last_accessed_time: field.property::<i64, _>(
                fields::LAST_REQUEST_END_TIME,
                TimestampConverter,
                |s, v| s.last_accessed_time = v.copied().unwrap_or_default(),
            )?,
            max_inactive_interval: field.property::<i32, _>(
                fields::TTL,
                IntegerConverter,
                |s, v| {
                    if let Some(secs) = v {
                        s.max_inactive_interval = *secs;
                    }
                },
            )?,
            principal: field.property::<Principal, _>(
                fields::PRINCIPAL,
                SerializableConverter::<Principal>::new(),
                |s, v| s.principal = v.cloned(),
            )?,
            is_valid: field.property::<bool, _>(
                fields::IS_VALID,
                BooleanConverter,
                |s, v| s.is_valid = v.copied().unwrap_or_default(),
            )?,
            attributes: Mutex::new(HashMap::new()),
            id,
            metadata_key,
            attributes_key,
            store,
            state,
            default_max_inactive,
        })
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Metadata hash key.
    pub fn metadata_key(&self) -> &str {
        &self.metadata_key
    }

    /// Attributes hash key.
    pub fn attributes_key(&self) -> &str {
        &self.attributes_key
    }

    /// A copy of the in-memory mirror.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.read().clone()
    }

    /// Authentication type, e.g. `BASIC` or `FORM`.
    pub async fn auth_type(&self) -> Option<String> {
        self.auth_type.get().await
    }

    pub async fn set_auth_type(&self, auth_type: Option<String>) {
        self.auth_type.store(auth_type).await;
    }

    /// Creation time in millis since the epoch; 0 when unknown.
    pub async fn creation_time(&self) -> i64 {
        self.creation_time.get().await.unwrap_or_default()
    }

    pub async fn set_creation_time(&self, millis: i64) {
        self.creation_time.store(Some(millis)).await;
    }

    /// Start of the current request; 0 when unknown.
    pub async fn this_accessed_time(&self) -> i64 {
        self.this_accessed_time.get().await.unwrap_or_default()
    }

    /// End of the last request; 0 when unknown.
    pub async fn last_accessed_time(&self) -> i64 {
        self.last_accessed_time.get().await.unwrap_or_default()
    }

    /// Record the start of a request.
    pub async fn access(&self) {
        self.this_accessed_time
            .store(Some(Utc::now().timestamp_millis()))
            .await;
    }

    /// Record the end of a request.
    pub async fn end_access(&self) {
        self.last_accessed_time
            .store(Some(Utc::now().timestamp_millis()))
            .await;
    }

    /// Max inactive interval in seconds. Negative means the session never expires.
    pub async fn max_inactive_interval(&self) -> i32 {
        self.max_inactive_interval
            .get()
            .await
            .unwrap_or(self.default_max_inactive)
    }

    pub async fn set_max_inactive_interval(&self, secs: i32) {
        self.max_inactive_interval.store(Some(secs)).await;
    }

    pub async fn principal(&self) -> Option<Principal> {
        self.principal.get().await
    }

    pub async fn set_principal(&self, principal: Option<Principal>) {
        self.principal.store(principal).await;
    }

    /// Whether the session is valid. Unknown counts as invalid.
    pub async fn is_valid(&self) -> bool {
        self.is_valid.get().await.unwrap_or(false)
    }

    pub async fn set_valid(&self, valid: bool) {
        self.is_valid.store(Some(valid)).await;
    }

    /// Whether the last request ended longer ago than the max inactive interval.
    pub async fn is_expired(&self) -> bool {
        let ttl = self.max_inactive_interval().await;
        if ttl < 0 {
            return false;
        }
        let last = self.last_accessed_time().await;
        expires_at(last, ttl) < Utc::now().timestamp_millis()
    }

    /// An attribute decoded as `T`. `None` when absent, unreachable or of another shape.
    pub async fn attribute<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self.attribute_value(name).await?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(
                    session_id = %self.id,
                    name = %name,
                    error = %e,
                    "Attribute has another shape"
                );
                None
            }
        }
    }

    /// An attribute as raw JSON.
    pub async fn attribute_value(&self, name: &str) -> Option<Value> {
        match self.attribute_property(name) {
            Ok(property) => property.get().await,
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "Invalid attribute name");
                None
            }
        }
    }

    /// Set an attribute. A value that serializes to `null` removes it.
    pub async fn set_attribute<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> SessionResult<()> {
        let value = serde_json::to_value(value)?;
        let property = self.attribute_property(name)?;
        property
            .store(if value.is_null() { None } else { Some(value) })
            .await;
        Ok(())
    }

    /// Remove an attribute. Store failures are logged.
    pub async fn remove_attribute(&self, name: &str) {
        match self.store.hdel(&self.attributes_key, name).await {
            Ok(_) => {
                self.attributes.lock().remove(name);
                self.state.write().attributes.remove(name);
            }
            Err(e) => {
                error!(
                    session_id = %self.id,
                    name = %name,
                    error = %e,
                    "Could not remove attribute"
                );
            }
        }
    }

    /// Attribute names, sorted. Empty when the store cannot be reached.
    pub async fn attribute_names(&self) -> Vec<String> {
        match self.store.hkeys(&self.attributes_key).await {
            Ok(mut names) => {
                names.sort();
                names
            }
            Err(e) => {
                error!(
                    session_id = %self.id,
                    error = %e,
                    "Could not retrieve attribute names; using none"
                );
                Vec::new()
            }
        }
    }

    /// Mark the session expired and drop its attributes, atomically.
    pub async fn invalidate(&self) -> SessionResult<()> {
        let ops = invalidation_ops(&self.metadata_key, &self.attributes_key)?;
        self.store.apply_atomic(ops).await?;

        self.is_valid.invalidate_local().await;
        let attributes: Vec<_> = self.attributes.lock().drain().map(|(_, p)| p).collect();
        for property in attributes {
            property.invalidate_local().await;
        }
        let mut state = self.state.write();
        state.is_valid = false;
        state.attributes.clear();
        Ok(())
    }

    fn attribute_property(&self, name: &str) -> SessionResult<Arc<PropertyCache<Value>>> {
        let mut attributes = self.attributes.lock();
        if let Some(property) = attributes.get(name) {
            return Ok(property.clone());
        }

        let location = RemoteLocation::hash_field(self.attributes_key.clone(), name)?;
        let state = self.state.clone();
        let owned_name = name.to_string();
        let property = Arc::new(
            PropertyCache::new(
                self.store.clone(),
                location,
                Arc::new(SerializableConverter::<Value>::new()),
            )
            .with_setter(move |value: Option<&Value>| {
                let mut state = state.write();
                match value {
                    Some(value) => {
                        state.attributes.insert(owned_name.clone(), value.clone());
                    }
                    None => {
                        state.attributes.remove(&owned_name);
                    }
                }
            }),
        );
        attributes.insert(name.to_string(), property.clone());
        Ok(property)
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("id", &self.id)
            .field("metadata_key", &self.metadata_key)
            .finish()
    }
}

/// Builds metadata properties that write into the shared mirror.
struct Field<'a> {
    store: &'a Arc<dyn RemoteStore>,
    key: &'a str,
    state: &'a Arc<RwLock<SessionSnapshot>>,
}

impl Field<'_> {
    fn property<T, C>(
        &self,
        field: &str,
        converter: C,
        assign: Assign<T>,
    ) -> SessionResult<PropertyCache<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        C: Converter<T> + 'static,
    {
        let location = RemoteLocation::hash_field(self.key, field)?;
        let state = self.state.clone();
        Ok(
            PropertyCache::new(self.store.clone(), location, Arc::new(converter))
                .with_setter(move |value: Option<&T>| assign(&mut state.write(), value)),
        )
    }
}

/// When a session whose last request ended at `last_end` (millis) expires.
pub(crate) fn expires_at(last_end: i64, ttl_secs: i32) -> i64 {
    last_end.saturating_add(i64::from(ttl_secs).saturating_mul(1000))
}

/// The atomic batch that invalidates a session.
pub(crate) fn invalidation_ops(
    metadata_key: &str,
    attributes_key: &str,
) -> SessionResult<Vec<WriteOp>> {
    let now = TimestampConverter.encode(&Utc::now().timestamp_millis())?;
    let invalid = BooleanConverter.encode(&false)?;
    Ok(vec![
        WriteOp::HSet {
            key: metadata_key.to_string(),
            field: fields::EXPIRED_AT.to_string(),
            value: now,
        },
        WriteOp::HSet {
            key: metadata_key.to_string(),
            field: fields::IS_VALID.to_string(),
            value: invalid,
        },
        WriteOp::Del {
            key: attributes_key.to_string(),
        },
    ])
}
