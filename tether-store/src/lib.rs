//! # Tether Store
//!
//! Remote key/hash store access for session persistence.
//!
//! ## Features
//!
//! - **Connection Pooling**: bb8-managed Redis connections; broken ones are discarded
//! - **Transactions**: queue commands on a `MULTI`/`EXEC` pipeline
//! - **Property Caches**: load-once, write-through mirrors of single remote values
//! - **Key Scans**: cursor scans as splittable sequences for parallel traversal
//! - **In-Memory Store**: the same traits without a server, for tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_store::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::builder()
//!         .url("redis://localhost:6379")
//!         .pool_size(10)
//!         .build();
//!
//!     let store: Arc<dyn RemoteStore> = Arc::new(StoreClient::new(config).await?);
//!
//!     // One cached field of a hash
//!     let ttl: PropertyCache<i32> = PropertyCache::new(
//!         store.clone(),
//!         RemoteLocation::hash_field("SESS:abc:metadata", "TTL")?,
//!         Arc::new(IntegerConverter),
//!     );
//!     ttl.store(Some(1800)).await;
//!
//!     // Every metadata key, drained over four tasks
//!     let keys = KeyScan::start(store, "SESS:*:metadata")
//!         .await?
//!         .collect_parallel(4)
//!         .await?;
//!     println!("{} sessions", keys.len());
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod converter;
mod error;
mod memory;
mod pool;
mod property;
mod scan;
mod traits;

pub use client::{PoolStats, StoreClient};
pub use config::{StoreConfig, StoreConfigBuilder};
pub use converter::{
    BooleanConverter, Converter, DateTimeConverter, IntegerConverter, LongConverter,
    SerializableConverter, StringConverter, TimestampConverter, format_date_time,
};
pub use error::{ConvertError, StoreError, StoreResult};
pub use memory::{MemoryStore, StoreCounters};
pub use pool::{
    PooledStoreConnection, StoreConnection, StoreConnectionManager, StorePool, StorePoolBuilder,
};
pub use property::{PropertyCache, PropertySetter, RemoteLocation};
pub use scan::KeyScan;
pub use traits::{KeyScanner, RemoteStore, STARTING_CURSOR, ScanPage, WriteOp};

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
///
/// ```
/// use tether_store::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::StoreClient;
    pub use crate::config::{StoreConfig, StoreConfigBuilder};
    pub use crate::converter::{
        BooleanConverter, Converter, DateTimeConverter, IntegerConverter, LongConverter,
        SerializableConverter, StringConverter, TimestampConverter,
    };
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::memory::MemoryStore;
    pub use crate::property::{PropertyCache, PropertySetter, RemoteLocation};
    pub use crate::scan::KeyScan;
    pub use crate::traits::{KeyScanner, RemoteStore, WriteOp};
}
