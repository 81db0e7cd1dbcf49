//! Redis connection pool.
//!
//! Connections are handed out by `bb8`. Each one carries a `broken` flag that
//! the client sets when a unit of work fails in a way that leaves the
//! connection in an unknown state; the pool then drops it on return instead
//! of recycling it.

use bb8::{ManageConnection, Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::aio::MultiplexedConnection;
use std::ops::{Deref, DerefMut};
use tracing::{info, warn};

use crate::{StoreConfig, StoreError, StoreResult};

/// Type alias for the connection pool.
pub type StorePool = Pool<StoreConnectionManager>;

/// A raw connection plus its health flag.
pub struct StoreConnection {
    inner: MultiplexedConnection,
    broken: bool,
}

impl StoreConnection {
    /// Mark this connection as unusable. The pool discards it when it is released.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Whether the connection has been marked unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl Deref for StoreConnection {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for StoreConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// `bb8` manager that wraps the stock Redis manager and honours the broken flag.
pub struct StoreConnectionManager {
    inner: RedisConnectionManager,
}

impl StoreConnectionManager {
    /// Create a manager for the given connection URL.
    pub fn new(url: &str) -> StoreResult<Self> {
        let inner =
            RedisConnectionManager::new(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl ManageConnection for StoreConnectionManager {
    type Connection = StoreConnection;
    type Error = redis::RedisError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let inner = self.inner.connect().await?;
        Ok(StoreConnection {
            inner,
            broken: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        let result = self.inner.is_valid(&mut conn.inner).await;
        if result.is_err() {
            conn.broken = true;
        }
        result
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        if conn.broken {
            warn!("Discarding broken store connection");
        }
        conn.broken
    }
}

/// A connection borrowed from the pool.
pub struct PooledStoreConnection<'a> {
    conn: PooledConnection<'a, StoreConnectionManager>,
}

impl<'a> PooledStoreConnection<'a> {
    /// Create a new connection wrapper.
    pub fn new(conn: PooledConnection<'a, StoreConnectionManager>) -> Self {
        Self { conn }
    }

    /// Mark the borrowed connection as unusable.
    pub fn mark_broken(&mut self) {
        self.conn.mark_broken();
    }
}

impl<'a> Deref for PooledStoreConnection<'a> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<'a> DerefMut for PooledStoreConnection<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Builder for creating store connection pools.
pub struct StorePoolBuilder {
    config: StoreConfig,
}

impl StorePoolBuilder {
    /// Create a new pool builder.
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Build the connection pool and verify it with a `PING`.
    pub async fn build(self) -> StoreResult<StorePool> {
        self.config.validate()?;

        let manager = StoreConnectionManager::new(&self.config.connection_url())?;

        let pool = Pool::builder()
            .max_size(self.config.pool_size)
            .min_idle(self.config.min_idle)
            .connection_timeout(self.config.connection_timeout)
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        // Scope the connection so it is back in the pool before we return it
        {
            let mut conn = pool.get().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut **conn)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;
        }

        info!(
            pool_size = self.config.pool_size,
            url = %self.config.url,
            "Store connection pool created"
        );

        Ok(pool)
    }
}
