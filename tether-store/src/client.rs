//! Pooled store client.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, trace};

use crate::{
    StoreConfig, StoreError, StoreResult,
    pool::{PooledStoreConnection, StorePool, StorePoolBuilder},
    traits::{KeyScanner, RemoteStore, ScanPage, WriteOp},
};

/// Client for the remote key/hash store.
///
/// Every unit of work borrows one pooled connection for its duration. Work
/// that fails with a connection-class error (or overruns the command
/// timeout) marks that connection broken so the pool drops it.
#[derive(Clone)]
pub struct StoreClient {
    config: StoreConfig,
    pool: StorePool,
}

impl StoreClient {
    /// Create a new client, building and verifying the pool.
    pub async fn new(config: StoreConfig) -> StoreResult<Self> {
        let pool = StorePoolBuilder::new(config.clone()).build().await?;
        Ok(Self { config, pool })
    }

    /// Create from an existing pool.
    pub fn from_pool(config: StoreConfig, pool: StorePool) -> Self {
        Self { config, pool }
    }

    /// Get the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    /// Get a connection from the pool.
    pub async fn get_connection(&self) -> StoreResult<PooledStoreConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(PooledStoreConnection::new(conn))
    }

    /// Run `work` against a borrowed connection and release it afterwards.
    ///
    /// Captured data must be owned by the returned future:
    ///
    /// ```rust,ignore
    /// let key = key.to_string();
    /// let value: Option<String> = client
    ///     .with_connection(move |conn| async move { Ok(conn.get(&key).await?) }.boxed())
    ///     .await?;
    /// ```
    pub async fn with_connection<T, F>(&self, work: F) -> StoreResult<T>
    where
        F: for<'c> FnOnce(&'c mut MultiplexedConnection) -> BoxFuture<'c, StoreResult<T>>,
    {
        let mut conn = self.get_connection().await?;
        let outcome = tokio::time::timeout(self.config.command_timeout, work(&mut conn)).await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_connection_error() {
                    debug!(error = %e, "Store work failed on a connection-level error");
                    conn.mark_broken();
                }
                Err(e)
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.config.command_timeout.as_millis() as u64,
                    "Store work timed out"
                );
                conn.mark_broken();
                Err(StoreError::Timeout)
            }
        }
    }

    /// Run `queue` to fill a `MULTI`/`EXEC` pipeline, then commit it.
    ///
    /// If `queue` fails nothing is sent to the server, which discards the
    /// transaction. The `EXEC` replies are decoded into `T`; use
    /// `Vec<redis::Value>` for the raw result list.
    pub async fn with_transaction<T, F>(&self, queue: F) -> StoreResult<T>
    where
        T: redis::FromRedisValue + Send + 'static,
        F: FnOnce(&mut redis::Pipeline) -> StoreResult<()>,
    {
        let mut pipe = redis::pipe();
        pipe.atomic();
        queue(&mut pipe)?;

        self.with_connection(move |conn| {
            async move {
                let results: T = pipe.query_async(conn).await?;
                Ok(results)
            }
            .boxed()
        })
        .await
    }

    /// Check if the store is reachable.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.with_connection(|conn| {
            async move {
                let _: String = redis::cmd("PING")
                    .query_async(conn)
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                Ok(())
            }
            .boxed()
        })
        .await
    }

    /// Get pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }
}

#[async_trait]
impl KeyScanner for StoreClient {
    async fn scan_page(&self, cursor: &str, pattern: &str) -> StoreResult<ScanPage> {
        let cursor = cursor.to_string();
        let pattern = pattern.to_string();
        let count = self.config.scan_count;

        let page = self
            .with_connection(move |conn| {
                async move {
                    let mut cmd = redis::cmd("SCAN");
                    cmd.arg(&cursor).arg("MATCH").arg(&pattern);
                    if let Some(count) = count {
                        cmd.arg("COUNT").arg(count);
                    }
                    let (next, keys): (String, Vec<String>) = cmd.query_async(conn).await?;
                    Ok(ScanPage::new(next, keys))
                }
                .boxed()
            })
            .await?;

        trace!(cursor = %page.cursor, keys = page.keys.len(), "Fetched scan page");
        Ok(page)
    }
}

#[async_trait]
impl RemoteStore for StoreClient {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.with_connection(move |conn| async move { Ok(conn.get(&key).await?) }.boxed())
            .await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_connection(move |conn| {
            async move {
                let _: () = conn.set(&key, &value).await?;
                Ok(())
            }
            .boxed()
        })
        .await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.with_connection(move |conn| {
            async move {
                let deleted: u32 = conn.del(&key).await?;
                Ok(deleted > 0)
            }
            .boxed()
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.with_connection(move |conn| async move { Ok(conn.exists(&key).await?) }.boxed())
            .await
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let from = from.to_string();
        let to = to.to_string();
        self.with_connection(move |conn| {
            async move {
                let _: () = conn.rename(&from, &to).await?;
                Ok(())
            }
            .boxed()
        })
        .await
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        let field = field.to_string();
        self.with_connection(move |conn| async move { Ok(conn.hget(&key, &field).await?) }.boxed())
            .await
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let key = key.to_string();
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        self.with_connection(move |conn| {
            async move {
                let values: Vec<Option<String>> = redis::cmd("HMGET")
                    .arg(&key)
                    .arg(&fields)
                    .query_async(conn)
                    .await?;
                Ok(values)
            }
            .boxed()
        })
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let field = field.to_string();
        let value = value.to_string();
        self.with_connection(move |conn| {
            async move {
                let _: () = conn.hset(&key, &field, &value).await?;
                Ok(())
            }
            .boxed()
        })
        .await
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        let key = key.to_string();
        let field = field.to_string();
        self.with_connection(move |conn| {
            async move {
                let deleted: u32 = conn.hdel(&key, &field).await?;
                Ok(deleted > 0)
            }
            .boxed()
        })
        .await
    }

    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        let key = key.to_string();
        self.with_connection(move |conn| async move { Ok(conn.hkeys(&key).await?) }.boxed())
            .await
    }

    async fn apply_atomic(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        self.with_transaction::<(), _>(move |pipe| {
            for op in ops {
                match op {
                    WriteOp::Set { key, value } => pipe.set(key, value).ignore(),
                    WriteOp::Del { key } => pipe.del(key).ignore(),
                    WriteOp::HSet { key, field, value } => pipe.hset(key, field, value).ignore(),
                    WriteOp::HDel { key, field } => pipe.hdel(key, field).ignore(),
                    WriteOp::Rename { from, to } => pipe.rename(from, to).ignore(),
                };
            }
            Ok(())
        })
        .await
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}
