/// Redis-backed cache store
///
/// [`RedisStore`] is the façade a caching layer talks to. It owns a bounded
/// [`ConnectionPool`], encodes values with the shared codec and maps every
/// operation onto one or a few Redis commands.
///
/// # Command mapping
///
/// | Operation     | Command                                  |
/// |---------------|------------------------------------------|
/// | `get`         | `GET key` (coalesced: `MGET`, then `TYPE` + `GET` for nil slots) |
/// | `mget`        | `MGET k1 k2 ...`                          |
/// | `set`         | `SETEX key ttl payload` / `SET key payload` |
/// | `del`         | `DEL k1 k2 ...` (one command, atomic)     |
/// | `reset`       | `FLUSHDB`                                 |
/// | `ttl`         | `TTL key`                                 |
/// | `keys`        | `SCAN cursor MATCH pattern COUNT n` loop  |
///
/// Every operation checks a connection out for its own duration and returns
/// it on every exit path. Values are validated with the cacheable predicate
/// before any connection is requested.
///
/// # Example
///
/// ```no_run
/// use cachestore_redis::RedisStore;
/// use cachestore_shared::config::StoreConfig;
/// use cachestore_shared::options::OperationOptions;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RedisStore::connect(&StoreConfig::new().ttl(300)).await?;
///
/// store.set("foo", "bar").await?;
/// let value: Option<String> = store.get("foo").await?;
/// assert_eq!(value.as_deref(), Some("bar"));
///
/// // Per-call overrides
/// let options = OperationOptions::new().ttl(60).compress(true);
/// store.set_with("session:1", &vec![1, 2, 3], &options).await?;
///
/// let removed = store.del(["foo", "session:1"]).await?;
/// println!("removed {} keys", removed);
/// # Ok(())
/// # }
/// ```

use crate::coalesce::{KeyResult, Payload, ReadCoalescer};
use crate::pool::{command_error, ConnectionPool, PoolStats, PooledConnection};
use crate::scan::{scan_keys, RedisScan};
use async_trait::async_trait;
use cachestore_shared::codec;
use cachestore_shared::config::{ResolvedConfig, StoreConfig};
use cachestore_shared::error::{StoreError, StoreResult};
use cachestore_shared::options::{OperationOptions, MATCH_ALL};
use cachestore_shared::store::CacheStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Name reported through [`CacheStore::name`]
pub const STORE_NAME: &str = "redis";

/// Redis cache store
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct RedisStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: ResolvedConfig,
    pool: ConnectionPool,
    coalescer: Option<ReadCoalescer>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl RedisStore {
    /// Creates a store without opening any connection
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pool cannot be built.
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let resolved = config.resolve();
        let pool = ConnectionPool::new(&resolved)?;
        Ok(Self::with_pool(resolved, pool))
    }

    /// Creates a store and opens `min_connections` connections up front
    ///
    /// A failed warm-up is logged (and published on the error channel) but
    /// does not fail construction; operations connect on demand.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pool cannot be built.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let store = Self::new(config)?;

        if let Err(e) = store.inner.pool.warm_up().await {
            warn!(error = %e, "Connection pool warm-up failed, connecting on demand");
        }

        Ok(store)
    }

    /// Creates a store on top of an existing pool
    pub fn with_pool(config: ResolvedConfig, pool: ConnectionPool) -> Self {
        let coalescer = config.coalesce_reads.then(ReadCoalescer::new);

        info!(
            address = %config.address(),
            db = config.db,
            default_ttl = ?config.ttl,
            compress = config.compress.is_enabled(),
            coalesce_reads = config.coalesce_reads,
            "Redis store ready"
        );

        Self {
            inner: Arc::new(StoreInner {
                config,
                pool,
                coalescer,
            }),
        }
    }

    /// Effective configuration after defaults and connection-string overrides
    pub fn config(&self) -> &ResolvedConfig {
        &self.inner.config
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Decides whether `value` may be stored
    pub fn is_cacheable_value(&self, value: &JsonValue) -> bool {
        self.inner.config.is_cacheable(value)
    }

    /// Fetches and decodes `key` with the store defaults
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<V>> {
        self.get_with(key, &OperationOptions::default()).await
    }

    /// Fetches and decodes `key`
    ///
    /// A missing key yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Acquisition and command failures are returned as is; a payload that
    /// cannot be decoded into `V` is a codec error.
    pub async fn get_with<V: DeserializeOwned>(
        &self,
        key: &str,
        options: &OperationOptions,
    ) -> StoreResult<Option<V>> {
        let compression = options.effective_compression(&self.inner.config.compress);
        let payload = self.fetch(key).await?;
        debug!(key, hit = payload.is_some(), "GET");

        payload
            .map(|bytes| codec::decode(&bytes, &compression).and_then(codec::from_json))
            .transpose()
    }

    /// Fetches several keys in one round trip
    ///
    /// The result has one entry per requested key, in order. Keys holding a
    /// type other than a string read as `None`, as MGET reports them.
    pub async fn mget<K, V>(
        &self,
        keys: &[K],
        options: &OperationOptions,
    ) -> StoreResult<Vec<Option<V>>>
    where
        K: AsRef<str> + Sync,
        V: DeserializeOwned,
    {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let compression = options.effective_compression(&self.inner.config.compress);
        let keys: Vec<String> = keys.iter().map(|key| key.as_ref().to_string()).collect();
        let payloads = fetch_many(&self.inner.pool, &keys).await?;
        debug!(keys = keys.len(), "MGET");

        payloads
            .into_iter()
            .map(|payload| {
                payload
                    .map(|bytes| codec::decode(&bytes, &compression).and_then(codec::from_json))
                    .transpose()
            })
            .collect()
    }

    /// Stores `value` under `key` with the store defaults
    pub async fn set<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> StoreResult<()> {
        self.set_with(key, value, &OperationOptions::default()).await
    }

    /// Stores `value` under `key`
    ///
    /// The value is rejected with a validation error, before any connection
    /// is requested, when the cacheable predicate refuses it. A positive ttl
    /// (per call, else the store default) writes with SETEX, otherwise SET.
    pub async fn set_with<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        options: &OperationOptions,
    ) -> StoreResult<()> {
        let value = codec::to_json(value)?;
        self.set_value(key, &value, options).await
    }

    async fn set_value(
        &self,
        key: &str,
        value: &JsonValue,
        options: &OperationOptions,
    ) -> StoreResult<()> {
        if !self.is_cacheable_value(value) {
            return Err(StoreError::Validation(format!(
                "value for key '{}' is not cacheable: {}",
                key, value
            )));
        }

        let compression = options.effective_compression(&self.inner.config.compress);
        let payload = codec::encode(value, &compression)?;
        let ttl = options.effective_ttl(self.inner.config.ttl);

        let mut conn = self.inner.pool.acquire().await?;
        let mut cmd = match ttl {
            Some(seconds) => {
                let mut cmd = redis::cmd("SETEX");
                cmd.arg(key).arg(seconds);
                cmd
            }
            None => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key);
                cmd
            }
        };
        cmd.arg(payload.as_slice());

        let _: () = cmd.query_async(&mut conn).await.map_err(command_error)?;

        debug!(key, ttl = ?ttl, bytes = payload.len(), "SET");
        Ok(())
    }

    /// Deletes one key or a batch of keys with a single DEL
    ///
    /// Returns how many of the keys existed. An empty batch is a no-op.
    pub async fn del(&self, keys: impl Into<KeyList>) -> StoreResult<u64> {
        let keys = keys.into();
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.inner.pool.acquire().await?;
        let removed: u64 = redis::cmd("DEL")
            .arg(keys.as_slice())
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        debug!(keys = keys.len(), removed, "DEL");
        Ok(removed)
    }

    /// Removes every key in the configured database
    pub async fn reset(&self) -> StoreResult<()> {
        let mut conn = self.inner.pool.acquire().await?;
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        info!(db = self.inner.config.db, "Flushed database");
        Ok(())
    }

    /// Remaining lifetime of `key` in seconds
    ///
    /// `-1` means the key has no expiry, `-2` that it does not exist.
    pub async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.inner.pool.acquire().await?;
        let remaining: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        debug!(key, remaining, "TTL");
        Ok(remaining)
    }

    /// Lists keys matching `pattern` (all keys when `None`)
    pub async fn keys(&self, pattern: Option<&str>) -> StoreResult<Vec<String>> {
        self.keys_with(pattern, &OperationOptions::default()).await
    }

    /// Lists keys matching `pattern` with an explicit SCAN count hint
    ///
    /// Each matching key appears once, in discovery order. One connection is
    /// held for the whole iteration.
    pub async fn keys_with(
        &self,
        pattern: Option<&str>,
        options: &OperationOptions,
    ) -> StoreResult<Vec<String>> {
        let pattern = pattern.unwrap_or(MATCH_ALL);
        let count = options.effective_scan_count();

        let mut conn = self.inner.pool.acquire().await?;
        let mut scan = RedisScan::new(&mut conn, pattern, count);
        let keys = scan_keys(&mut scan).await?;

        debug!(pattern, count, found = keys.len(), "SCAN");
        Ok(keys)
    }

    /// Checks out a raw connection for commands the store does not wrap
    ///
    /// The connection goes back to the pool when the handle is released or
    /// dropped.
    pub async fn get_client(&self) -> StoreResult<ClientHandle> {
        let connection = self.inner.pool.acquire().await?;
        Ok(ClientHandle {
            connection,
            pool: self.inner.pool.clone(),
        })
    }

    /// Subscribes to connectivity failures of the underlying pool
    pub fn subscribe_errors(&self) -> broadcast::Receiver<StoreError> {
        self.inner.pool.subscribe()
    }

    /// Pool statistics
    pub fn stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// PINGs the server
    pub async fn health_check(&self) -> StoreResult<bool> {
        self.inner.pool.health_check().await
    }

    /// Closes the pool; later operations fail with an acquisition error
    pub fn close(&self) {
        self.inner.pool.close();
    }

    async fn fetch(&self, key: &str) -> StoreResult<Payload> {
        match &self.inner.coalescer {
            Some(coalescer) => {
                let pool = self.inner.pool.clone();
                coalescer
                    .load(key, move |keys| async move { fetch_batch(&pool, &keys).await })
                    .await
            }
            None => {
                let mut conn = self.inner.pool.acquire().await?;
                redis::cmd("GET")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(command_error)
            }
        }
    }
}

/// Reads a coalesced batch with the same per-key outcome as `GET`
///
/// MGET answers nil both for a missing key and for a key of another type,
/// where GET fails with WRONGTYPE. Nil slots are therefore checked with TYPE,
/// and any that exist are read again with GET on the same connection.
async fn fetch_batch(pool: &ConnectionPool, keys: &[String]) -> StoreResult<Vec<KeyResult>> {
    let mut conn = pool.acquire().await?;

    let mut mget = redis::cmd("MGET");
    mget.arg(keys);
    let payloads: Vec<Payload> = mget.query_async(&mut conn).await.map_err(command_error)?;
    if payloads.len() != keys.len() {
        return Err(StoreError::Command(format!(
            "MGET returned {} values for {} keys",
            payloads.len(),
            keys.len()
        )));
    }

    let nil_slots: Vec<usize> = payloads
        .iter()
        .enumerate()
        .filter(|(_, payload)| payload.is_none())
        .map(|(slot, _)| slot)
        .collect();
    let mut results: Vec<KeyResult> = payloads.into_iter().map(Ok).collect();
    if nil_slots.is_empty() {
        return Ok(results);
    }

    let mut pipe = redis::pipe();
    for &slot in &nil_slots {
        pipe.cmd("TYPE").arg(&keys[slot]);
    }
    let types: Vec<String> = pipe.query_async(&mut conn).await.map_err(command_error)?;

    for (&slot, key_type) in nil_slots.iter().zip(types) {
        if key_type != "none" {
            debug!(key = %keys[slot], key_type = %key_type, "Re-reading nil MGET slot");
            results[slot] = redis::cmd("GET")
                .arg(&keys[slot])
                .query_async(&mut conn)
                .await
                .map_err(command_error);
        }
    }

    Ok(results)
}

async fn fetch_many(pool: &ConnectionPool, keys: &[String]) -> StoreResult<Vec<Payload>> {
    let mut conn = pool.acquire().await?;
    redis::cmd("MGET")
        .arg(keys)
        .query_async(&mut conn)
        .await
        .map_err(command_error)
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &str {
        STORE_NAME
    }

    async fn get(&self, key: &str, options: &OperationOptions) -> StoreResult<Option<JsonValue>> {
        self.get_with(key, options).await
    }

    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        options: &OperationOptions,
    ) -> StoreResult<()> {
        self.set_value(key, &value, options).await
    }

    async fn del(&self, keys: &[String], _options: &OperationOptions) -> StoreResult<u64> {
        RedisStore::del(self, keys).await
    }

    async fn reset(&self, _options: &OperationOptions) -> StoreResult<()> {
        RedisStore::reset(self).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        RedisStore::ttl(self, key).await
    }

    async fn keys(
        &self,
        pattern: Option<&str>,
        options: &OperationOptions,
    ) -> StoreResult<Vec<String>> {
        self.keys_with(pattern, options).await
    }

    fn is_cacheable_value(&self, value: &JsonValue) -> bool {
        RedisStore::is_cacheable_value(self, value)
    }
}

/// Keys for a single DEL
///
/// Built from one key or an ordered collection of keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyList(Vec<String>);

impl KeyList {
    /// Number of keys
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when there is nothing to delete
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys in order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for KeyList {
    fn from(key: &str) -> Self {
        Self(vec![key.to_string()])
    }
}

impl From<String> for KeyList {
    fn from(key: String) -> Self {
        Self(vec![key])
    }
}

impl From<Vec<String>> for KeyList {
    fn from(keys: Vec<String>) -> Self {
        Self(keys)
    }
}

impl From<&[String]> for KeyList {
    fn from(keys: &[String]) -> Self {
        Self(keys.to_vec())
    }
}

impl From<Vec<&str>> for KeyList {
    fn from(keys: Vec<&str>) -> Self {
        Self(keys.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for KeyList {
    fn from(keys: &[&str]) -> Self {
        Self(keys.iter().map(|key| key.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for KeyList {
    fn from(keys: [&str; N]) -> Self {
        Self(keys.iter().map(|key| key.to_string()).collect())
    }
}

/// A raw connection checked out through [`RedisStore::get_client`]
///
/// Dereferences to the pooled connection, so it can be passed to
/// `query_async` directly.
pub struct ClientHandle {
    connection: PooledConnection,
    pool: ConnectionPool,
}

impl ClientHandle {
    /// Mutable access to the connection
    pub fn connection(&mut self) -> &mut PooledConnection {
        &mut self.connection
    }

    /// Returns the connection to the pool
    pub fn release(self) {
        self.pool.release(self.connection);
    }

    /// Returns the connection to the pool, then runs `callback`
    pub fn release_then<F: FnOnce()>(self, callback: F) {
        self.release();
        callback();
    }
}

impl Deref for ClientHandle {
    type Target = PooledConnection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for ClientHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle").finish_non_exhaustive()
    }
}
