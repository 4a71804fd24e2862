/// Bounded Redis connection pool with an error channel
///
/// Wraps a `deadpool-redis` pool and adds what the store needs on top:
///
/// - acquisition failures mapped to [`StoreError::PoolAcquisition`]
/// - a broadcast channel on which every connectivity failure is published,
///   independent of the operation that ran into it
/// - eager warm-up of `min_connections`
/// - health checks (PING), statistics and graceful shutdown
///
/// # Architecture
///
/// ```text
///  RedisStore op ──acquire()──> ConnectionPool ──get()──> deadpool ──connect──> Redis
///        │                            │                                  (SELECT db
///        │<────── PooledConnection ───┘                                   on connect)
///        │
///        └── drop / release() ──> back to the idle set
///
///  connectivity failure ──> broadcast::Sender<StoreError> ──> subscribers
/// ```
///
/// A [`PooledConnection`] is a guard: it goes back to the pool when dropped,
/// so every exit path of an operation (success, error, `?`) returns the
/// connection exactly once.
///
/// # Example
///
/// ```no_run
/// use cachestore_redis::pool::ConnectionPool;
/// use cachestore_shared::config::StoreConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = StoreConfig::new().pool_size(1, 8).resolve();
/// let pool = ConnectionPool::new(&config)?;
///
/// let mut errors = pool.subscribe();
/// tokio::spawn(async move {
///     while let Ok(error) = errors.recv().await {
///         eprintln!("redis unreachable: {}", error);
///     }
/// });
///
/// pool.warm_up().await?;
/// let healthy = pool.health_check().await?;
/// println!("Redis healthy: {}", healthy);
/// # Ok(())
/// # }
/// ```

use cachestore_shared::config::ResolvedConfig;
use cachestore_shared::error::{StoreError, StoreResult};
use deadpool_redis::{Manager, Pool, PoolConfig, PoolError, Runtime};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A connection checked out of the pool
pub type PooledConnection = deadpool_redis::Connection;

/// Capacity of the error broadcast channel
///
/// Slow subscribers that fall further behind skip the oldest events.
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Bounded pool of Redis connections
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Pool,
    errors: broadcast::Sender<StoreError>,
    min_connections: usize,
    acquire_timeout: Duration,
    address: String,
    db: i64,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("db", &self.db)
            .field("min_connections", &self.min_connections)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Builds a pool for the resolved configuration
    ///
    /// No connection is opened here; call [`warm_up`](Self::warm_up) to open
    /// `min_connections` eagerly.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pool cannot be built.
    pub fn new(config: &ResolvedConfig) -> StoreResult<Self> {
        info!(
            address = %config.address(),
            db = config.db,
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            connect_timeout_ms = config.connect_timeout.as_millis() as u64,
            "Creating Redis connection pool"
        );

        let manager = Manager::new(connection_info(config)).map_err(|e| {
            StoreError::Configuration(format!("Invalid Redis connection settings: {}", e))
        })?;

        // Waiting for a free slot is bounded by `acquire()`; the pool itself
        // only bounds connection setup and recycling.
        let mut pool_config = PoolConfig::new(config.max_connections);
        pool_config.timeouts.wait = None;
        pool_config.timeouts.create = Some(config.connect_timeout);
        pool_config.timeouts.recycle = Some(config.connect_timeout);

        let inner = Pool::builder(manager)
            .config(pool_config)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Configuration(format!("Failed to build pool: {}", e)))?;

        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);

        Ok(Self {
            inner,
            errors,
            min_connections: config.min_connections,
            acquire_timeout: config.acquire_timeout,
            address: config.address(),
            db: config.db,
        })
    }

    /// Checks a connection out of the pool
    ///
    /// The connection is already bound to the configured database. Never waits
    /// longer than the acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PoolAcquisition`] if the pool is exhausted,
    /// closed, or the server cannot be reached. Connectivity failures are also
    /// published on the error channel.
    pub async fn acquire(&self) -> StoreResult<PooledConnection> {
        let result = match tokio::time::timeout(self.acquire_timeout, self.inner.get()).await {
            Ok(result) => result.map_err(|e| self.acquisition_error(e)),
            Err(_) => Err(StoreError::PoolAcquisition(format!(
                "timed out after {:?} waiting for a free connection",
                self.acquire_timeout
            ))),
        };

        match &result {
            Ok(_) => debug!(address = %self.address, "Acquired connection"),
            Err(e) => warn!(address = %self.address, error = %e, "Connection acquisition failed"),
        }

        result
    }

    /// Returns a connection to the pool
    ///
    /// Equivalent to dropping it. Taking the connection by value makes a
    /// second release impossible.
    pub fn release(&self, connection: PooledConnection) {
        drop(connection);
        debug!(address = %self.address, "Released connection");
    }

    /// Opens `min_connections` connections up front
    ///
    /// The connections are held simultaneously (so each is a distinct
    /// connection) and then returned to the idle set.
    ///
    /// # Errors
    ///
    /// Returns the first acquisition error. The pool stays usable; later
    /// operations retry the connection on their own.
    pub async fn warm_up(&self) -> StoreResult<()> {
        if self.min_connections == 0 {
            return Ok(());
        }

        let mut held = Vec::with_capacity(self.min_connections);
        for _ in 0..self.min_connections {
            held.push(self.acquire().await?);
        }
        drop(held);

        info!(
            address = %self.address,
            connections = self.min_connections,
            "Connection pool warmed up"
        );
        Ok(())
    }

    /// Subscribes to connectivity failures
    ///
    /// Events are broadcast to every subscriber and do not complete or fail
    /// any particular operation.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreError> {
        self.errors.subscribe()
    }

    /// Performs a health check by sending a PING command
    ///
    /// # Returns
    ///
    /// `true` if Redis answered PONG, `false` on any other reply.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be acquired or PING fails.
    pub async fn health_check(&self) -> StoreResult<bool> {
        let mut conn = self.acquire().await?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        if pong == "PONG" {
            debug!("Redis health check: PONG received");
            Ok(true)
        } else {
            warn!("Redis health check: unexpected response: {}", pong);
            Ok(false)
        }
    }

    /// Gets current pool statistics
    pub fn stats(&self) -> PoolStats {
        let status = self.inner.status();
        let idle = usize::try_from(status.available).unwrap_or(0);

        PoolStats {
            active_connections: status.size.saturating_sub(idle),
            idle_connections: idle,
            total_connections: status.size,
            max_connections: status.max_size,
        }
    }

    /// Closes the pool
    ///
    /// Idle connections are dropped immediately, checked-out ones when they
    /// are returned. Further acquisitions fail.
    pub fn close(&self) {
        info!(address = %self.address, "Closing Redis connection pool");
        self.inner.close();
    }

    /// Returns `true` once [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn acquisition_error(&self, err: PoolError) -> StoreError {
        let error = match err {
            PoolError::Backend(e) => {
                StoreError::PoolAcquisition(format!("failed to connect to {}: {}", self.address, e))
            }
            PoolError::Timeout(_) => StoreError::PoolAcquisition(format!(
                "timed out connecting to {}",
                self.address
            )),
            PoolError::Closed => {
                return StoreError::PoolAcquisition("connection pool is closed".to_string())
            }
            other => StoreError::PoolAcquisition(other.to_string()),
        };

        // No subscribers is fine
        let _ = self.errors.send(error.clone());
        error
    }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently checked out
    pub active_connections: usize,

    /// Connections idle in the pool
    pub idle_connections: usize,

    /// All live connections
    pub total_connections: usize,

    /// Configured upper bound
    pub max_connections: usize,
}

/// Maps a Redis command failure to a store error
///
/// The connection was already acquired when a command runs, so every failure
/// here is a command error, including a connection dropped mid-command.
pub fn command_error(err: redis::RedisError) -> StoreError {
    match err.kind() {
        redis::ErrorKind::IoError => StoreError::Command(format!("Connection lost: {}", err)),
        redis::ErrorKind::ResponseError => {
            StoreError::Command(format!("Response error: {}", err))
        }
        _ => StoreError::Command(err.to_string()),
    }
}

fn connection_info(config: &ResolvedConfig) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: config.db,
            password: config.password.clone(),
            ..Default::default()
        },
    }
}
