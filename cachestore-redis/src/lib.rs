//! # Cachestore Redis
//!
//! Redis-backed implementation of the [`CacheStore`] contract.
//!
//! ## Module Organization
//!
//! - `store`: the [`RedisStore`] façade (get/set/del/reset/ttl/keys)
//! - `pool`: bounded connection pool with an error channel
//! - `scan`: deduplicated SCAN iteration
//! - `coalesce`: optional merging of concurrent reads into one MGET
//!
//! ## Quick start
//!
//! ```no_run
//! use cachestore_redis::RedisStore;
//! use cachestore_shared::config::StoreConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::from_env()?;
//! let store = RedisStore::connect(&config).await?;
//!
//! store.set("greeting", "hello").await?;
//! let greeting: Option<String> = store.get("greeting").await?;
//! println!("{:?}, ttl {}", greeting, store.ttl("greeting").await?);
//! # Ok(())
//! # }
//! ```
//!
//! [`CacheStore`]: cachestore_shared::store::CacheStore

pub mod coalesce;
pub mod pool;
pub mod scan;
pub mod store;

pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use store::{ClientHandle, KeyList, RedisStore};

/// Current version of the cachestore Redis store
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
