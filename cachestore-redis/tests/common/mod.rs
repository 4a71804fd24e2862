#![allow(dead_code)]

/// Shared helpers for the integration tests

pub mod fake_redis;

use cachestore_redis::RedisStore;
use cachestore_shared::config::StoreConfig;
use std::env;
use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static TRACING: Once = Once::new();

/// Redis URL from the environment, defaulting to a scratch database
///
/// `reset()` flushes this database, so do not point it at real data.
pub fn redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/15".to_string())
}

/// Installs a log subscriber once; filter with `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "cachestore_redis=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Configuration pointing at the test server
pub fn live_config() -> StoreConfig {
    init_tracing();
    StoreConfig::new().url(redis_url()).pool_size(1, 8)
}

/// Configuration pointing at a port nothing listens on
pub fn unreachable_config() -> StoreConfig {
    init_tracing();
    StoreConfig::new()
        .host("127.0.0.1")
        .port(1)
        .pool_size(0, 2)
        .timeouts(1, 2)
}

/// Connects to the test server and starts from an empty database
pub async fn fresh_store(config: StoreConfig) -> anyhow::Result<RedisStore> {
    let store = RedisStore::connect(&config).await?;
    store.reset().await?;
    Ok(store)
}
