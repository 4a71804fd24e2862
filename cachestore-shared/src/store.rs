/// The cache store contract
///
/// A generic caching layer talks to its backing stores through [`CacheStore`].
/// The contract is expressed over JSON values so that heterogeneous stores can
/// sit behind one `dyn CacheStore`; concrete stores usually also offer typed
/// inherent methods.
///
/// # Contract
///
/// - `get` returns `Ok(None)` for a missing key, never an error
/// - `set` validates with `is_cacheable_value` before touching the backend
/// - `del` removes all given keys together
/// - `reset` wipes the whole namespace the store is bound to
/// - `ttl` returns the backend's raw remaining lifetime (`-1` no expiry,
///   `-2` missing key)
/// - `keys` lists each matching key exactly once
///
/// # Example
///
/// ```no_run
/// use cachestore_shared::options::OperationOptions;
/// use cachestore_shared::store::CacheStore;
/// use serde_json::json;
///
/// # async fn example(store: &dyn CacheStore) -> Result<(), Box<dyn std::error::Error>> {
/// let options = OperationOptions::new().ttl(60);
/// store.set("user:1", json!({"name": "alice"}), &options).await?;
///
/// let value = store.get("user:1", &OperationOptions::default()).await?;
/// println!("{} returned {:?}", store.name(), value);
/// # Ok(())
/// # }
/// ```

use crate::error::StoreResult;
use crate::options::OperationOptions;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Operations every cache store provides
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store name, for logs and diagnostics
    fn name(&self) -> &str;

    /// Fetches a value; `Ok(None)` when the key does not exist
    async fn get(&self, key: &str, options: &OperationOptions) -> StoreResult<Option<JsonValue>>;

    /// Stores a value
    async fn set(&self, key: &str, value: JsonValue, options: &OperationOptions)
        -> StoreResult<()>;

    /// Deletes one or more keys as a single batch, returning how many existed
    async fn del(&self, keys: &[String], options: &OperationOptions) -> StoreResult<u64>;

    /// Removes every key in the store's namespace
    async fn reset(&self, options: &OperationOptions) -> StoreResult<()>;

    /// Remaining lifetime of a key in seconds
    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    /// Lists keys matching a glob pattern (`*` when `None`)
    async fn keys(&self, pattern: Option<&str>, options: &OperationOptions)
        -> StoreResult<Vec<String>>;

    /// Decides whether a value may be stored
    fn is_cacheable_value(&self, value: &JsonValue) -> bool;
}
