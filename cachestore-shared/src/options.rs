/// Per-operation options and the cacheable-value predicate
///
/// Every store operation takes an optional [`OperationOptions`]. Absent fields
/// fall back to store-wide configuration, so `OperationOptions::default()`
/// means "use the store's settings".
///
/// # TTL semantics
///
/// ```text
/// per-call ttl   store ttl   effective
/// ------------   ---------   ---------------------
/// Some(30)       any         expire after 30s
/// Some(0)        any         never expire
/// None           Some(60)    expire after 60s
/// None           Some(0)     never expire
/// None           None        never expire
/// ```

use crate::codec::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Default number of entries the server examines per SCAN step
pub const DEFAULT_SCAN_COUNT: usize = 100;

/// Default key pattern for `keys()`
pub const MATCH_ALL: &str = "*";

/// Decides whether a value may be stored
pub type CacheablePredicate = Arc<dyn Fn(&JsonValue) -> bool + Send + Sync>;

/// Default cacheable-value policy
///
/// Rejects `null` (what `None` and `()` serialize to), accepts everything
/// else, including `0`, `false` and `""`.
pub fn default_is_cacheable(value: &JsonValue) -> bool {
    !value.is_null()
}

/// The default predicate, boxed for storage in a resolved configuration
pub fn default_predicate() -> CacheablePredicate {
    Arc::new(default_is_cacheable)
}

/// Options recognized by individual operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOptions {
    /// Time-to-live in seconds; `Some(0)` disables expiration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,

    /// Compression override for this call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<Compression>,

    /// SCAN batch hint for `keys()`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_count: Option<usize>,
}

impl OperationOptions {
    /// Creates empty options (store defaults apply)
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TTL in seconds (`0` = no expiration)
    pub fn ttl(mut self, seconds: u64) -> Self {
        self.ttl = Some(seconds);
        self
    }

    /// Sets the compression policy for this call
    pub fn compress(mut self, compression: impl Into<Compression>) -> Self {
        self.compress = Some(compression.into());
        self
    }

    /// Sets the SCAN batch hint
    pub fn scan_count(mut self, count: usize) -> Self {
        self.scan_count = Some(count);
        self
    }

    /// Resolves the expiration to apply for a write
    ///
    /// Returns `None` when the value must be stored without expiration.
    pub fn effective_ttl(&self, store_default: Option<u64>) -> Option<u64> {
        self.ttl.or(store_default).filter(|ttl| *ttl > 0)
    }

    /// Resolves the compression policy for this call
    pub fn effective_compression(&self, store_default: &Compression) -> Compression {
        Compression::resolve(store_default, self.compress.as_ref())
    }

    /// Resolves the SCAN batch hint (never zero)
    pub fn effective_scan_count(&self) -> usize {
        self.scan_count.unwrap_or(DEFAULT_SCAN_COUNT).max(1)
    }
}
