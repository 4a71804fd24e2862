/// Store configuration and connection-string resolution
///
/// A [`StoreConfig`] is what callers build (or deserialize). Before connecting,
/// the store calls [`StoreConfig::resolve`] to produce a [`ResolvedConfig`]:
/// host, port, database index, ttl and password are taken from the `url`
/// connection string when it parses, otherwise from the explicit fields, and
/// finally from built-in defaults.
///
/// # Connection string
///
/// ```text
/// redis://[:password@]host[:port][/db-number][?ttl=seconds]
/// ```
///
/// A string that fails to parse (or carries a malformed db/ttl) is ignored as a
/// whole and the explicit fields win. This is never reported as an error.
///
/// # Example
///
/// ```
/// use cachestore_shared::config::StoreConfig;
///
/// let config = StoreConfig::new()
///     .host("10.0.0.5")
///     .port(6380)
///     .url("redis://:secret@cache.internal:1234/2?ttl=600");
///
/// let resolved = config.resolve();
/// assert_eq!(resolved.host, "cache.internal");
/// assert_eq!(resolved.port, 1234);
/// assert_eq!(resolved.db, 2);
/// assert_eq!(resolved.ttl, Some(600));
/// assert_eq!(resolved.password.as_deref(), Some("secret"));
/// ```

use crate::codec::Compression;
use crate::error::{StoreError, StoreResult};
use crate::options::{default_predicate, CacheablePredicate};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 6379;

/// Default database index
pub const DEFAULT_DB: i64 = 0;

/// Store configuration as supplied by the caller
///
/// All fields are optional in serialized form; missing ones take the values of
/// [`StoreConfig::default`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Server host
    pub host: Option<String>,

    /// Server port
    pub port: Option<u16>,

    /// Database index selected on every connection
    pub db: Option<i64>,

    /// Default time-to-live in seconds (`0` or absent = no expiration)
    pub ttl: Option<u64>,

    /// Authentication password
    #[serde(alias = "auth_pass")]
    pub password: Option<String>,

    /// Connection string, overrides host/port/db/ttl/password when valid
    pub url: Option<String>,

    /// Store-wide compression policy
    pub compress: Compression,

    /// Connections opened eagerly by `warm_up`
    pub min_connections: usize,

    /// Upper bound on live connections
    pub max_connections: usize,

    /// Timeout for establishing a new connection (seconds)
    pub connect_timeout_secs: u64,

    /// Timeout for waiting on a free pooled connection (seconds)
    pub acquire_timeout_secs: u64,

    /// Merge concurrent single-key reads into one multi-key fetch
    pub coalesce_reads: bool,

    /// Custom cacheable-value predicate
    #[serde(skip)]
    pub is_cacheable_value: Option<CacheablePredicate>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            db: None,
            ttl: None,
            password: None,
            url: None,
            compress: Compression::Disabled,
            min_connections: 0,
            max_connections: 10,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            coalesce_reads: false,
            is_cacheable_value: None,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("ttl", &self.ttl)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("url", &self.url.as_deref().map(sanitize_url))
            .field("compress", &self.compress)
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("coalesce_reads", &self.coalesce_reads)
            .field("is_cacheable_value", &self.is_cacheable_value.is_some())
            .finish()
    }
}

impl StoreConfig {
    /// Creates a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the database index
    pub fn db(mut self, db: i64) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the default TTL in seconds
    pub fn ttl(mut self, seconds: u64) -> Self {
        self.ttl = Some(seconds);
        self
    }

    /// Sets the authentication password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the connection string
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the store-wide compression policy
    pub fn compress(mut self, compression: impl Into<Compression>) -> Self {
        self.compress = compression.into();
        self
    }

    /// Sets the pool bounds
    pub fn pool_size(mut self, min: usize, max: usize) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    /// Sets the connect and acquire timeouts (seconds)
    pub fn timeouts(mut self, connect_secs: u64, acquire_secs: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.acquire_timeout_secs = acquire_secs;
        self
    }

    /// Enables or disables read coalescing
    pub fn coalesce_reads(mut self, enabled: bool) -> Self {
        self.coalesce_reads = enabled;
        self
    }

    /// Overrides the cacheable-value predicate
    pub fn is_cacheable_value<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&JsonValue) -> bool + Send + Sync + 'static,
    {
        self.is_cacheable_value = Some(std::sync::Arc::new(predicate));
        self
    }

    /// Loads a configuration from environment variables
    ///
    /// # Environment Variables
    ///
    /// All are optional:
    ///
    /// - `REDIS_URL`: connection string
    /// - `REDIS_HOST`, `REDIS_PORT`, `REDIS_DB`, `REDIS_PASSWORD`
    /// - `CACHE_TTL`: default TTL in seconds
    /// - `CACHE_COMPRESS`: `true`/`false`
    /// - `REDIS_POOL_MIN`, `REDIS_POOL_MAX`: pool bounds
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a numeric or boolean variable does not
    /// parse.
    pub fn from_env() -> StoreResult<Self> {
        // Load .env if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let compress = parse_var::<bool>(&lookup, "CACHE_COMPRESS")?
            .map(Compression::from)
            .unwrap_or(defaults.compress);

        Ok(Self {
            host: lookup("REDIS_HOST"),
            port: parse_var(&lookup, "REDIS_PORT")?,
            db: parse_var(&lookup, "REDIS_DB")?,
            ttl: parse_var(&lookup, "CACHE_TTL")?,
            password: lookup("REDIS_PASSWORD"),
            url: lookup("REDIS_URL"),
            compress,
            min_connections: parse_var(&lookup, "REDIS_POOL_MIN")?
                .unwrap_or(defaults.min_connections),
            max_connections: parse_var(&lookup, "REDIS_POOL_MAX")?
                .unwrap_or(defaults.max_connections),
            ..defaults
        })
    }

    /// Produces the effective configuration
    ///
    /// Works on a copy: `self` is left untouched, and the predicate bound into
    /// the result is the custom one if set, otherwise the default policy.
    pub fn resolve(&self) -> ResolvedConfig {
        let overrides = self
            .url
            .as_deref()
            .and_then(|url| {
                let parsed = parse_connection_string(url);
                if parsed.is_none() {
                    debug!(
                        url = %sanitize_url(url),
                        "Ignoring unparsable connection string, using explicit fields"
                    );
                }
                parsed
            })
            .unwrap_or_default();

        let mut max_connections = self.max_connections;
        if max_connections == 0 {
            warn!("max_connections is 0, raising to 1");
            max_connections = 1;
        }

        let mut min_connections = self.min_connections;
        if min_connections > max_connections {
            warn!(
                min_connections,
                max_connections, "min_connections exceeds max_connections, clamping"
            );
            min_connections = max_connections;
        }

        ResolvedConfig {
            host: overrides
                .host
                .or_else(|| self.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: overrides.port.or(self.port).unwrap_or(DEFAULT_PORT),
            db: overrides.db.or(self.db).unwrap_or(DEFAULT_DB),
            ttl: overrides.ttl.or(self.ttl),
            password: overrides.password.or_else(|| self.password.clone()),
            compress: self.compress,
            min_connections,
            max_connections,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            coalesce_reads: self.coalesce_reads,
            is_cacheable_value: self
                .is_cacheable_value
                .clone()
                .unwrap_or_else(default_predicate),
        }
    }
}

/// Effective configuration the store runs with
#[derive(Clone)]
pub struct ResolvedConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Database index
    pub db: i64,

    /// Default TTL in seconds
    pub ttl: Option<u64>,

    /// Authentication password
    pub password: Option<String>,

    /// Store-wide compression policy
    pub compress: Compression,

    /// Connections opened eagerly
    pub min_connections: usize,

    /// Upper bound on live connections
    pub max_connections: usize,

    /// Timeout for establishing a connection
    pub connect_timeout: Duration,

    /// Timeout for waiting on a free connection
    pub acquire_timeout: Duration,

    /// Read coalescing switch
    pub coalesce_reads: bool,

    /// Effective cacheable-value predicate
    pub is_cacheable_value: CacheablePredicate,
}

impl ResolvedConfig {
    /// Applies the effective cacheable-value predicate
    pub fn is_cacheable(&self, value: &JsonValue) -> bool {
        (self.is_cacheable_value)(value)
    }

    /// Returns `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("ttl", &self.ttl)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("compress", &self.compress)
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("coalesce_reads", &self.coalesce_reads)
            .finish_non_exhaustive()
    }
}

/// Fields extracted from a connection string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOverrides {
    /// Host component
    pub host: Option<String>,

    /// Port component
    pub port: Option<u16>,

    /// Database index from the path
    pub db: Option<i64>,

    /// `ttl` query parameter
    pub ttl: Option<u64>,

    /// Password component
    pub password: Option<String>,
}

/// Parses `scheme://[:password@]host[:port][/db][?ttl=N]`
///
/// Returns `None` if the string is not a URL, has no host, or carries a db or
/// ttl that is not a non-negative integer.
pub fn parse_connection_string(input: &str) -> Option<ConnectionOverrides> {
    let url = Url::parse(input).ok()?;

    let host = url.host_str().filter(|host| !host.is_empty())?.to_string();

    let db = match url.path().trim_start_matches('/') {
        "" => None,
        path => Some(path.parse::<i64>().ok().filter(|db| *db >= 0)?),
    };

    let ttl = match url.query_pairs().find(|(name, _)| name == "ttl") {
        Some((_, value)) => Some(value.parse::<u64>().ok()?),
        None => None,
    };

    let password = url
        .password()
        .filter(|password| !password.is_empty())
        .map(str::to_string);

    Some(ConnectionOverrides {
        host: Some(host),
        port: url.port(),
        db,
        ttl,
        password,
    })
}

/// Masks credentials in a connection string for logging
///
/// Replaces everything between `://` and `@` with `***:***`.
pub fn sanitize_url(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(scheme_end) = url.find("://") {
            if scheme_end < at_pos {
                let scheme = &url[..scheme_end + 3];
                let host = &url[at_pos + 1..];
                return format!("{}***:***@{}", scheme, host);
            }
        }
    }
    url.to_string()
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> StoreResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StoreError::Configuration(format!("{} is invalid: {}", name, e))),
        None => Ok(None),
    }
}
