//! # Cachestore Shared Library
//!
//! Backend-independent building blocks for cache stores: the error taxonomy,
//! configuration resolution, the payload codec, per-operation options, the
//! [`store::CacheStore`] contract and the callback/deferred completion adapter.
//!
//! Nothing in this crate performs network I/O. The Redis-backed store lives in
//! `cachestore-redis`.
//!
//! ## Module Organization
//!
//! - `config`: store configuration and connection-string resolution
//! - `codec`: JSON serialization with optional zstd/gzip compression
//! - `options`: per-operation options and the cacheable-value predicate
//! - `store`: the `CacheStore` trait
//! - `completion`: callback and deferred completion styles
//! - `error`: common error types

pub mod codec;
pub mod completion;
pub mod config;
pub mod error;
pub mod options;
pub mod store;

pub use codec::{Compression, CompressionAlgorithm, CompressionSettings};
pub use config::{ResolvedConfig, StoreConfig};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use options::OperationOptions;
pub use store::CacheStore;

/// Current version of the cachestore shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
