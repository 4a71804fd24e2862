/// Serialization codec for stored values
///
/// Values are stored as JSON text. When a compression policy is active the
/// JSON bytes are additionally compressed, and the payload becomes binary.
///
/// # Payload format
///
/// ```text
/// Compression::Disabled      →  {"name":"alice"}            (UTF-8 JSON)
/// Compression::Enabled(zstd) →  zstd(  {"name":"alice"}  )  (binary)
/// Compression::Enabled(gzip) →  gzip(  {"name":"alice"}  )  (binary)
/// ```
///
/// An empty serialized representation is stored as the `undefined`
/// placeholder so that "explicitly stored nothing" stays distinguishable from
/// "key absent". The placeholder decodes to JSON `null`.
///
/// Decoding must use the same policy as encoding. Reading a compressed payload
/// without compression (or the reverse) yields a codec error or garbage.
///
/// # Example
///
/// ```
/// use cachestore_shared::codec::{decode, encode, Compression};
/// use serde_json::json;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let value = json!({"user": "alice", "visits": 3});
///
/// let compressed = Compression::from(true);
/// let bytes = encode(&value, &compressed)?;
/// assert_eq!(decode(&bytes, &compressed)?, value);
/// # Ok(())
/// # }
/// ```

use crate::error::{StoreError, StoreResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::io::{Read, Write};

/// Token stored in place of an empty serialized representation
pub const UNDEFINED_PLACEHOLDER: &str = "undefined";

/// Default zstd level: favors speed over ratio
pub const DEFAULT_ZSTD_LEVEL: i32 = 1;

/// Default gzip level: favors speed over ratio
pub const DEFAULT_GZIP_LEVEL: u32 = 1;

/// Compression algorithm applied to serialized payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Zstandard
    #[default]
    Zstd,

    /// Gzip (DEFLATE)
    Gzip,
}

/// Algorithm and tuning parameters for compressed payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// Algorithm to use
    #[serde(rename = "type", default)]
    pub algorithm: CompressionAlgorithm,

    /// Compression level
    ///
    /// `None` picks the fastest sensible level for the algorithm.
    /// zstd accepts 1..=22, gzip accepts 0..=9 (values above 9 are clamped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
}

impl CompressionSettings {
    /// Settings for the given algorithm at its default (speed) level
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self {
            algorithm,
            level: None,
        }
    }

    /// Overrides the compression level
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = Some(level);
        self
    }

    fn zstd_level(&self) -> i32 {
        self.level.unwrap_or(DEFAULT_ZSTD_LEVEL)
    }

    fn gzip_level(&self) -> u32 {
        self.level
            .map(|level| level.clamp(0, 9) as u32)
            .unwrap_or(DEFAULT_GZIP_LEVEL)
    }
}

/// Compression policy for a store or a single operation
///
/// Deserializes from either a boolean or a settings object:
///
/// ```json
/// true
/// false
/// { "type": "gzip", "level": 6 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "CompressionRepr", into = "CompressionRepr")]
pub enum Compression {
    /// Store plain JSON text
    #[default]
    Disabled,

    /// Compress the JSON text with the given settings
    Enabled(CompressionSettings),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CompressionRepr {
    Flag(bool),
    Settings(CompressionSettings),
}

impl From<CompressionRepr> for Compression {
    fn from(repr: CompressionRepr) -> Self {
        match repr {
            CompressionRepr::Flag(flag) => Compression::from(flag),
            CompressionRepr::Settings(settings) => Compression::Enabled(settings),
        }
    }
}

impl From<Compression> for CompressionRepr {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::Disabled => CompressionRepr::Flag(false),
            Compression::Enabled(settings) => CompressionRepr::Settings(settings),
        }
    }
}

impl From<bool> for Compression {
    /// `true` expands to zstd at its speed-tuned default level
    fn from(enabled: bool) -> Self {
        if enabled {
            Compression::Enabled(CompressionSettings::default())
        } else {
            Compression::Disabled
        }
    }
}

impl From<CompressionSettings> for Compression {
    fn from(settings: CompressionSettings) -> Self {
        Compression::Enabled(settings)
    }
}

impl Compression {
    /// Returns `true` if payloads are compressed under this policy
    pub fn is_enabled(&self) -> bool {
        matches!(self, Compression::Enabled(_))
    }

    /// Picks the effective policy for one operation
    ///
    /// A per-call policy always wins, including an explicit
    /// `Compression::Disabled` over a store default that compresses.
    pub fn resolve(store_default: &Compression, per_call: Option<&Compression>) -> Compression {
        per_call.copied().unwrap_or(*store_default)
    }
}

/// Serializes a value into its stored payload
///
/// # Errors
///
/// Returns a codec error if compression fails.
pub fn encode(value: &JsonValue, compression: &Compression) -> StoreResult<Vec<u8>> {
    let mut text = serde_json::to_vec(value)?;
    if text.is_empty() {
        text = UNDEFINED_PLACEHOLDER.as_bytes().to_vec();
    }

    match compression {
        Compression::Disabled => Ok(text),
        Compression::Enabled(settings) => compress(&text, settings),
    }
}

/// Restores a value from its stored payload
///
/// # Errors
///
/// Returns a codec error if decompression fails or the bytes are not JSON.
pub fn decode(bytes: &[u8], compression: &Compression) -> StoreResult<JsonValue> {
    let text: Cow<'_, [u8]> = match compression {
        Compression::Disabled => Cow::Borrowed(bytes),
        Compression::Enabled(settings) => Cow::Owned(decompress(bytes, settings)?),
    };

    if text.as_ref() == UNDEFINED_PLACEHOLDER.as_bytes() {
        return Ok(JsonValue::Null);
    }

    Ok(serde_json::from_slice(&text)?)
}

/// Converts an application value into the JSON model the store works on
pub fn to_json<V: Serialize + ?Sized>(value: &V) -> StoreResult<JsonValue> {
    Ok(serde_json::to_value(value)?)
}

/// Converts a decoded JSON value back into the caller's type
pub fn from_json<V: DeserializeOwned>(value: JsonValue) -> StoreResult<V> {
    serde_json::from_value(value).map_err(|e| StoreError::Codec(format!("JSON error: {}", e)))
}

fn compress(bytes: &[u8], settings: &CompressionSettings) -> StoreResult<Vec<u8>> {
    match settings.algorithm {
        CompressionAlgorithm::Zstd => Ok(zstd::stream::encode_all(bytes, settings.zstd_level())?),
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(
                Vec::with_capacity(bytes.len() / 2),
                flate2::Compression::new(settings.gzip_level()),
            );
            encoder.write_all(bytes)?;
            Ok(encoder.finish()?)
        }
    }
}

fn decompress(bytes: &[u8], settings: &CompressionSettings) -> StoreResult<Vec<u8>> {
    match settings.algorithm {
        CompressionAlgorithm::Zstd => Ok(zstd::stream::decode_all(bytes)?),
        CompressionAlgorithm::Gzip => {
            let mut out = Vec::with_capacity(bytes.len() * 2);
            GzDecoder::new(bytes).read_to_end(&mut out)?;
            Ok(out)
        }
    }
}
