/// Cursor-driven, deduplicated key enumeration
///
/// Redis SCAN walks the keyspace in steps. Each step takes a cursor and
/// returns the next cursor plus a batch of keys. Iteration is complete when the
/// server hands back cursor `0` again. The same key may appear in more than one
/// batch (rehashing, cluster slots), so results are deduplicated here.
///
/// # State machine
///
/// ```text
/// Start (cursor = 0)
///    │
///    ▼
/// Fetching ──step(cursor)──> (next, keys)
///    │   merge keys into seen-set, cursor = next
///    ├── next != 0 ──> Fetching
///    ├── next == 0 ──> Done(keys in discovery order)
///    └── step error ──> Failed(error)  (no further steps)
/// ```
///
/// The loop is generic over [`ScanCursor`], so it can be driven by a live
/// connection ([`RedisScan`]) or by a scripted cursor in tests.

use crate::pool::command_error;
use async_trait::async_trait;
use cachestore_shared::error::StoreResult;
use redis::aio::ConnectionLike;
use std::collections::HashSet;
use tracing::{trace, warn};

/// Cursor value that starts and ends an iteration
pub const INITIAL_CURSOR: u64 = 0;

/// Transient state of one `keys()` call
#[derive(Debug, Default)]
pub struct ScanState {
    cursor: u64,
    steps: usize,
    seen: HashSet<String>,
    keys: Vec<String>,
}

impl ScanState {
    /// Creates state positioned at the initial cursor
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor to send with the next step
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of steps merged so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Merges one step's reply
    ///
    /// Keys already seen are skipped; new ones keep their discovery order.
    pub fn merge(&mut self, next_cursor: u64, batch: Vec<String>) {
        for key in batch {
            if self.seen.insert(key.clone()) {
                self.keys.push(key);
            }
        }
        self.cursor = next_cursor;
        self.steps += 1;
    }

    /// `true` once at least one step ran and the cursor is back at the start
    pub fn is_exhausted(&self) -> bool {
        self.steps > 0 && self.cursor == INITIAL_CURSOR
    }

    /// Consumes the state, yielding keys in discovery order
    pub fn into_keys(self) -> Vec<String> {
        self.keys
    }
}

/// One SCAN-style step source
///
/// `step` receives the current cursor and returns `(next_cursor, keys)`.
#[async_trait]
pub trait ScanCursor: Send {
    /// Performs one step from `cursor`
    async fn step(&mut self, cursor: u64) -> StoreResult<(u64, Vec<String>)>;
}

/// Runs the scan loop to completion
///
/// # Errors
///
/// The first step error ends the iteration and is returned as is.
pub async fn scan_keys<S>(source: &mut S) -> StoreResult<Vec<String>>
where
    S: ScanCursor + ?Sized,
{
    let mut state = ScanState::new();

    while !state.is_exhausted() {
        let (next_cursor, batch) = source.step(state.cursor()).await?;
        trace!(
            cursor = state.cursor(),
            next_cursor,
            batch_size = batch.len(),
            "SCAN step"
        );
        state.merge(next_cursor, batch);
    }

    trace!(steps = state.steps(), "SCAN complete");
    Ok(state.into_keys())
}

/// SCAN over a borrowed Redis connection
///
/// The connection stays borrowed for the whole iteration.
pub struct RedisScan<'a, C> {
    conn: &'a mut C,
    pattern: &'a str,
    count: usize,
}

impl<'a, C> RedisScan<'a, C> {
    /// Scans keys matching `pattern`, hinting `count` entries per step
    pub fn new(conn: &'a mut C, pattern: &'a str, count: usize) -> Self {
        Self {
            conn,
            pattern,
            count,
        }
    }
}

#[async_trait]
impl<'a, C> ScanCursor for RedisScan<'a, C>
where
    C: ConnectionLike + Send,
{
    async fn step(&mut self, cursor: u64) -> StoreResult<(u64, Vec<String>)> {
        scan_step(self.conn, cursor, self.pattern, self.count).await
    }
}

/// Issues one `SCAN cursor MATCH pattern COUNT count` on `conn`
///
/// Keys are read as raw bytes; a key that is not valid UTF-8 is listed with
/// its invalid sequences replaced by U+FFFD.
pub async fn scan_step<C>(
    conn: &mut C,
    cursor: u64,
    pattern: &str,
    count: usize,
) -> StoreResult<(u64, Vec<String>)>
where
    C: ConnectionLike + Send,
{
    let (next_cursor, raw): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
        .arg(cursor)
        .arg("MATCH")
        .arg(pattern)
        .arg("COUNT")
        .arg(count)
        .query_async(conn)
        .await
        .map_err(command_error)?;

    Ok((next_cursor, raw.into_iter().map(key_from_bytes).collect()))
}

fn key_from_bytes(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(key) => key,
        Err(e) => {
            let key = String::from_utf8_lossy(e.as_bytes()).into_owned();
            warn!(key = %key, "SCAN returned a key that is not valid UTF-8");
            key
        }
    }
}
