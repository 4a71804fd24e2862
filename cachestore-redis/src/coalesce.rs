/// Read coalescing: concurrent single-key reads become one multi-key fetch
///
/// When enabled, every `get` joins the currently open batch. The first caller
/// to open a batch spawns a leader task that yields once to let the batch fill
/// up, closes it, and issues a single MGET for the unique keys. The raw
/// payloads are then handed back to every waiter by key. Decoding stays with
/// each caller, so per-call options (compression) are unaffected.
///
/// ```text
/// get("a") ─┐
/// get("b") ─┼─> Batch{a, b, a} ──leader──> MGET a b ──> [pa, pb]
/// get("a") ─┘                                   │
///   <── pa ─────────────────────────────────────┤
///   <── pb ─────────────────────────────────────┤
///   <── pa ─────────────────────────────────────┘
/// ```
///
/// The fetch reports one result per key, so a failure tied to one key (such
/// as a key of the wrong type) reaches only the callers of that key. A failed
/// fetch as a whole fails every waiter of the batch with the same error.
/// Dropping a waiting caller does not affect the batch.

use cachestore_shared::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Raw payload of one key, `None` when absent
pub type Payload = Option<Vec<u8>>;

/// Outcome of reading one key within a batch
pub type KeyResult = StoreResult<Payload>;

type Waiter = oneshot::Sender<KeyResult>;

#[derive(Default)]
struct Batch {
    waiters: Vec<(String, Waiter)>,
}

impl Batch {
    fn unique_keys(&self) -> Vec<String> {
        let mut seen = HashSet::with_capacity(self.waiters.len());
        let mut keys = Vec::with_capacity(self.waiters.len());
        for (key, _) in &self.waiters {
            if seen.insert(key.as_str()) {
                keys.push(key.clone());
            }
        }
        keys
    }

    fn resolve(self, keys: &[String], result: StoreResult<Vec<KeyResult>>) {
        match result {
            Ok(results) if results.len() == keys.len() => {
                let by_key: HashMap<&str, &KeyResult> = keys
                    .iter()
                    .map(String::as_str)
                    .zip(results.iter())
                    .collect();
                for (key, waiter) in self.waiters {
                    let result = by_key.get(key.as_str()).map_or(Ok(None), |r| (*r).clone());
                    let _ = waiter.send(result);
                }
            }
            Ok(results) => {
                let error = StoreError::Command(format!(
                    "batch fetch returned {} results for {} keys",
                    results.len(),
                    keys.len()
                ));
                self.fail(error);
            }
            Err(error) => self.fail(error),
        }
    }

    fn fail(self, error: StoreError) {
        for (_, waiter) in self.waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}

/// Merges concurrent reads into batched fetches
#[derive(Clone, Default)]
pub struct ReadCoalescer {
    pending: Arc<Mutex<Option<Batch>>>,
}

impl std::fmt::Debug for ReadCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queued = self
            .pending
            .lock()
            .as_ref()
            .map(|batch| batch.waiters.len())
            .unwrap_or(0);
        f.debug_struct("ReadCoalescer").field("queued", &queued).finish()
    }
}

impl ReadCoalescer {
    /// Creates a coalescer with no open batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `key` as part of the current batch
    ///
    /// `fetch` is only invoked if this call opens a new batch; it receives the
    /// batch's unique keys and must return one result per key, in order.
    /// Must be called from within a Tokio runtime.
    pub async fn load<F, Fut>(&self, key: &str, fetch: F) -> StoreResult<Payload>
    where
        F: FnOnce(Vec<String>) -> Fut + Send + 'static,
        Fut: Future<Output = StoreResult<Vec<KeyResult>>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let opened = {
            let mut pending = self.pending.lock();
            let opened = pending.is_none();
            pending
                .get_or_insert_with(Batch::default)
                .waiters
                .push((key.to_string(), tx));
            opened
        };

        if opened {
            let pending = Arc::clone(&self.pending);
            tokio::spawn(async move {
                // Let the other reads issued in this tick join the batch
                tokio::task::yield_now().await;

                let Some(batch) = pending.lock().take() else {
                    return;
                };
                let keys = batch.unique_keys();
                debug!(
                    callers = batch.waiters.len(),
                    keys = keys.len(),
                    "Fetching coalesced batch"
                );

                let result = fetch(keys.clone()).await;
                if let Err(e) = &result {
                    warn!(error = %e, "Coalesced fetch failed");
                }
                batch.resolve(&keys, result);
            });
        }

        rx.await.map_err(|_| {
            StoreError::Command("coalesced read was abandoned before completion".to_string())
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload(text: &str) -> Payload {
        Some(text.as_bytes().to_vec())
    }

    fn counting_fetch(
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<Vec<String>>>>,
    ) -> impl FnOnce(Vec<String>) -> std::future::Ready<StoreResult<Vec<KeyResult>>> + Send + 'static
    {
        move |keys: Vec<String>| {
            calls.fetch_add(1, Ordering::SeqCst);
            seen.lock().push(keys.clone());
            let values = keys
                .iter()
                .map(|key| Ok(if key == "missing" { None } else { payload(key) }))
                .collect();
            std::future::ready(Ok(values))
        }
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_fetch() {
        let coalescer = ReadCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (a, b, a_again, missing) = tokio::join!(
            coalescer.load("a", counting_fetch(calls.clone(), seen.clone())),
            coalescer.load("b", counting_fetch(calls.clone(), seen.clone())),
            coalescer.load("a", counting_fetch(calls.clone(), seen.clone())),
            coalescer.load("missing", counting_fetch(calls.clone(), seen.clone())),
        );

        assert_eq!(a.unwrap(), payload("a"));
        assert_eq!(b.unwrap(), payload("b"));
        assert_eq!(a_again.unwrap(), payload("a"));
        assert_eq!(missing.unwrap(), None);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let mut fetched = seen.lock()[0].clone();
        fetched.sort();
        assert_eq!(fetched, vec!["a", "b", "missing"]);
    }

    #[tokio::test]
    async fn test_sequential_reads_use_separate_batches() {
        let coalescer = ReadCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        coalescer
            .load("a", counting_fetch(calls.clone(), seen.clone()))
            .await
            .unwrap();
        coalescer
            .load("b", counting_fetch(calls.clone(), seen.clone()))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_reaches_every_waiter() {
        let coalescer = ReadCoalescer::new();
        let failing = |_keys: Vec<String>| {
            std::future::ready(Err::<Vec<KeyResult>, _>(StoreError::PoolAcquisition(
                "refused".into(),
            )))
        };

        let (first, second) = tokio::join!(
            coalescer.load("a", failing),
            coalescer.load("b", failing),
        );

        let expected = StoreError::PoolAcquisition("refused".into());
        assert_eq!(first.unwrap_err(), expected);
        assert_eq!(second.unwrap_err(), expected);
    }

    #[tokio::test]
    async fn test_short_reply_fails_the_batch() {
        let coalescer = ReadCoalescer::new();
        let short = |_keys: Vec<String>| std::future::ready(Ok(Vec::<KeyResult>::new()));

        let err = coalescer.load("a", short).await.unwrap_err();
        assert!(matches!(err, StoreError::Command(_)));
    }

    #[tokio::test]
    async fn test_key_error_reaches_only_that_key() {
        let coalescer = ReadCoalescer::new();
        let wrong_type = StoreError::Command("WRONGTYPE".into());
        let expected = wrong_type.clone();
        let mixed = move |keys: Vec<String>| {
            let results: Vec<KeyResult> = keys
                .iter()
                .map(|key| {
                    if key == "hash" {
                        Err(wrong_type.clone())
                    } else {
                        Ok(payload(key))
                    }
                })
                .collect();
            std::future::ready(Ok(results))
        };

        let (hash, plain, hash_again) = tokio::join!(
            coalescer.load("hash", mixed),
            coalescer.load("plain", |_: Vec<String>| std::future::ready(Ok(Vec::new()))),
            coalescer.load("hash", |_: Vec<String>| std::future::ready(Ok(Vec::new()))),
        );

        assert_eq!(hash.unwrap_err(), expected);
        assert_eq!(hash_again.unwrap_err(), expected);
        assert_eq!(plain.unwrap(), payload("plain"));
    }
}
