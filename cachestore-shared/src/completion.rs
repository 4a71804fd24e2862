/// Callback and deferred completion styles
///
/// Store operations are plain `async fn`s: awaiting them is the deferred
/// style. Callers that prefer a completion callback wrap the same future with
/// [`with_callback`], which runs it on the Tokio runtime and hands the result
/// to the callback. [`complete`] picks between the two at runtime, for callers
/// that forward an optional callback from their own API.
///
/// # Example
///
/// ```no_run
/// use cachestore_shared::completion::{complete, Completion};
/// use cachestore_shared::error::StoreResult;
///
/// # async fn example() {
/// async fn lookup() -> StoreResult<Option<String>> {
///     Ok(Some("bar".to_string()))
/// }
///
/// // Callback style
/// let handle = complete(lookup(), Some(|result: StoreResult<Option<String>>| {
///     println!("lookup finished: {:?}", result);
/// }));
///
/// // Deferred style
/// let no_callback: Option<fn(StoreResult<Option<String>>)> = None;
/// if let Completion::Deferred(future) = complete(lookup(), no_callback) {
///     let value = future.await;
/// }
/// # }
/// ```

use crate::error::StoreResult;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio::task::JoinHandle;

/// A boxed, sendable operation future
pub type Deferred<T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'static>>;

/// How an operation will complete
pub enum Completion<T> {
    /// The callback will be invoked from a spawned task
    Callback(JoinHandle<()>),

    /// The caller awaits the result
    Deferred(Deferred<T>),
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Callback(_) => f.write_str("Completion::Callback"),
            Completion::Deferred(_) => f.write_str("Completion::Deferred"),
        }
    }
}

impl<T> Completion<T> {
    /// Waits for the operation regardless of style
    ///
    /// For the callback style this resolves once the callback has run and
    /// yields `None`; for the deferred style it yields the result.
    pub async fn wait(self) -> Option<StoreResult<T>> {
        match self {
            Completion::Callback(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Completion callback task failed");
                }
                None
            }
            Completion::Deferred(future) => Some(future.await),
        }
    }
}

/// Runs `future` and passes its result to `callback`
///
/// Must be called from within a Tokio runtime.
pub fn with_callback<T, Fut, F>(future: Fut, callback: F) -> JoinHandle<()>
where
    T: Send + 'static,
    Fut: Future<Output = StoreResult<T>> + Send + 'static,
    F: FnOnce(StoreResult<T>) + Send + 'static,
{
    tokio::spawn(async move {
        let result = future.await;
        callback(result);
    })
}

/// Uses the callback when one is given, otherwise returns the deferred future
pub fn complete<T, Fut, F>(future: Fut, callback: Option<F>) -> Completion<T>
where
    T: Send + 'static,
    Fut: Future<Output = StoreResult<T>> + Send + 'static,
    F: FnOnce(StoreResult<T>) + Send + 'static,
{
    match callback {
        Some(callback) => Completion::Callback(with_callback(future, callback)),
        None => Completion::Deferred(Box::pin(future)),
    }
}
