//! Coalescing of concurrent identical reads.
//!
//! # Data Flow
//! ```text
//! dedupe(key, produce):
//!     → entry(key) under the shard lock (lookup-or-insert, no await)
//!         Occupied → join the existing shared future
//!         Vacant   → spawn produce() as a task, insert its shared handle
//!     → await the shared result (or the caller's cancellation)
//!     → task completion removes the entry, success or failure
//! ```
//!
//! # Design Decisions
//! - The underlying call runs in its own task, so a cancelled caller only detaches itself
//! - Entries carry an id; completion removes only the entry it created

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};
use crate::observability::metrics;

/// Identity of a deduplicable read: method, URL and serialized params.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(method: &str, url: &str, params: Option<&Value>) -> Self {
        let params = params
            .map(|p| p.to_string())
            .unwrap_or_else(|| "{}".to_string());
        Self(format!("{} {} {}", method.to_uppercase(), url, params))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type SharedResult<T> = Shared<BoxFuture<'static, ApiResult<T>>>;

struct InFlight<T: Clone> {
    id: u64,
    future: SharedResult<T>,
    waiters: Arc<AtomicUsize>,
}

/// Decrements the waiter count however the caller leaves.
struct WaiterGuard(Arc<AtomicUsize>);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// At most one underlying call per key while any caller is waiting.
pub struct RequestDeduplicator<T: Clone = Value> {
    in_flight: Arc<DashMap<RequestKey, InFlight<T>>>,
    next_id: AtomicU64,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub async fn dedupe<F, Fut>(&self, key: RequestKey, produce: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        self.dedupe_with_cancel(key, None, produce).await
    }

    /// Like [`dedupe`](Self::dedupe), but `cancel` detaches this caller only.
    ///
    /// `produce` runs under the map's shard lock and must only build the future.
    pub async fn dedupe_with_cancel<F, Fut>(
        &self,
        key: RequestKey,
        cancel: Option<&CancellationToken>,
        produce: F,
    ) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let (future, waiters, hit) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let in_flight = entry.get();
                in_flight.waiters.fetch_add(1, Ordering::SeqCst);
                (in_flight.future.clone(), Arc::clone(&in_flight.waiters), true)
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let future = self.spawn_call(key.clone(), id, produce());
                let waiters = Arc::new(AtomicUsize::new(1));
                entry.insert(InFlight {
                    id,
                    future: future.clone(),
                    waiters: Arc::clone(&waiters),
                });
                (future, waiters, false)
            }
        };
        let _guard = WaiterGuard(waiters);

        metrics::record_dedup(hit);
        if hit {
            tracing::debug!(key = %key, "Joined in-flight request");
        }

        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ApiError::Cancelled),
                    result = future => result,
                }
            }
            None => future.await,
        }
    }

    fn spawn_call<Fut>(&self, key: RequestKey, id: u64, call: Fut) -> SharedResult<T>
    where
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let map = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = call.await;
            map.remove_if(&task_key, |_, entry| entry.id == id);
            result
        });

        let map = Arc::clone(&self.in_flight);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    map.remove_if(&key, |_, entry| entry.id == id);
                    tracing::error!(key = %key, error = %e, "Deduplicated request task failed");
                    Err(ApiError::network(format!("request task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared()
    }

    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_pending(&self, key: &RequestKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Callers currently waiting on `key`, zero when nothing is in flight.
    pub fn waiters(&self, key: &RequestKey) -> usize {
        self.in_flight
            .get(key)
            .map(|entry| entry.waiters.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> fmt::Debug for RequestDeduplicator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("pending", &self.in_flight.len())
            .finish()
    }
}
