//! Deduplicating fetcher that fills the query store.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::key::QueryKey;
use super::store::QueryStore;
use crate::remote::{ErrorKind, RemoteError, RemoteResult};

type SharedFetch = Shared<BoxFuture<'static, RemoteResult<Value>>>;

/// Runs loaders on behalf of the store, at most one per key at a time.
///
/// Concurrent requests for the same key attach to the call already in
/// flight. The call itself runs on a spawned task, so a caller that stops
/// waiting does not cancel it: the result is still cached when it settles.
#[derive(Clone)]
pub struct Fetcher {
  store: QueryStore,
  pending: Arc<Mutex<HashMap<QueryKey, SharedFetch>>>,
  /// How long a successful entry is served without calling the loader
  stale_time: Duration,
}

impl Fetcher {
  pub fn new(store: QueryStore) -> Self {
    Self {
      store,
      pending: Arc::new(Mutex::new(HashMap::new())),
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn stale_time(&self) -> Duration {
    self.stale_time
  }

  pub fn store(&self) -> &QueryStore {
    &self.store
  }

  /// Whether a loader is currently running for `key`.
  pub fn is_pending(&self, key: &QueryKey) -> bool {
    lock(&self.pending).contains_key(key)
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Fresh entry in the store: return it, `loader` is not called
  /// 2. Call already in flight for `key`: wait for it
  /// 3. Otherwise call `loader` and store the outcome
  pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, loader: F) -> RemoteResult<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = RemoteResult<T>> + Send + 'static,
  {
    if let Some(entry) = self.store.get(key) {
      if entry.is_fresh(self.stale_time) {
        if let Some(data) = entry.data_as::<T>()? {
          tracing::debug!(%key, "cache hit");
          return Ok(data);
        }
      }
    }

    self.refetch(key, loader).await
  }

  /// Like [`fetch`](Self::fetch) but ignores freshness.
  ///
  /// Still joins a call already in flight for `key`.
  pub async fn refetch<T, F, Fut>(&self, key: &QueryKey, loader: F) -> RemoteResult<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = RemoteResult<T>> + Send + 'static,
  {
    let value = self.start(key, loader).await?;
    Ok(serde_json::from_value(value)?)
  }

  fn start<T, F, Fut>(&self, key: &QueryKey, loader: F) -> SharedFetch
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = RemoteResult<T>> + Send + 'static,
  {
    let (tx, rx) = oneshot::channel::<RemoteResult<Value>>();
    let shared = {
      let mut pending = lock(&self.pending);
      if let Some(in_flight) = pending.get(key) {
        tracing::debug!(%key, "joining in-flight fetch");
        return in_flight.clone();
      }

      let shared = async move {
        rx.await
          .unwrap_or_else(|_| Err(RemoteError::unknown("fetch task was dropped")))
      }
      .boxed()
      .shared();
      pending.insert(key.clone(), shared.clone());
      shared
    };

    // Listeners run here, after the registry lock is released
    let epoch = self.store.epoch(key);
    self.store.begin_fetch(key);
    tracing::debug!(%key, fingerprint = %key.fingerprint(), "fetch started");

    let future = loader();
    let store = self.store.clone();
    let pending = Arc::clone(&self.pending);
    let key = key.clone();

    tokio::spawn(async move {
      let result = match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result.and_then(|data| Ok(serde_json::to_value(data)?)),
        Err(_) => Err(RemoteError::unknown("loader panicked")),
      };

      if let Err(error) = &result {
        if error.kind == ErrorKind::Unknown {
          tracing::error!(%key, %error, "fetch failed");
        } else {
          tracing::debug!(%key, %error, "fetch failed");
        }
      }

      // Cleared before listeners run, so a listener may start the next fetch
      lock(&pending).remove(&key);
      store.settle(&key, &result, epoch);
      // Every waiter may have gone away
      let _ = tx.send(result);
    });

    shared
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
