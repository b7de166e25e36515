//! The query client: one explicitly constructed coordinator per application.

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::cache::{
  Fetcher, InvalidationRouter, KeyPattern, MutationRequest, Mutator, QueryEntry, QueryKey,
  QueryStore,
};
use crate::config::Config;
use crate::query::QueryObserver;
use crate::remote::{RemoteCall, RemoteResult};
use crate::retry::RetryPolicy;

/// A cacheable read bound to a remote procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuery {
  pub key: QueryKey,
  pub procedure: String,
  pub args: Value,
}

impl RemoteQuery {
  pub fn new(key: QueryKey, procedure: impl Into<String>, args: Value) -> Self {
    Self {
      key,
      procedure: procedure.into(),
      args,
    }
  }
}

/// A mutation bound to the table or procedure it writes to.
#[derive(Debug)]
pub struct RemoteWrite {
  pub target: String,
  pub request: MutationRequest,
}

impl RemoteWrite {
  pub fn new(target: impl Into<String>, request: MutationRequest) -> Self {
    Self {
      target: target.into(),
      request,
    }
  }
}

/// Store, fetcher, mutator and router wired together.
///
/// Create one at application start with [`QueryClient::new`] and pass it by
/// reference (or clone the handle); call [`shutdown`](Self::shutdown) on
/// exit or test teardown.
#[derive(Clone)]
pub struct QueryClient {
  store: QueryStore,
  fetcher: Fetcher,
  mutator: Mutator,
  retry: RetryPolicy,
}

impl QueryClient {
  pub fn new(router: InvalidationRouter) -> Self {
    let store = QueryStore::new();
    let fetcher = Fetcher::new(store.clone());
    let mutator = Mutator::new(store.clone(), Arc::new(router));
    Self {
      store,
      fetcher,
      mutator,
      retry: RetryPolicy::default(),
    }
  }

  /// Client configured from the `cache`, `retry` and `invalidations` sections.
  pub fn from_config(config: &Config) -> Self {
    Self::new(config.router())
      .with_stale_time(config.stale_time())
      .with_retry(config.retry)
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.fetcher = self.fetcher.with_stale_time(stale_time);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn store(&self) -> &QueryStore {
    &self.store
  }

  pub fn fetcher(&self) -> &Fetcher {
    &self.fetcher
  }

  pub fn router(&self) -> &InvalidationRouter {
    self.mutator.router()
  }

  pub fn get(&self, key: &QueryKey) -> Option<QueryEntry> {
    self.store.get(key)
  }

  pub fn invalidate(&self, pattern: &KeyPattern) -> Vec<QueryKey> {
    self.store.invalidate(pattern)
  }

  /// One-shot cached read. Does not retry.
  pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, loader: F) -> RemoteResult<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = RemoteResult<T>> + Send + 'static,
  {
    self.fetcher.fetch(key, loader).await
  }

  /// Subscribe to `key` and start loading it.
  ///
  /// Network failures are retried with the client's [`RetryPolicy`].
  pub fn use_query<T, F, Fut>(&self, key: QueryKey, loader: F) -> QueryObserver<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<T>> + Send + 'static,
  {
    let mut observer = QueryObserver::new(self.fetcher.clone(), key, loader, self.retry);
    observer.fetch();
    observer
  }

  /// Run a write and invalidate what it affects.
  pub async fn use_mutation<T, F, Fut>(&self, request: MutationRequest, action: F) -> RemoteResult<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
  {
    self.mutator.mutate(request, action).await
  }

  /// Cached read of a remote procedure, retrying network failures.
  pub async fn fetch_remote(
    &self,
    backend: Arc<dyn RemoteCall>,
    query: &RemoteQuery,
  ) -> RemoteResult<Value> {
    let retry = self.retry;
    let procedure = query.procedure.clone();
    let args = query.args.clone();
    self
      .fetcher
      .fetch(&query.key, move || async move {
        retry
          .run(|| backend.call(&procedure, args.clone()))
          .await
      })
      .await
  }

  /// Observe a remote procedure.
  pub fn use_remote_query(
    &self,
    backend: Arc<dyn RemoteCall>,
    query: &RemoteQuery,
  ) -> QueryObserver<Value> {
    let procedure = query.procedure.clone();
    let args = query.args.clone();
    self.use_query(query.key.clone(), move || {
      let backend = Arc::clone(&backend);
      let procedure = procedure.clone();
      let args = args.clone();
      async move { backend.call(&procedure, args).await }
    })
  }

  /// Send a write to the backend through the mutator.
  pub async fn mutate_remote(
    &self,
    backend: Arc<dyn RemoteCall>,
    write: RemoteWrite,
  ) -> RemoteResult<Value> {
    let RemoteWrite { target, request } = write;
    let payload = request.payload.clone();
    self
      .mutator
      .mutate(request, || async move { backend.write(&target, payload).await })
      .await
  }

  /// Drop every cached entry and subscriber.
  ///
  /// Fetches still in flight complete for their callers but are not cached.
  pub fn shutdown(&self) {
    tracing::debug!(entries = self.store.len(), "query client shutting down");
    self.store.clear();
  }
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryClient")
      .field("store", &self.store)
      .field("stale_time", &self.fetcher.stale_time())
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}
