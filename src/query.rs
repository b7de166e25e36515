//! Reactive query observers.
//!
//! A [`QueryObserver`] is the UI-facing side of the cache: it subscribes to
//! one key, exposes `{data, status, error}` and refetches in the background
//! once the entry goes stale.
//!
//! # Example
//!
//! ```ignore
//! let backend = backend.clone();
//! let mut stats = client.use_query(pdv::keys::dashboard_stats(), move || {
//!     let backend = backend.clone();
//!     async move { backend.call("get_dashboard_stats", json!({})).await }
//! });
//!
//! // In the event loop tick
//! if stats.poll() {
//!     // State changed, redraw
//! }
//!
//! match stats.status() {
//!     QueryStatus::Loading => render_skeleton(),
//!     _ => render(stats.data()),
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::{Fetcher, QueryEntry, QueryKey, QueryStatus, Subscription};
use crate::remote::{RemoteError, RemoteResult};
use crate::retry::RetryPolicy;

/// A factory function that creates futures for fetching data
type LoaderFn<T> = Arc<dyn Fn() -> BoxFuture<'static, RemoteResult<T>> + Send + Sync>;

/// Snapshot of a query as seen by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryView<T> {
  pub data: Option<T>,
  pub status: QueryStatus,
  pub error: Option<RemoteError>,
  /// Background refetch running while `data` is shown
  pub is_fetching: bool,
}

impl<T> Default for QueryView<T> {
  fn default() -> Self {
    Self {
      data: None,
      status: QueryStatus::Idle,
      error: None,
      is_fetching: false,
    }
  }
}

impl<T: DeserializeOwned> QueryView<T> {
  fn from_entry(entry: &QueryEntry) -> Self {
    let (data, error) = match entry.data_as::<T>() {
      Ok(data) => (data, entry.error.clone()),
      Err(decode) => (None, Some(decode)),
    };
    Self {
      data,
      status: entry.status,
      error,
      is_fetching: entry.fetching,
    }
  }
}

/// Subscription to one cached query with automatic background refetch.
///
/// Not Clone: it owns its store subscription and notification channel.
pub struct QueryObserver<T> {
  fetcher: Fetcher,
  key: QueryKey,
  loader: LoaderFn<T>,
  retry: RetryPolicy,
  receiver: mpsc::UnboundedReceiver<QueryEntry>,
  _subscription: Subscription,
  view: QueryView<T>,
  task: Option<JoinHandle<()>>,
}

impl<T> QueryObserver<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  pub(crate) fn new<F, Fut>(fetcher: Fetcher, key: QueryKey, loader: F, retry: RetryPolicy) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<T>> + Send + 'static,
  {
    let (tx, receiver) = mpsc::unbounded_channel();
    let subscription = fetcher.store().subscribe(&key, move |entry| {
      // Receiver gone means the observer is being dropped
      let _ = tx.send(entry.clone());
    });

    let view = fetcher
      .store()
      .get(&key)
      .map(|entry| QueryView::from_entry(&entry))
      .unwrap_or_default();

    Self {
      fetcher,
      key,
      loader: Arc::new(move || loader().boxed()),
      retry,
      receiver,
      _subscription: subscription,
      view,
      task: None,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn view(&self) -> &QueryView<T> {
    &self.view
  }

  pub fn data(&self) -> Option<&T> {
    self.view.data.as_ref()
  }

  pub fn status(&self) -> QueryStatus {
    self.view.status
  }

  pub fn error(&self) -> Option<&RemoteError> {
    self.view.error.as_ref()
  }

  /// Nothing to show yet and a fetch is running.
  pub fn is_loading(&self) -> bool {
    self.view.status == QueryStatus::Loading
  }

  pub fn is_stale(&self) -> bool {
    self.view.status == QueryStatus::Stale
  }

  /// Whether this observer has a fetch of its own still running.
  pub fn is_fetching(&self) -> bool {
    self.task.as_ref().is_some_and(|task| !task.is_finished())
  }

  /// Fetch through the cache. No-op while a fetch is already running.
  pub fn fetch(&mut self) {
    self.spawn(false);
  }

  /// Fetch ignoring freshness. No-op while a fetch is already running.
  pub fn refetch(&mut self) {
    self.spawn(true);
  }

  /// Apply pending store notifications without blocking.
  ///
  /// Returns `true` if the view changed. A stale entry triggers a
  /// background refetch. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(entry) = self.receiver.try_recv() {
      self.view = QueryView::from_entry(&entry);
      changed = true;
    }

    // The fetcher registry is authoritative; `is_fetching` on the view may lag
    if self.view.status == QueryStatus::Stale && !self.fetcher.is_pending(&self.key) {
      self.task = Some(self.spawn_task(true));
    }
    changed
  }

  /// Wait for the next store notification, then behave like [`poll`](Self::poll).
  pub async fn changed(&mut self) -> bool {
    match self.receiver.recv().await {
      Some(entry) => {
        self.view = QueryView::from_entry(&entry);
        self.poll();
        true
      }
      None => false,
    }
  }

  fn spawn(&mut self, force: bool) {
    if self.is_fetching() {
      return;
    }
    self.task = Some(self.spawn_task(force));
  }

  fn spawn_task(&self, force: bool) -> JoinHandle<()> {
    let fetcher = self.fetcher.clone();
    let key = self.key.clone();
    let loader = Arc::clone(&self.loader);
    let retry = self.retry;
    let load = move || async move { retry.run(|| loader()).await };

    tokio::spawn(async move {
      // Outcome lands in the store and reaches us through the subscription
      let _ = if force {
        fetcher.refetch::<T, _, _>(&key, load).await
      } else {
        fetcher.fetch::<T, _, _>(&key, load).await
      };
    })
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .field("view", &self.view)
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}
