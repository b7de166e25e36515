//! Remote writes with optimistic updates and post-write invalidation.

use std::future::Future;

use serde_json::Value;

use super::entry::{QueryEntry, QueryStatus, Snapshot};
use super::key::{KeyPattern, QueryKey};
use super::router::InvalidationRouter;
use super::store::QueryStore;
use crate::remote::RemoteResult;

/// Predicts the new cached value of a key from its current one.
///
/// Returning `None` leaves the key untouched.
pub type Updater = Box<dyn FnOnce(Option<&Value>) -> Option<Value> + Send>;

/// A single remote write, created per call site.
pub struct MutationRequest {
  pub name: String,
  pub payload: Value,
  /// Patterns to invalidate on success, on top of the router's routes
  pub affected_keys: Vec<KeyPattern>,
  optimistic: Vec<(QueryKey, Updater)>,
}

impl MutationRequest {
  pub fn new(name: impl Into<String>, payload: Value) -> Self {
    Self {
      name: name.into(),
      payload,
      affected_keys: Vec::new(),
      optimistic: Vec::new(),
    }
  }

  pub fn affects(mut self, pattern: impl Into<KeyPattern>) -> Self {
    self.affected_keys.push(pattern.into());
    self
  }

  /// Write a predicted value for `key` before the action runs. It is rolled
  /// back if the action fails.
  pub fn optimistic<F>(mut self, key: QueryKey, update: F) -> Self
  where
    F: FnOnce(Option<&Value>) -> Option<Value> + Send + 'static,
  {
    self.optimistic.push((key, Box::new(update)));
    self
  }
}

impl std::fmt::Debug for MutationRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let optimistic: Vec<&QueryKey> = self.optimistic.iter().map(|(key, _)| key).collect();
    f.debug_struct("MutationRequest")
      .field("name", &self.name)
      .field("payload", &self.payload)
      .field("affected_keys", &self.affected_keys)
      .field("optimistic", &optimistic)
      .finish()
  }
}

/// Executes writes and keeps the store consistent with them.
#[derive(Clone)]
pub struct Mutator {
  store: QueryStore,
  router: std::sync::Arc<InvalidationRouter>,
}

impl Mutator {
  pub fn new(store: QueryStore, router: std::sync::Arc<InvalidationRouter>) -> Self {
    Self { store, router }
  }

  pub fn router(&self) -> &InvalidationRouter {
    &self.router
  }

  /// Run `action` for `request`.
  ///
  /// On success every affected pattern is invalidated before this returns,
  /// so the next read sees the key as stale. On failure nothing is
  /// invalidated and optimistic writes are rolled back.
  pub async fn mutate<T, F, Fut>(&self, request: MutationRequest, action: F) -> RemoteResult<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
  {
    let MutationRequest {
      name,
      payload,
      affected_keys,
      optimistic,
    } = request;

    let snapshots = self.apply_optimistic(optimistic);
    tracing::debug!(mutation = %name, %payload, optimistic = snapshots.len(), "mutation started");

    match action().await {
      Ok(value) => {
        let patterns = self.affected_patterns(&name, affected_keys);
        let mut invalidated = 0;
        for pattern in &patterns {
          invalidated += self.store.invalidate(pattern).len();
        }
        tracing::info!(mutation = %name, patterns = patterns.len(), invalidated, "mutation succeeded");
        Ok(value)
      }
      Err(error) => {
        // Newest first, so a key written twice ends at its original state
        for (key, snapshot) in snapshots.iter().rev() {
          self.store.rollback(key, snapshot);
        }
        tracing::warn!(mutation = %name, %error, rolled_back = snapshots.len(), "mutation failed");
        Err(error)
      }
    }
  }

  fn apply_optimistic(&self, updates: Vec<(QueryKey, Updater)>) -> Vec<(QueryKey, Snapshot)> {
    let mut snapshots = Vec::with_capacity(updates.len());
    for (key, update) in updates {
      let snapshot = self.store.snapshot(&key);
      let Some(predicted) = update(snapshot.entry().and_then(|e| e.data.as_ref())) else {
        continue;
      };

      let entry = match snapshot.entry() {
        Some(current) => QueryEntry {
          data: Some(predicted),
          error: None,
          status: if current.status == QueryStatus::Stale {
            QueryStatus::Stale
          } else {
            QueryStatus::Success
          },
          ..current.clone()
        },
        None => QueryEntry::success(key.clone(), predicted),
      };
      self.store.set(&key, entry);
      snapshots.push((key, snapshot));
    }
    snapshots
  }

  fn affected_patterns(&self, name: &str, mut explicit: Vec<KeyPattern>) -> Vec<KeyPattern> {
    let routed = if self.router.contains(name) || explicit.is_empty() {
      self.router.resolve(name)
    } else {
      Vec::new()
    };
    for pattern in routed {
      if !explicit.contains(&pattern) {
        explicit.push(pattern);
      }
    }
    explicit
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::{ErrorKind, RemoteError};
  use crate::{key_pattern, query_key};
  use serde_json::json;
  use std::sync::Arc;

  fn setup(router: InvalidationRouter) -> (QueryStore, Mutator) {
    let store = QueryStore::new();
    let mutator = Mutator::new(store.clone(), Arc::new(router));
    (store, mutator)
  }

  fn seed(store: &QueryStore, key: QueryKey, data: Value) {
    store.set(&key, QueryEntry::success(key.clone(), data));
  }

  #[tokio::test]
  async fn test_insert_sale_marks_dashboard_stale() {
    let router = InvalidationRouter::new().with_route("insert-sale", [key_pattern!["dashboard-stats"]]);
    let (store, mutator) = setup(router);
    seed(&store, query_key!["dashboard-stats"], json!({"sales": 4}));

    let request = MutationRequest::new("insert-sale", json!({"total": 25.0}))
      .affects(key_pattern!["dashboard-stats"]);
    let result = mutator
      .mutate(request, || async { Ok::<_, RemoteError>(json!({"id": 1})) })
      .await;

    assert_eq!(result.unwrap(), json!({"id": 1}));
    let entry = store.get(&query_key!["dashboard-stats"]).unwrap();
    assert_eq!(entry.status, QueryStatus::Stale);
    assert_eq!(entry.data, Some(json!({"sales": 4})));
  }

  #[tokio::test]
  async fn test_request_keys_and_routes_are_combined() {
    let router = InvalidationRouter::new().with_route("insert-sale", [key_pattern!["cash-register"]]);
    let (store, mutator) = setup(router);
    seed(&store, query_key!["stats"], json!(1));
    seed(&store, query_key!["cash-register"], json!(2));
    seed(&store, query_key!["clients"], json!(3));

    let request = MutationRequest::new("insert-sale", json!({})).affects(key_pattern!["stats"]);
    mutator
      .mutate(request, || async { Ok::<_, RemoteError>(()) })
      .await
      .unwrap();

    assert!(store.get(&query_key!["stats"]).unwrap().is_stale());
    assert!(store.get(&query_key!["cash-register"]).unwrap().is_stale());
    assert_eq!(
      store.get(&query_key!["clients"]).unwrap().status,
      QueryStatus::Success
    );
  }

  #[tokio::test]
  async fn test_unregistered_mutation_invalidates_nothing() {
    let (store, mutator) = setup(InvalidationRouter::new());
    seed(&store, query_key!["stats"], json!(1));

    mutator
      .mutate(MutationRequest::new("rename-store", json!({})), || async {
        Ok::<_, RemoteError>(())
      })
      .await
      .unwrap();

    assert_eq!(store.get(&query_key!["stats"]).unwrap().status, QueryStatus::Success);
  }

  #[tokio::test]
  async fn test_failure_skips_invalidation() {
    let router = InvalidationRouter::new().with_route("insert-sale", [key_pattern!["stats"]]);
    let (store, mutator) = setup(router);
    seed(&store, query_key!["stats"], json!(1));

    let result: RemoteResult<Value> = mutator
      .mutate(
        MutationRequest::new("insert-sale", json!({})).affects(key_pattern!["stats"]),
        || async { Err(RemoteError::validation("payment method required")) },
      )
      .await;

    assert_eq!(result.unwrap_err().kind, ErrorKind::Validation);
    assert_eq!(store.get(&query_key!["stats"]).unwrap().status, QueryStatus::Success);
  }

  #[tokio::test]
  async fn test_failure_rolls_back_optimistic_updates() {
    let (store, mutator) = setup(InvalidationRouter::new());
    let stock = query_key!["products", 7, "stock"];
    let register = query_key!["cash-register"];
    seed(&store, stock.clone(), json!({"qty": 10}));
    let before_stock = store.get(&stock);

    let observed = Arc::new(std::sync::Mutex::new(None));
    let request = MutationRequest::new("insert-sale", json!({"product": 7, "qty": 3}))
      .optimistic(stock.clone(), |current| {
        let qty = current.and_then(|v| v["qty"].as_i64()).unwrap_or(0);
        Some(json!({"qty": qty - 3}))
      })
      .optimistic(stock.clone(), |current| {
        let qty = current.and_then(|v| v["qty"].as_i64()).unwrap_or(0);
        Some(json!({"qty": qty - 1}))
      })
      .optimistic(register.clone(), |_| Some(json!({"balance": 30.0})))
      .optimistic(query_key!["clients"], |_| None);

    let store_in_action = store.clone();
    let observed_in_action = observed.clone();
    let stock_in_action = stock.clone();
    let result: RemoteResult<Value> = mutator
      .mutate(request, move || {
        *observed_in_action.lock().unwrap() = store_in_action.get(&stock_in_action);
        async { Err(RemoteError::network("timeout")) }
      })
      .await;

    assert!(result.is_err());
    let during = observed.lock().unwrap().clone().unwrap();
    assert_eq!(during.data, Some(json!({"qty": 6})));

    assert_eq!(store.get(&stock), before_stock);
    assert!(store.get(&register).is_none());
    assert!(store.get(&query_key!["clients"]).is_none());
  }

  #[tokio::test]
  async fn test_success_keeps_optimistic_value_but_stale() {
    let router = InvalidationRouter::new().with_route("adjust-stock", [key_pattern!["products", "*", "stock"]]);
    let (store, mutator) = setup(router);
    let stock = query_key!["products", 7, "stock"];
    seed(&store, stock.clone(), json!({"qty": 10}));

    let request =
      MutationRequest::new("adjust-stock", json!({"delta": 5})).optimistic(stock.clone(), |_| Some(json!({"qty": 15})));
    mutator
      .mutate(request, || async { Ok::<_, RemoteError>(()) })
      .await
      .unwrap();

    let entry = store.get(&stock).unwrap();
    assert_eq!(entry.data, Some(json!({"qty": 15})));
    assert_eq!(entry.status, QueryStatus::Stale);
  }
}
