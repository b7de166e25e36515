//! In-memory query store with per-key subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde_json::Value;

use super::entry::{QueryEntry, QueryStatus, Snapshot};
use super::key::{KeyPattern, QueryKey};
use crate::remote::RemoteResult;

/// Callback invoked with the new state of a key.
pub type Listener = Arc<dyn Fn(&QueryEntry) + Send + Sync>;

#[derive(Default)]
struct StoreInner {
  entries: HashMap<QueryKey, QueryEntry>,
  listeners: HashMap<QueryKey, Vec<(u64, Listener)>>,
  /// Bumped on every invalidation of a key
  epochs: HashMap<QueryKey, u64>,
  /// Bumped by `clear`, fences off fetches started before it
  generation: u64,
  next_listener_id: u64,
}

/// Store state captured when a fetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FetchEpoch {
  generation: u64,
  invalidations: u64,
}

/// Shared cache of query results.
///
/// Cloning is cheap and yields a handle to the same store. Every change goes
/// through a method here; listeners are called synchronously after the
/// internal lock has been released.
#[derive(Clone, Default)]
pub struct QueryStore {
  inner: Arc<Mutex<StoreInner>>,
}

impl QueryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, StoreInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn get(&self, key: &QueryKey) -> Option<QueryEntry> {
    self.lock().entries.get(key).cloned()
  }

  pub fn keys(&self) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = self.lock().entries.keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().entries.is_empty()
  }

  /// Replace the entry for `key`.
  pub fn set(&self, key: &QueryKey, mut entry: QueryEntry) {
    entry.key = key.clone();
    self.write(key, entry);
  }

  /// Mark every entry matching `pattern` as stale and return the matched keys.
  ///
  /// Data is kept so readers keep showing the last known value.
  pub fn invalidate(&self, pattern: &KeyPattern) -> Vec<QueryKey> {
    let mut matched = Vec::new();
    let mut notifications = Vec::new();
    {
      let mut inner = self.lock();
      let StoreInner {
        entries,
        listeners,
        epochs,
        ..
      } = &mut *inner;

      for (key, entry) in entries.iter_mut() {
        if !pattern.matches(key) {
          continue;
        }
        *epochs.entry(key.clone()).or_insert(0) += 1;
        matched.push(key.clone());

        if entry.status == QueryStatus::Stale {
          continue;
        }
        entry.status = QueryStatus::Stale;
        collect(listeners, key, entry, &mut notifications);
      }
    }

    matched.sort();
    tracing::debug!(%pattern, matched = matched.len(), "invalidated");
    dispatch(notifications);
    matched
  }

  /// Capture the current state of `key` for a later [`rollback`](Self::rollback).
  pub fn snapshot(&self, key: &QueryKey) -> Snapshot {
    Snapshot(self.get(key))
  }

  /// Restore `key` to a previously captured snapshot.
  ///
  /// Restoring a snapshot of an absent key removes the entry. Applying the
  /// same snapshot twice leaves the same state. The `fetching` flag is not
  /// restored: it follows whatever fetch is running now.
  pub fn rollback(&self, key: &QueryKey, snapshot: &Snapshot) {
    match &snapshot.0 {
      Some(entry) => {
        let notifications = {
          let mut inner = self.lock();
          let mut entry = entry.clone();
          entry.fetching = inner.entries.get(key).is_some_and(|live| live.fetching);

          let mut notifications = Vec::new();
          collect(&inner.listeners, key, &entry, &mut notifications);
          inner.entries.insert(key.clone(), entry);
          notifications
        };
        dispatch(notifications);
      }
      None => {
        let notifications = {
          let mut inner = self.lock();
          if inner.entries.remove(key).is_none() {
            return;
          }
          let mut notifications = Vec::new();
          collect(
            &inner.listeners,
            key,
            &QueryEntry::idle(key.clone()),
            &mut notifications,
          );
          notifications
        };
        dispatch(notifications);
      }
    }
  }

  /// Register `listener` for changes to `key`.
  ///
  /// The listener stays registered until the returned [`Subscription`] is
  /// dropped or explicitly unsubscribed.
  pub fn subscribe<F>(&self, key: &QueryKey, listener: F) -> Subscription
  where
    F: Fn(&QueryEntry) + Send + Sync + 'static,
  {
    let mut inner = self.lock();
    let id = inner.next_listener_id;
    inner.next_listener_id += 1;
    inner
      .listeners
      .entry(key.clone())
      .or_default()
      .push((id, Arc::new(listener)));

    Subscription {
      store: Arc::downgrade(&self.inner),
      key: key.clone(),
      id,
      active: true,
    }
  }

  /// Drop every entry and listener. Used at shutdown and test teardown.
  ///
  /// Fetches still in flight are not written back once they settle.
  pub fn clear(&self) {
    let mut inner = self.lock();
    inner.entries.clear();
    inner.listeners.clear();
    inner.epochs.clear();
    inner.generation += 1;
  }

  /// Current state for `key`, used to detect invalidations and teardown
  /// that happened while a fetch was in flight.
  pub(crate) fn epoch(&self, key: &QueryKey) -> FetchEpoch {
    let inner = self.lock();
    FetchEpoch {
      generation: inner.generation,
      invalidations: inner.epochs.get(key).copied().unwrap_or(0),
    }
  }

  /// Record that a fetch for `key` has started.
  pub(crate) fn begin_fetch(&self, key: &QueryKey) {
    let notifications = {
      let mut inner = self.lock();
      let entry = inner
        .entries
        .entry(key.clone())
        .or_insert_with(|| QueryEntry::idle(key.clone()));

      if entry.data.is_none() {
        entry.status = QueryStatus::Loading;
      } else {
        entry.fetching = true;
      }
      let entry = entry.clone();

      let mut notifications = Vec::new();
      collect(&inner.listeners, key, &entry, &mut notifications);
      notifications
    };
    dispatch(notifications);
  }

  /// Write the outcome of a fetch that started at invalidation `epoch`.
  ///
  /// Failures keep the previously cached data. A success that raced with an
  /// invalidation is stored but left stale.
  pub(crate) fn settle(&self, key: &QueryKey, result: &RemoteResult<Value>, epoch: FetchEpoch) {
    let notifications = {
      let mut inner = self.lock();
      if inner.generation != epoch.generation {
        tracing::debug!(%key, "dropping result of fetch started before clear");
        return;
      }
      let invalidated = inner.epochs.get(key).copied().unwrap_or(0) != epoch.invalidations;
      let entry = inner
        .entries
        .entry(key.clone())
        .or_insert_with(|| QueryEntry::idle(key.clone()));

      match result {
        Ok(value) => {
          entry.data = Some(value.clone());
          entry.error = None;
          entry.fetched_at = Some(Utc::now());
          entry.status = if invalidated {
            QueryStatus::Stale
          } else {
            QueryStatus::Success
          };
        }
        Err(error) => {
          entry.error = Some(error.clone());
          entry.status = QueryStatus::Error;
        }
      }
      entry.fetching = false;
      let entry = entry.clone();

      let mut notifications = Vec::new();
      collect(&inner.listeners, key, &entry, &mut notifications);
      notifications
    };
    dispatch(notifications);
  }

  fn write(&self, key: &QueryKey, entry: QueryEntry) {
    let notifications = {
      let mut inner = self.lock();
      let mut notifications = Vec::new();
      collect(&inner.listeners, key, &entry, &mut notifications);
      inner.entries.insert(key.clone(), entry);
      notifications
    };
    dispatch(notifications);
  }
}

impl std::fmt::Debug for QueryStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let inner = self.lock();
    f.debug_struct("QueryStore")
      .field("entries", &inner.entries.len())
      .field("listeners", &inner.listeners.values().map(Vec::len).sum::<usize>())
      .finish()
  }
}

fn collect(
  listeners: &HashMap<QueryKey, Vec<(u64, Listener)>>,
  key: &QueryKey,
  entry: &QueryEntry,
  out: &mut Vec<(Listener, QueryEntry)>,
) {
  if let Some(list) = listeners.get(key) {
    for (_, listener) in list {
      out.push((Arc::clone(listener), entry.clone()));
    }
  }
}

fn dispatch(notifications: Vec<(Listener, QueryEntry)>) {
  for (listener, entry) in notifications {
    listener(&entry);
  }
}

/// Handle returned by [`QueryStore::subscribe`].
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
  store: Weak<Mutex<StoreInner>>,
  key: QueryKey,
  id: u64,
  active: bool,
}

impl Subscription {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn unsubscribe(mut self) {
    self.detach();
  }

  fn detach(&mut self) {
    if !self.active {
      return;
    }
    self.active = false;

    // Store already torn down
    let Some(store) = self.store.upgrade() else {
      return;
    };
    let mut inner = store.lock().unwrap_or_else(PoisonError::into_inner);
    let now_empty = match inner.listeners.get_mut(&self.key) {
      Some(list) => {
        list.retain(|(id, _)| *id != self.id);
        list.is_empty()
      }
      None => false,
    };
    if now_empty {
      inner.listeners.remove(&self.key);
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.detach();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::RemoteError;
  use crate::{key_pattern, query_key};
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn seeded() -> QueryStore {
    let store = QueryStore::new();
    for key in [
      query_key!["products"],
      query_key!["products", 1, "stock"],
      query_key!["products", 2, "stock"],
      query_key!["clients"],
      query_key!["clients", 9],
    ] {
      store.set(&key, QueryEntry::success(key.clone(), json!({"k": key.to_string()})));
    }
    store
  }

  #[test]
  fn test_set_and_get() {
    let store = QueryStore::new();
    let key = query_key!["dashboard-stats"];
    assert!(store.get(&key).is_none());

    store.set(&key, QueryEntry::success(key.clone(), json!({"sales": 3})));
    let entry = store.get(&key).unwrap();
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.data, Some(json!({"sales": 3})));
  }

  #[test]
  fn test_set_forces_entry_key() {
    let store = QueryStore::new();
    let key = query_key!["clients"];
    store.set(&key, QueryEntry::success(query_key!["other"], json!([])));
    assert_eq!(store.get(&key).unwrap().key, key);
  }

  #[test]
  fn test_invalidate_prefix_leaves_other_roots_untouched() {
    let store = seeded();
    let matched = store.invalidate(&key_pattern!["products"]);
    assert_eq!(matched.len(), 3);

    for key in [
      query_key!["products"],
      query_key!["products", 1, "stock"],
      query_key!["products", 2, "stock"],
    ] {
      let entry = store.get(&key).unwrap();
      assert_eq!(entry.status, QueryStatus::Stale);
      assert!(entry.data.is_some(), "stale entries keep their data");
    }
    for key in [query_key!["clients"], query_key!["clients", 9]] {
      assert_eq!(store.get(&key).unwrap().status, QueryStatus::Success);
    }
    assert_eq!(store.len(), 5);
  }

  #[test]
  fn test_invalidate_with_wildcard() {
    let store = seeded();
    let matched = store.invalidate(&key_pattern!["products", "*", "stock"]);
    assert_eq!(
      matched,
      vec![query_key!["products", 1, "stock"], query_key!["products", 2, "stock"]]
    );
    assert_eq!(
      store.get(&query_key!["products"]).unwrap().status,
      QueryStatus::Success
    );
  }

  #[test]
  fn test_invalidate_notifies_synchronously() {
    let store = seeded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _sub = store.subscribe(&query_key!["products", 1, "stock"], move |entry| {
      seen_clone.lock().unwrap().push(entry.status);
    });

    store.invalidate(&key_pattern!["products"]);
    assert_eq!(*seen.lock().unwrap(), vec![QueryStatus::Stale]);

    // Already stale: no second notification
    store.invalidate(&key_pattern!["products"]);
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[test]
  fn test_listener_may_read_store() {
    let store = seeded();
    let reader = store.clone();
    let observed = Arc::new(Mutex::new(None));
    let observed_clone = observed.clone();
    let key = query_key!["clients"];
    let key_clone = key.clone();
    let _sub = store.subscribe(&key, move |_| {
      *observed_clone.lock().unwrap() = reader.get(&key_clone).map(|e| e.status);
    });

    store.invalidate(&key_pattern!["clients"]);
    assert_eq!(*observed.lock().unwrap(), Some(QueryStatus::Stale));
  }

  #[test]
  fn test_unsubscribe_and_drop() {
    let store = QueryStore::new();
    let key = query_key!["clients"];
    let calls = Arc::new(AtomicUsize::new(0));

    let c1 = calls.clone();
    let sub = store.subscribe(&key, move |_| {
      c1.fetch_add(1, Ordering::SeqCst);
    });
    store.set(&key, QueryEntry::success(key.clone(), json!([])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sub.unsubscribe();
    store.set(&key, QueryEntry::success(key.clone(), json!([1])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    {
      let c2 = calls.clone();
      let _sub = store.subscribe(&key, move |_| {
        c2.fetch_add(1, Ordering::SeqCst);
      });
    }
    store.set(&key, QueryEntry::success(key.clone(), json!([2])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_rollback_restores_snapshot_exactly() {
    let store = seeded();
    let key = query_key!["products", 1, "stock"];
    let before = store.get(&key);
    let snapshot = store.snapshot(&key);

    store.set(&key, QueryEntry::success(key.clone(), json!({"qty": -1})));
    store.rollback(&key, &snapshot);
    assert_eq!(store.get(&key), before);

    store.rollback(&key, &snapshot);
    assert_eq!(store.get(&key), before);
  }

  #[test]
  fn test_rollback_of_absent_key_removes_entry() {
    let store = QueryStore::new();
    let key = query_key!["cash-register"];
    let snapshot = store.snapshot(&key);
    assert!(snapshot.entry().is_none());

    store.set(&key, QueryEntry::success(key.clone(), json!({"open": true})));
    store.rollback(&key, &snapshot);
    assert!(store.get(&key).is_none());
    store.rollback(&key, &snapshot);
    assert!(store.get(&key).is_none());
  }

  #[test]
  fn test_settle_failure_keeps_previous_data() {
    let store = QueryStore::new();
    let key = query_key!["dashboard-stats"];
    store.set(&key, QueryEntry::success(key.clone(), json!({"sales": 3})));

    let epoch = store.epoch(&key);
    store.begin_fetch(&key);
    assert!(store.get(&key).unwrap().fetching);

    store.settle(&key, &Err(RemoteError::network("offline")), epoch);
    let entry = store.get(&key).unwrap();
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.data, Some(json!({"sales": 3})));
    assert!(!entry.fetching);
  }

  #[test]
  fn test_begin_fetch_on_empty_key_is_loading() {
    let store = QueryStore::new();
    let key = query_key!["clients"];
    store.begin_fetch(&key);
    assert_eq!(store.get(&key).unwrap().status, QueryStatus::Loading);
  }

  #[test]
  fn test_settle_after_concurrent_invalidation_stays_stale() {
    let store = QueryStore::new();
    let key = query_key!["dashboard-stats"];
    let epoch = store.epoch(&key);
    store.begin_fetch(&key);

    store.invalidate(&key_pattern!["dashboard-stats"]);
    store.settle(&key, &Ok(json!({"sales": 1})), epoch);

    let entry = store.get(&key).unwrap();
    assert_eq!(entry.status, QueryStatus::Stale);
    assert_eq!(entry.data, Some(json!({"sales": 1})));
  }

  #[test]
  fn test_clear() {
    let store = seeded();
    let _sub = store.subscribe(&query_key!["clients"], |_| {});
    store.clear();
    assert!(store.is_empty());
    assert!(store.keys().is_empty());
  }

  #[test]
  fn test_settle_after_clear_is_dropped() {
    let store = QueryStore::new();
    let key = query_key!["clients"];
    let epoch = store.epoch(&key);
    store.begin_fetch(&key);

    store.clear();
    store.settle(&key, &Ok(json!(["Ana"])), epoch);
    assert!(store.get(&key).is_none());

    // Fetches started after the clear are stored normally
    let epoch = store.epoch(&key);
    store.begin_fetch(&key);
    store.settle(&key, &Ok(json!(["Bia"])), epoch);
    assert_eq!(store.get(&key).unwrap().status, QueryStatus::Success);
  }

  #[test]
  fn test_rollback_keeps_live_fetching_flag() {
    let store = QueryStore::new();
    let key = query_key!["products", 3, "stock"];
    store.set(&key, QueryEntry::success(key.clone(), json!({"quantity": 5.0})));
    store.invalidate(&key.as_pattern());

    // Snapshot taken while a background refetch runs
    let epoch = store.epoch(&key);
    store.begin_fetch(&key);
    let snapshot = store.snapshot(&key);
    assert!(snapshot.entry().is_some_and(|entry| entry.fetching));

    store.set(&key, QueryEntry::success(key.clone(), json!({"quantity": 3.0})));
    store.settle(&key, &Ok(json!({"quantity": 5.0})), epoch);
    store.rollback(&key, &snapshot);

    let entry = store.get(&key).unwrap();
    assert_eq!(entry.status, QueryStatus::Stale);
    assert!(!entry.fetching);
  }
}
