//! Cache entry types.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::key::QueryKey;
use crate::remote::{RemoteError, RemoteResult};

/// Lifecycle state of a cached read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
  /// Known key, never fetched
  Idle,
  /// First fetch in progress, no data to show yet
  Loading,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed; previous data (if any) is kept
  Error,
  /// Invalidated; data is still servable until the refetch resolves
  Stale,
}

/// A cached read owned by the query store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEntry {
  pub key: QueryKey,
  pub data: Option<Value>,
  pub error: Option<RemoteError>,
  pub status: QueryStatus,
  pub fetched_at: Option<DateTime<Utc>>,
  /// A fetch is running for an entry that already has something to show
  pub fetching: bool,
}

impl QueryEntry {
  pub fn idle(key: QueryKey) -> Self {
    Self {
      key,
      data: None,
      error: None,
      status: QueryStatus::Idle,
      fetched_at: None,
      fetching: false,
    }
  }

  /// Entry holding freshly fetched data.
  pub fn success(key: QueryKey, data: Value) -> Self {
    Self {
      key,
      data: Some(data),
      error: None,
      status: QueryStatus::Success,
      fetched_at: Some(Utc::now()),
      fetching: false,
    }
  }

  /// Whether the entry can be served without calling the loader.
  pub fn is_fresh(&self, stale_time: Duration) -> bool {
    match (self.status, self.fetched_at) {
      (QueryStatus::Success, Some(at)) => Utc::now() - at <= stale_time,
      _ => false,
    }
  }

  pub fn is_stale(&self) -> bool {
    self.status == QueryStatus::Stale
  }

  /// Deserialize the cached value, if any.
  pub fn data_as<T: DeserializeOwned>(&self) -> RemoteResult<Option<T>> {
    match &self.data {
      Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
      None => Ok(None),
    }
  }
}

/// Pre-mutation state of a key, used to undo optimistic writes.
///
/// `None` records that the key was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(pub(crate) Option<QueryEntry>);

impl Snapshot {
  pub fn entry(&self) -> Option<&QueryEntry> {
    self.0.as_ref()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query_key;
  use serde_json::json;

  #[test]
  fn test_success_entry_is_fresh_within_stale_time() {
    let entry = QueryEntry::success(query_key!["dashboard-stats"], json!({"total": 10}));
    assert!(entry.is_fresh(Duration::minutes(5)));
  }

  #[test]
  fn test_zero_stale_time_expires_immediately() {
    let mut entry = QueryEntry::success(query_key!["dashboard-stats"], json!(1));
    entry.fetched_at = Some(Utc::now() - Duration::seconds(1));
    assert!(!entry.is_fresh(Duration::zero()));
  }

  #[test]
  fn test_stale_and_error_entries_are_never_fresh() {
    let mut entry = QueryEntry::success(query_key!["dashboard-stats"], json!(1));
    entry.status = QueryStatus::Stale;
    assert!(!entry.is_fresh(Duration::minutes(5)));
    entry.status = QueryStatus::Error;
    assert!(!entry.is_fresh(Duration::minutes(5)));
  }

  #[test]
  fn test_data_as() {
    let entry = QueryEntry::success(query_key!["clients"], json!([1, 2, 3]));
    let data: Option<Vec<u32>> = entry.data_as().unwrap();
    assert_eq!(data, Some(vec![1, 2, 3]));

    let empty = QueryEntry::idle(query_key!["clients"]);
    assert_eq!(empty.data_as::<Vec<u32>>().unwrap(), None);
  }
}
