//! Exponential backoff for transient remote failures.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::remote::RemoteResult;

/// Retry schedule for loaders that fail with a network error.
///
/// Attempt `n` (1-based) that fails retryably is followed by a sleep of
/// `base_delay * 2^(n-1)`, capped at `max_delay`. Non-retryable errors and
/// the final attempt's error are returned as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  #[serde(rename = "base_delay_ms", with = "millis")]
  pub base_delay: Duration,
  #[serde(rename = "max_delay_ms", with = "millis")]
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(8),
    }
  }
}

impl RetryPolicy {
  /// Single attempt, no retries.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  /// Delay to wait after the given failed attempt (1-based).
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    self
      .base_delay
      .saturating_mul(1u32 << exponent)
      .min(self.max_delay)
  }

  /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
  pub async fn run<T, F, Fut>(&self, mut op: F) -> RemoteResult<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
  {
    let max_attempts = self.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      match op().await {
        Err(error) if error.is_retryable() && attempt < max_attempts => {
          let delay = self.delay_after(attempt);
          tracing::warn!(attempt, max_attempts, ?delay, %error, "retrying after network error");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        result => return result,
      }
    }
  }
}

mod millis {
  use serde::{Deserialize, Deserializer};
  use std::time::Duration;

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
  where
    D: Deserializer<'de>,
  {
    Ok(Duration::from_millis(u64::deserialize(deserializer)?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::{ErrorKind, RemoteError};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn fast(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
      max_attempts,
      base_delay: Duration::from_millis(1),
      max_delay: Duration::from_millis(4),
    }
  }

  #[test]
  fn test_delay_doubles_and_caps() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_after(1), Duration::from_millis(500));
    assert_eq!(policy.delay_after(2), Duration::from_secs(1));
    assert_eq!(policy.delay_after(3), Duration::from_secs(2));
    assert_eq!(policy.delay_after(10), Duration::from_secs(8));
    assert_eq!(policy.delay_after(u32::MAX), Duration::from_secs(8));
  }

  #[tokio::test]
  async fn test_network_errors_are_retried_until_success() {
    let calls = Arc::new(AtomicU32::new(0));
    let result = fast(3)
      .run(|| {
        let calls = calls.clone();
        async move {
          if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(RemoteError::network("reset"))
          } else {
            Ok(42)
          }
        }
      })
      .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_attempts_are_capped() {
    let calls = Arc::new(AtomicU32::new(0));
    let result: RemoteResult<()> = fast(4)
      .run(|| {
        let calls = calls.clone();
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Err(RemoteError::network("offline"))
        }
      })
      .await;

    assert_eq!(result.unwrap_err().kind, ErrorKind::Network);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
  }

  #[tokio::test]
  async fn test_validation_errors_surface_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let result: RemoteResult<()> = fast(5)
      .run(|| {
        let calls = calls.clone();
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Err(RemoteError::validation("invalid cpf"))
        }
      })
      .await;

    assert_eq!(result.unwrap_err().kind, ErrorKind::Validation);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_deserialize_from_millis() {
    let policy: RetryPolicy =
      serde_yaml::from_str("max_attempts: 5\nbase_delay_ms: 250\n").unwrap();
    assert_eq!(policy.max_attempts, 5);
    assert_eq!(policy.base_delay, Duration::from_millis(250));
    assert_eq!(policy.max_delay, Duration::from_secs(8));
  }
}
