//! Remote call interface consumed by the coordinator.
//!
//! The coordinator never talks to the network itself: every read goes through
//! [`RemoteCall::call`] and every write through [`RemoteCall::write`], and both
//! hand back an already-classified [`RemoteResult`].

mod error;
mod rest;

pub use error::{ErrorKind, RemoteError, RemoteResult};
pub use rest::{classify_status, RestBackend};

use futures::future::BoxFuture;
use serde_json::Value;

/// A boxed future resolving to a normalized remote result.
pub type RemoteFuture<'a> = BoxFuture<'a, RemoteResult<Value>>;

/// Backend access layer.
///
/// Implementations must translate backend-specific failures into an
/// [`ErrorKind`] instead of panicking or bubbling raw transport errors.
pub trait RemoteCall: Send + Sync {
  /// Invoke a named remote procedure (read).
  fn call<'a>(&'a self, procedure: &'a str, args: Value) -> RemoteFuture<'a>;

  /// Insert or update through a table or procedure (write).
  fn write<'a>(&'a self, target: &'a str, payload: Value) -> RemoteFuture<'a>;
}
