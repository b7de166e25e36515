//! Client-side data cache and mutation coordinator for the PDV backend.
//!
//! Reads go through a deduplicating [`cache::Fetcher`] into a shared
//! [`cache::QueryStore`]; writes go through a [`cache::Mutator`] that applies
//! optimistic updates and invalidates affected keys via the
//! [`cache::InvalidationRouter`]. [`client::QueryClient`] wires them together.

pub mod cache;
pub mod client;
pub mod config;
pub mod logging;
pub mod pdv;
pub mod query;
pub mod remote;
pub mod retry;

pub use client::{QueryClient, RemoteQuery, RemoteWrite};
pub use remote::{ErrorKind, RemoteError, RemoteResult};
