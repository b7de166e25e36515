//! Client-side query cache.
//!
//! This module provides a transport-agnostic caching mechanism that:
//! - Stores query results keyed by structural [`QueryKey`]s
//! - Deduplicates concurrent fetches of the same key
//! - Runs mutations with optimistic updates and rollback
//! - Invalidates affected keys through a central [`InvalidationRouter`]

mod entry;
mod fetcher;
mod key;
mod mutator;
mod router;
mod store;

pub use entry::{QueryEntry, QueryStatus, Snapshot};
pub use fetcher::Fetcher;
pub use key::{KeyPattern, KeySegment, PatternSegment, QueryKey};
pub use mutator::{MutationRequest, Mutator, Updater};
pub use router::InvalidationRouter;
pub use store::{Listener, QueryStore, Subscription};
