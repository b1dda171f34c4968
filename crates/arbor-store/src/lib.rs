#![forbid(unsafe_code)]

//! The transactional store contract Arbor consumes.
//!
//! The tree core is agnostic to how document data is persisted or
//! distributed; it talks to the store exclusively through this crate's
//! traits:
//!
//! - [`DataStore::begin_view`] — a read-only snapshot whose reads are
//!   recorded deterministically. The tree derives a node's store
//!   dependency set purely from that [`ReadRecord`].
//! - [`DataStore::begin_transaction`] — a mutable snapshot whose
//!   `commit()` either applies atomically or raises [`CommitConflict`]
//!   under optimistic concurrency.
//! - [`retry::run_with_retry`] — the bounded retry-then-abandon policy
//!   message handlers run under.
//!
//! [`MemStore`] is the in-memory reference implementation used by the
//! session layer and by tests.

pub mod contract;
pub mod mem;
pub mod retry;

pub use contract::{CommitConflict, DataStore, ReadRecord, StoreKey, StoreTxn, StoreView, WriteRecord};
pub use mem::MemStore;
pub use retry::{run_with_retry, RetryOutcome, RetryPolicy};
