//! Store traits: views, transactions, read records, and the conflict
//! signal.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

/// A key the store can resolve: a field on an object, or an index.
///
/// Ordered so read/write records iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreKey {
    /// One field of one object.
    Field { object: String, field: String },
    /// An index lookup (a set-membership read).
    Index { name: String },
}

impl StoreKey {
    /// Convenience constructor for a field key.
    #[must_use]
    pub fn field(object: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Field {
            object: object.into(),
            field: field.into(),
        }
    }

    /// Convenience constructor for an index key.
    #[must_use]
    pub fn index(name: impl Into<String>) -> Self {
        Self::Index { name: name.into() }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { object, field } => write!(f, "{object}.{field}"),
            Self::Index { name } => write!(f, "index:{name}"),
        }
    }
}

/// The deterministic record of keys read through a view or transaction.
pub type ReadRecord = BTreeSet<StoreKey>;

/// The set of keys a committed transaction wrote.
pub type WriteRecord = BTreeSet<StoreKey>;

/// Optimistic-concurrency violation raised by `commit()`.
///
/// Carries the first key the store detected as stale; enough for logging,
/// not intended for programmatic recovery (the policy is retry-or-abandon).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitConflict {
    pub key: StoreKey,
}

impl fmt::Display for CommitConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "commit conflict on {}", self.key)
    }
}

impl std::error::Error for CommitConflict {}

/// A read-only snapshot.
///
/// Every `get` is recorded; the caller harvests [`StoreView::read_record`]
/// to learn what the computation depended on.
pub trait StoreView {
    /// Read a key, recording the read.
    fn get(&mut self, key: &StoreKey) -> Option<Value>;

    /// The keys read so far.
    fn read_record(&self) -> &ReadRecord;
}

/// A mutable snapshot with optimistic commit.
pub trait StoreTxn {
    /// Read a key (sees this transaction's own writes), recording the read.
    fn get(&mut self, key: &StoreKey) -> Option<Value>;

    /// Stage a write. `None` deletes the key.
    fn set(&mut self, key: StoreKey, value: Option<Value>);

    /// The keys read so far.
    fn read_record(&self) -> &ReadRecord;

    /// Atomically apply the staged writes.
    ///
    /// Fails with [`CommitConflict`] if any key this transaction read or
    /// wrote changed after the snapshot was taken.
    fn commit(self: Box<Self>) -> Result<WriteRecord, CommitConflict>;
}

/// The store itself. Hands out snapshots.
pub trait DataStore {
    fn begin_view(&self) -> Box<dyn StoreView + '_>;
    fn begin_transaction(&self) -> Box<dyn StoreTxn + '_>;
}
