//! In-memory reference store.
//!
//! Versioned keys with optimistic commit: a transaction remembers the
//! store version at snapshot time, and `commit()` fails if any key in its
//! read or write set was committed after that. Single-threaded, like the
//! tree it serves; concurrent writers are modeled by interleaved
//! transactions, which is all the conflict policy needs.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::contract::{
    CommitConflict, DataStore, ReadRecord, StoreKey, StoreTxn, StoreView, WriteRecord,
};

#[derive(Default)]
struct MemInner {
    /// Committed data: key -> (version it was last written at, value).
    data: BTreeMap<StoreKey, (u64, Value)>,
    /// Monotonic commit counter.
    version: u64,
}

/// Shared in-memory store handle.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Rc<RefCell<MemInner>>,
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemStore")
            .field("keys", &inner.data.len())
            .field("version", &inner.version)
            .finish()
    }
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current commit version (0 before any commit).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Directly read a committed value, outside any snapshot. Test helper
    /// and seed loader; production reads go through views.
    #[must_use]
    pub fn peek(&self, key: &StoreKey) -> Option<Value> {
        self.inner.borrow().data.get(key).map(|(_, v)| v.clone())
    }

    /// Seed a value without conflict bookkeeping (bumps the version).
    pub fn seed(&self, key: StoreKey, value: Value) {
        let mut inner = self.inner.borrow_mut();
        inner.version += 1;
        let version = inner.version;
        inner.data.insert(key, (version, value));
    }
}

impl DataStore for MemStore {
    fn begin_view(&self) -> Box<dyn StoreView + '_> {
        Box::new(MemView {
            store: Rc::clone(&self.inner),
            reads: ReadRecord::new(),
        })
    }

    fn begin_transaction(&self) -> Box<dyn StoreTxn + '_> {
        let snapshot_version = self.inner.borrow().version;
        Box::new(MemTxn {
            store: Rc::clone(&self.inner),
            snapshot_version,
            reads: ReadRecord::new(),
            writes: BTreeMap::new(),
        })
    }
}

struct MemView {
    store: Rc<RefCell<MemInner>>,
    reads: ReadRecord,
}

impl StoreView for MemView {
    fn get(&mut self, key: &StoreKey) -> Option<Value> {
        self.reads.insert(key.clone());
        self.store.borrow().data.get(key).map(|(_, v)| v.clone())
    }

    fn read_record(&self) -> &ReadRecord {
        &self.reads
    }
}

struct MemTxn {
    store: Rc<RefCell<MemInner>>,
    snapshot_version: u64,
    reads: ReadRecord,
    /// Staged writes; `None` deletes.
    writes: BTreeMap<StoreKey, Option<Value>>,
}

impl StoreTxn for MemTxn {
    fn get(&mut self, key: &StoreKey) -> Option<Value> {
        self.reads.insert(key.clone());
        if let Some(staged) = self.writes.get(key) {
            return staged.clone();
        }
        self.store.borrow().data.get(key).map(|(_, v)| v.clone())
    }

    fn set(&mut self, key: StoreKey, value: Option<Value>) {
        self.writes.insert(key, value);
    }

    fn read_record(&self) -> &ReadRecord {
        &self.reads
    }

    fn commit(self: Box<Self>) -> Result<WriteRecord, CommitConflict> {
        let mut inner = self.store.borrow_mut();

        // Stale check over everything this transaction touched.
        for key in self.reads.iter().chain(self.writes.keys()) {
            if let Some((version, _)) = inner.data.get(key) {
                if *version > self.snapshot_version {
                    return Err(CommitConflict { key: key.clone() });
                }
            }
        }

        inner.version += 1;
        let version = inner.version;
        let mut written = WriteRecord::new();
        for (key, value) in self.writes {
            match value {
                Some(v) => {
                    inner.data.insert(key.clone(), (version, v));
                }
                None => {
                    inner.data.remove(&key);
                }
            }
            written.insert(key);
        }

        debug!(version, writes = written.len(), "mem store commit");
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn view_records_reads() {
        let store = MemStore::new();
        store.seed(StoreKey::field("doc", "lines"), json!(["a", "b"]));

        let mut view = store.begin_view();
        assert_eq!(view.get(&StoreKey::field("doc", "lines")), Some(json!(["a", "b"])));
        assert_eq!(view.get(&StoreKey::field("doc", "missing")), None);

        let record: Vec<String> = view.read_record().iter().map(ToString::to_string).collect();
        assert_eq!(record, vec!["doc.lines", "doc.missing"]);
    }

    #[test]
    fn txn_sees_own_writes_and_commits() {
        let store = MemStore::new();

        let mut txn = store.begin_transaction();
        txn.set(StoreKey::field("doc", "topIndex"), Some(json!(3)));
        assert_eq!(txn.get(&StoreKey::field("doc", "topIndex")), Some(json!(3)));

        let written = txn.commit().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(store.peek(&StoreKey::field("doc", "topIndex")), Some(json!(3)));
    }

    #[test]
    fn delete_via_none() {
        let store = MemStore::new();
        store.seed(StoreKey::field("doc", "tmp"), json!(1));

        let mut txn = store.begin_transaction();
        txn.set(StoreKey::field("doc", "tmp"), None);
        txn.commit().unwrap();

        assert_eq!(store.peek(&StoreKey::field("doc", "tmp")), None);
    }

    #[test]
    fn interleaved_write_conflicts_reader() {
        let store = MemStore::new();
        store.seed(StoreKey::field("doc", "lines"), json!(["a"]));

        let mut t1 = store.begin_transaction();
        t1.get(&StoreKey::field("doc", "lines"));
        t1.set(StoreKey::field("doc", "lines"), Some(json!(["a", "b"])));

        // A second transaction lands first.
        let mut t2 = store.begin_transaction();
        t2.set(StoreKey::field("doc", "lines"), Some(json!(["z"])));
        t2.commit().unwrap();

        let err = t1.commit().unwrap_err();
        assert_eq!(err.key, StoreKey::field("doc", "lines"));
        // The winner's data stands.
        assert_eq!(store.peek(&StoreKey::field("doc", "lines")), Some(json!(["z"])));
    }

    #[test]
    fn disjoint_transactions_do_not_conflict() {
        let store = MemStore::new();

        let mut t1 = store.begin_transaction();
        t1.set(StoreKey::field("a", "x"), Some(json!(1)));

        let mut t2 = store.begin_transaction();
        t2.set(StoreKey::field("b", "y"), Some(json!(2)));

        t2.commit().unwrap();
        t1.commit().unwrap();

        assert_eq!(store.peek(&StoreKey::field("a", "x")), Some(json!(1)));
        assert_eq!(store.peek(&StoreKey::field("b", "y")), Some(json!(2)));
    }
}
