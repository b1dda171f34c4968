//! The shared dirty set.
//!
//! A [`DirtyQueue`] is a cheap clonable handle to the set of nodes whose
//! recompute is pending. Cells hold a handle so `set()` can mark dependents
//! synchronously; the tree manager drains the set level-by-level until it
//! reaches a fixpoint.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::NodeId;

/// Shared set of nodes awaiting recompute.
///
/// Cloning produces another handle to the same set.
#[derive(Clone, Default)]
pub struct DirtyQueue {
    inner: Rc<RefCell<ahash::AHashSet<NodeId>>>,
}

impl std::fmt::Debug for DirtyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyQueue")
            .field("pending", &self.inner.borrow().len())
            .finish()
    }
}

impl DirtyQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `node` as needing recompute. Idempotent.
    pub fn mark(&self, node: NodeId) {
        self.inner.borrow_mut().insert(node);
    }

    /// Remove `node` without processing it (used when a node is collected
    /// while still marked).
    pub fn discard(&self, node: NodeId) {
        self.inner.borrow_mut().remove(&node);
    }

    /// Take the pending set, leaving the queue empty.
    ///
    /// Order is unspecified; the manager re-sorts by tree level.
    #[must_use]
    pub fn take(&self) -> Vec<NodeId> {
        self.inner.borrow_mut().drain().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.inner.borrow().contains(&node)
    }
}
