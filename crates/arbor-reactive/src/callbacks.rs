//! Deferred-callback queue.
//!
//! Work that wants to mutate cells outside of a recompute — removal hooks
//! cleaning up shared state, async results arriving through a session
//! inbox, side effects a handler wants to run after its transaction — is
//! enqueued here and drained by the tree manager at the top of the next
//! render cycle, on the single recompute path.
//!
//! Callbacks run in a detached [`ComputeCtx`]: cell reads resolve but never
//! register dependencies, and writes dirty dependents normally.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::context::ComputeCtx;

type Callback = Box<dyn FnOnce(&mut ComputeCtx)>;

/// Shared FIFO queue of deferred callbacks.
///
/// Cloning produces another handle to the same queue.
#[derive(Clone, Default)]
pub struct CallbackQueue {
    inner: Rc<RefCell<VecDeque<Callback>>>,
}

impl std::fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("pending", &self.inner.borrow().len())
            .finish()
    }
}

impl CallbackQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a callback to run on the next drain.
    pub fn schedule(&self, callback: impl FnOnce(&mut ComputeCtx) + 'static) {
        self.inner.borrow_mut().push_back(Box::new(callback));
    }

    /// Run every queued callback in FIFO order.
    ///
    /// Callbacks scheduled *during* the drain run in the same pass, so a
    /// callback chain settles in one call.
    pub fn drain(&self, cx: &mut ComputeCtx) {
        let mut ran = 0usize;
        loop {
            let next = self.inner.borrow_mut().pop_front();
            match next {
                Some(callback) => {
                    callback(cx);
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            tracing::debug!(count = ran, "drained scheduled callbacks");
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::dirty::DirtyQueue;

    #[test]
    fn drains_in_fifo_order() {
        let q = CallbackQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = Rc::clone(&log);
            q.schedule(move |_| log.borrow_mut().push(i));
        }

        let mut cx = ComputeCtx::detached(DirtyQueue::new());
        q.drain(&mut cx);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(q.is_empty());
    }

    #[test]
    fn callbacks_scheduled_during_drain_run_in_same_pass() {
        let q = CallbackQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_q = q.clone();
        let inner_log = Rc::clone(&log);
        q.schedule(move |_| {
            inner_log.borrow_mut().push("outer");
            let log = Rc::clone(&inner_log);
            inner_q.schedule(move |_| log.borrow_mut().push("inner"));
        });

        let mut cx = ComputeCtx::detached(DirtyQueue::new());
        q.drain(&mut cx);
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn callback_writes_dirty_dependents() {
        let dirty = DirtyQueue::new();
        let cell = Cell::new(0);

        // A node reads the cell during recompute.
        let mut node_cx = ComputeCtx::for_node(crate::NodeId(2), dirty.clone());
        cell.get(&mut node_cx);

        let q = CallbackQueue::new();
        let cell_clone = cell.clone();
        q.schedule(move |_| cell_clone.set(5));

        let mut cx = ComputeCtx::detached(dirty.clone());
        q.drain(&mut cx);

        assert!(dirty.contains(crate::NodeId(2)));
    }
}
