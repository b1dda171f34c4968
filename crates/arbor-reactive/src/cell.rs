//! Observable value cells with dependency capture and change listeners.
//!
//! # Design
//!
//! [`Cell<T>`] wraps a value of type `T` in shared, reference-counted
//! storage (`Rc<RefCell<..>>`). It carries two distinct notification
//! mechanisms:
//!
//! - **Dependents**: tree nodes that read the cell during their last
//!   recompute. `set()` marks them dirty through the shared
//!   [`DirtyQueue`] and *consumes* the set; each node re-registers when it
//!   next recomputes, which is how stale edges fall away.
//! - **Listeners**: plain callbacks `(old, new, reason)` invoked in
//!   registration order. These are for engine internals (watchers that
//!   relay a state change into an outbound message), not for recompute
//!   scheduling.
//!
//! # Invariants
//!
//! 1. `set(v)` where `v == current` (by `PartialEq`) is a no-op: no
//!    mutation, no dirtying, no listener calls.
//! 2. Listeners are notified in registration order; dead listeners
//!    (dropped [`ListenerGuard`]s) are pruned lazily during notification.
//! 3. No cycle protection exists. A listener or dependent that writes back
//!    into a cell it observes is a caller bug, not an engine concern.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::context::{ComputeCtx, DependencySource, NodeId};
use crate::dirty::DirtyQueue;

/// Why a cell changed, as reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeReason {
    /// Plain programmatic mutation.
    #[default]
    Set,
    /// Mutation performed while handling an inbound client message.
    Message,
    /// Mutation performed by a drained scheduled callback.
    Callback,
    /// Mutation applied while reconciling with the transactional store.
    StoreSync,
}

type ListenerRc<T> = Rc<dyn Fn(&T, &T, ChangeReason)>;
type ListenerWeak<T> = Weak<dyn Fn(&T, &T, ChangeReason)>;

struct CellInner<T> {
    value: T,
    /// Nodes to dirty on the next change. Consumed by `set`; rebuilt on
    /// each dependent's recompute.
    dependents: ahash::AHashSet<NodeId>,
    /// Dirty queue of the tree the dependents belong to. Installed on
    /// first tracked read.
    dirty: Option<DirtyQueue>,
    /// Listener callbacks, held weakly; pruned on notify.
    listeners: Vec<ListenerWeak<T>>,
}

impl<T: 'static> DependencySource for RefCell<CellInner<T>> {
    fn unsubscribe(&self, node: NodeId) {
        self.borrow_mut().dependents.remove(&node);
    }
}

/// A shared observable value.
///
/// Cloning a `Cell` creates a new handle to the **same** inner state.
/// Cells are not owned by the tree; they live as long as any handle does.
pub struct Cell<T> {
    inner: Rc<RefCell<CellInner<T>>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Cell")
            .field("value", &inner.value)
            .field("dependents", &inner.dependents.len())
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Cell<T> {
    /// Create a new cell with the given initial value.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CellInner {
                value,
                dependents: ahash::AHashSet::new(),
                dirty: None,
                listeners: Vec::new(),
            })),
        }
    }

    /// Read the value, registering a dependency on the node currently
    /// recomputing in `cx`.
    ///
    /// No dependency is recorded when no node is recomputing or when the
    /// context is processing an inbound client message (see
    /// [`ComputeCtx::captures_dependencies`]).
    #[must_use]
    pub fn get(&self, cx: &mut ComputeCtx) -> T {
        if cx.captures_dependencies() {
            if let Some(node) = cx.current_node() {
                {
                    let mut inner = self.inner.borrow_mut();
                    inner.dependents.insert(node);
                    inner.dirty = Some(cx.dirty_queue().clone());
                }
                cx.record_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);
            }
        }
        self.inner.borrow().value.clone()
    }

    /// Read the value without registering any dependency.
    #[must_use]
    pub fn get_untracked(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the value by reference without cloning or registering.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Write a new value with the default [`ChangeReason::Set`].
    pub fn set(&self, value: T) {
        self.set_with_reason(value, ChangeReason::Set);
    }

    /// Write a new value.
    ///
    /// A no-op when `value` equals the current value. Otherwise the value
    /// is replaced, every dependent node is synchronously marked dirty (and
    /// the dependent set consumed), then listeners run with
    /// `(old, new, reason)`.
    pub fn set_with_reason(&self, value: T, reason: ChangeReason) {
        let (old, dependents, dirty) = {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            let old = std::mem::replace(&mut inner.value, value);
            let dependents = std::mem::take(&mut inner.dependents);
            (old, dependents, inner.dirty.clone())
        };

        if let Some(queue) = dirty {
            for node in dependents {
                queue.mark(node);
            }
        }

        self.notify(&old, reason);
    }

    /// Modify the value in place. Dirtying and notification happen only if
    /// the result differs from the old value.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.update_with_reason(f, ChangeReason::Set);
    }

    /// Modify the value in place with an explicit reason.
    pub fn update_with_reason(&self, f: impl FnOnce(&mut T), reason: ChangeReason) {
        let old = self.inner.borrow().value.clone();
        let mut next = old.clone();
        f(&mut next);
        if next != old {
            self.set_with_reason(next, reason);
        }
    }

    /// Restore a value without dirtying dependents or notifying listeners.
    ///
    /// Used by the transaction layer to roll written cells back to their
    /// pre-handler values before a retry.
    pub fn restore_silent(&self, value: T) {
        self.inner.borrow_mut().value = value;
    }

    /// Write a new value inside a retried handler.
    ///
    /// Behaves like [`Self::set_with_reason`], and additionally records a
    /// rollback in `cx` that restores the old value silently if the
    /// handler's transaction has to retry.
    pub fn set_in(&self, cx: &mut ComputeCtx, value: T, reason: ChangeReason) {
        let old = self.inner.borrow().value.clone();
        if old == value {
            return;
        }
        let this = self.clone();
        cx.push_rollback(move || this.restore_silent(old));
        self.set_with_reason(value, reason);
    }

    /// Register a change listener.
    ///
    /// Returns a guard; dropping it unsubscribes the listener.
    pub fn listen(&self, callback: impl Fn(&T, &T, ChangeReason) + 'static) -> ListenerGuard {
        let strong: ListenerRc<T> = Rc::new(callback);
        let weak = Rc::downgrade(&strong);
        self.inner.borrow_mut().listeners.push(weak);
        ListenerGuard {
            _guard: Box::new(strong),
        }
    }

    /// Number of nodes currently registered as dependents.
    #[must_use]
    pub fn dependent_count(&self) -> usize {
        self.inner.borrow().dependents.len()
    }

    /// True if `node` is currently registered as a dependent.
    #[must_use]
    pub fn has_dependent(&self, node: NodeId) -> bool {
        self.inner.borrow().dependents.contains(&node)
    }

    /// Notify live listeners and prune dead ones.
    fn notify(&self, old: &T, reason: ChangeReason) {
        let callbacks: Vec<ListenerRc<T>> = {
            let mut inner = self.inner.borrow_mut();
            inner.listeners.retain(|w| w.strong_count() > 0);
            inner.listeners.iter().filter_map(Weak::upgrade).collect()
        };

        let new = self.inner.borrow().value.clone();
        for cb in &callbacks {
            cb(old, &new, reason);
        }
    }
}

/// RAII guard for a registered listener.
///
/// Dropping the guard drops the strong reference to the callback, so the
/// weak entry in the cell's listener list fails to upgrade and is pruned
/// on the next notification.
pub struct ListenerGuard {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    fn node_cx(id: u64) -> ComputeCtx {
        ComputeCtx::for_node(NodeId(id), DirtyQueue::new())
    }

    #[test]
    fn get_set_basic() {
        let cell = Cell::new(42);
        assert_eq!(cell.get_untracked(), 42);

        cell.set(99);
        assert_eq!(cell.get_untracked(), 99);
    }

    #[test]
    fn equal_set_is_a_noop() {
        let cell = Cell::new(42);
        let fired = Rc::new(StdCell::new(0u32));
        let fired_clone = Rc::clone(&fired);
        let _guard = cell.listen(move |_, _, _| fired_clone.set(fired_clone.get() + 1));

        cell.set(42);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn tracked_read_registers_dependent() {
        let cell = Cell::new(0);
        let mut cx = node_cx(3);

        cell.get(&mut cx);
        assert!(cell.has_dependent(NodeId(3)));
        assert_eq!(cx.take_reads().len(), 1);
    }

    #[test]
    fn message_context_read_registers_nothing() {
        let cell = Cell::new(0);
        let mut cx = ComputeCtx::for_message(NodeId(3), DirtyQueue::new());

        cell.get(&mut cx);
        assert_eq!(cell.dependent_count(), 0);
        assert!(cx.take_reads().is_empty());
    }

    #[test]
    fn set_marks_dependents_dirty_and_consumes_them() {
        let dirty = DirtyQueue::new();
        let cell = Cell::new(0);
        let mut cx = ComputeCtx::for_node(NodeId(5), dirty.clone());

        cell.get(&mut cx);
        cell.set(1);

        assert!(dirty.contains(NodeId(5)));
        // The dependent set was consumed; a second write dirties nobody.
        assert_eq!(cell.dependent_count(), 0);
        dirty.take();
        cell.set(2);
        assert!(dirty.is_empty());
    }

    #[test]
    fn listeners_see_old_new_and_reason() {
        let cell = Cell::new(10);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);

        let _guard = cell.listen(move |old, new, reason| {
            seen_clone.borrow_mut().push((*old, *new, reason));
        });

        cell.set(11);
        cell.set_with_reason(12, ChangeReason::Message);

        assert_eq!(
            *seen.borrow(),
            vec![(10, 11, ChangeReason::Set), (11, 12, ChangeReason::Message)]
        );
    }

    #[test]
    fn listener_order_is_registration_order() {
        let cell = Cell::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l1 = Rc::clone(&log);
        let _g1 = cell.listen(move |_, _, _| l1.borrow_mut().push('a'));
        let l2 = Rc::clone(&log);
        let _g2 = cell.listen(move |_, _, _| l2.borrow_mut().push('b'));

        cell.set(1);
        assert_eq!(*log.borrow(), vec!['a', 'b']);
    }

    #[test]
    fn dropping_guard_unsubscribes() {
        let cell = Cell::new(0);
        let count = Rc::new(StdCell::new(0u32));
        let count_clone = Rc::clone(&count);

        let guard = cell.listen(move |_, _, _| count_clone.set(count_clone.get() + 1));
        cell.set(1);
        assert_eq!(count.get(), 1);

        drop(guard);
        cell.set(2);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn update_only_fires_on_change() {
        let cell = Cell::new(vec![1, 2]);
        let count = Rc::new(StdCell::new(0u32));
        let count_clone = Rc::clone(&count);
        let _guard = cell.listen(move |_, _, _| count_clone.set(count_clone.get() + 1));

        cell.update(|v| v.push(3));
        assert_eq!(count.get(), 1);

        cell.update(|_| {});
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn restore_silent_is_silent() {
        let dirty = DirtyQueue::new();
        let cell = Cell::new(0);
        let mut cx = ComputeCtx::for_node(NodeId(1), dirty.clone());
        cell.get(&mut cx);

        let count = Rc::new(StdCell::new(0u32));
        let count_clone = Rc::clone(&count);
        let _guard = cell.listen(move |_, _, _| count_clone.set(count_clone.get() + 1));

        cell.restore_silent(7);
        assert_eq!(cell.get_untracked(), 7);
        assert_eq!(count.get(), 0);
        assert!(dirty.is_empty());
        // Dependents survive a silent restore.
        assert!(cell.has_dependent(NodeId(1)));
    }

    #[test]
    fn unsubscribe_drops_the_edge() {
        let cell = Cell::new(0);
        let mut cx = node_cx(4);
        cell.get(&mut cx);

        let reads = cx.take_reads();
        assert_eq!(reads.len(), 1);
        reads[0].unsubscribe(NodeId(4));
        assert!(!cell.has_dependent(NodeId(4)));
    }

    #[test]
    fn clones_share_state() {
        let a = Cell::new(1);
        let b = a.clone();
        b.set(2);
        assert_eq!(a.get_untracked(), 2);
    }

    #[test]
    fn set_in_records_a_rollback() {
        let cell = Cell::new(1);
        let mut cx = ComputeCtx::for_message(NodeId(1), DirtyQueue::new());

        cell.set_in(&mut cx, 2, ChangeReason::Message);
        cell.set_in(&mut cx, 3, ChangeReason::Message);
        assert_eq!(cell.get_untracked(), 3);

        cx.run_rollbacks();
        assert_eq!(cell.get_untracked(), 1);
    }
}
