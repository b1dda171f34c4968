//! The computation context: explicit dependency-capture state.
//!
//! The original design for systems like this keeps "the node currently
//! recomputing" in a thread-local. Here the context is an explicit value
//! threaded through every recompute and handler call, so save/restore is
//! structural and capture rules are visible at the call site.
//!
//! # Capture rules
//!
//! A [`crate::Cell::get`] registers a dependency on the calling node only
//! when both hold:
//!
//! 1. a node is currently recomputing (the context has a current node), and
//! 2. the context is not processing an inbound client message.
//!
//! Message handlers mutate state but must not silently create
//! subscriptions, so a message context always has rule 2 fail.

use std::fmt;
use std::rc::Rc;

use crate::dirty::DirtyQueue;

/// Identity of an installed tree node.
///
/// Assigned by the tree manager on install; a node has no id before that.
/// Ids are opaque, monotonically allocated, and never reused within a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Get the raw id value (the wire representation).
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A reactive source a node has read during recompute.
///
/// The tree manager keeps one handle per edge so it can drop the edge
/// (unsubscribe the node) when the next recompute no longer reads the
/// source.
pub trait DependencySource {
    /// Remove `node` from this source's dependent set.
    fn unsubscribe(&self, node: NodeId);
}

/// Scoped record of "the node currently recomputing".
///
/// One context exists per recompute (or per message dispatch, or per
/// drained callback); it is never stored. The set of sources read through
/// it becomes the node's dependency set for the cycle.
pub struct ComputeCtx {
    current: Option<NodeId>,
    processing_message: bool,
    dirty: DirtyQueue,
    reads: Vec<Rc<dyn DependencySource>>,
    // Pointer-identity dedup for `reads`; a node re-reading the same cell
    // within one recompute records a single edge.
    seen: ahash::AHashSet<usize>,
    rollbacks: Vec<Box<dyn FnOnce()>>,
}

impl fmt::Debug for ComputeCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeCtx")
            .field("current", &self.current)
            .field("processing_message", &self.processing_message)
            .field("reads", &self.reads.len())
            .finish()
    }
}

impl ComputeCtx {
    /// Context for recomputing `node`. Reads register dependencies.
    #[must_use]
    pub fn for_node(node: NodeId, dirty: DirtyQueue) -> Self {
        Self {
            current: Some(node),
            processing_message: false,
            dirty,
            reads: Vec::new(),
            seen: ahash::AHashSet::new(),
            rollbacks: Vec::new(),
        }
    }

    /// Throwaway context for an inbound client message aimed at `node`.
    ///
    /// Reads resolve normally but never register dependencies, and the
    /// record stays empty.
    #[must_use]
    pub fn for_message(node: NodeId, dirty: DirtyQueue) -> Self {
        Self {
            current: Some(node),
            processing_message: true,
            dirty,
            reads: Vec::new(),
            seen: ahash::AHashSet::new(),
            rollbacks: Vec::new(),
        }
    }

    /// Detached context: no current node, so reads never register.
    ///
    /// Used when draining scheduled callbacks and in tests.
    #[must_use]
    pub fn detached(dirty: DirtyQueue) -> Self {
        Self {
            current: None,
            processing_message: false,
            dirty,
            reads: Vec::new(),
            seen: ahash::AHashSet::new(),
            rollbacks: Vec::new(),
        }
    }

    /// The node currently recomputing, if any.
    #[must_use]
    pub fn current_node(&self) -> Option<NodeId> {
        self.current
    }

    /// True while handling an inbound client message.
    #[must_use]
    pub fn is_processing_message(&self) -> bool {
        self.processing_message
    }

    /// True if reads through this context should register dependencies.
    #[must_use]
    pub fn captures_dependencies(&self) -> bool {
        self.current.is_some() && !self.processing_message
    }

    /// The shared dirty queue for the owning tree.
    #[must_use]
    pub fn dirty_queue(&self) -> &DirtyQueue {
        &self.dirty
    }

    /// Record that the current node read `source`.
    ///
    /// Called by [`crate::Cell::get`]; a no-op unless
    /// [`Self::captures_dependencies`] holds.
    pub fn record_read(&mut self, source: Rc<dyn DependencySource>) {
        if !self.captures_dependencies() {
            return;
        }
        let addr = Rc::as_ptr(&source).cast::<()>() as usize;
        if self.seen.insert(addr) {
            self.reads.push(source);
        }
    }

    /// Take the sources read so far, leaving the record empty.
    ///
    /// The tree manager calls this after a recompute to rebuild the node's
    /// dependency edges.
    pub fn take_reads(&mut self) -> Vec<Rc<dyn DependencySource>> {
        self.seen.clear();
        std::mem::take(&mut self.reads)
    }

    /// Record an action that undoes a write performed through this
    /// context.
    ///
    /// Message handlers run inside a retried store transaction; when the
    /// commit conflicts, the session runs the rollback log (newest first)
    /// to restore every written cell before the next attempt.
    pub fn push_rollback(&mut self, undo: impl FnOnce() + 'static) {
        self.rollbacks.push(Box::new(undo));
    }

    /// Undo every write recorded through [`Self::push_rollback`], newest
    /// first, and clear the log.
    pub fn run_rollbacks(&mut self) {
        while let Some(undo) = self.rollbacks.pop() {
            undo();
        }
    }

    /// Drop the rollback log (the attempt committed).
    pub fn clear_rollbacks(&mut self) {
        self.rollbacks.clear();
    }
}
