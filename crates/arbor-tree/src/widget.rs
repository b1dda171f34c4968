//! The widget trait and the contexts its hooks run in.
//!
//! A widget is the behavior half of a node: the arena entry holds the
//! bookkeeping, the widget holds the state and the recompute hook. During
//! [`Widget::recompute`] the widget reads cells and store fields through
//! the context (every read is captured as a dependency) and declares its
//! children; the manager reconciles the declarations afterwards.
//!
//! # Child identity
//!
//! A declaration either keeps an existing child by id ([`ChildDecl::Keep`])
//! or supplies a fresh widget ([`ChildDecl::New`]). A new declaration may
//! carry a caller-chosen [`ChildKey`]; a keyed declaration that matches a
//! previous child of the same name reuses that child's node — subtree and
//! state intact — so reordering a keyed list moves subtrees instead of
//! destroying and recreating them. Unkeyed declarations are positional:
//! redeclaring them produces fresh nodes.

use std::fmt;
use std::rc::Rc;

use arbor_proto::{PacketId, PacketStore};
use arbor_reactive::{CallbackQueue, ComputeCtx, DependencySource, NodeId};
use arbor_store::{ReadRecord, StoreKey, StoreTxn, StoreView};
use serde_json::{Map, Value};

use crate::node::ChildMap;

/// A failed recompute. Carried into the diagnostic node that replaces the
/// failing node's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeError {
    message: String,
}

impl RecomputeError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RecomputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RecomputeError {}

impl From<String> for RecomputeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for RecomputeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Caller-chosen identity for a child that must stay stable under
/// reordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChildKey {
    Str(String),
    Int(i64),
}

impl From<&str> for ChildKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for ChildKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for ChildKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// One child declaration produced by a recompute.
pub enum ChildDecl {
    /// Retain an existing child (and its whole subtree) untouched.
    Keep(NodeId),
    /// Install a fresh widget, or — when `key` matches a previous child of
    /// the same name — reuse that child's node and drop this widget.
    New {
        key: Option<ChildKey>,
        widget: Box<dyn Widget>,
    },
}

impl ChildDecl {
    #[must_use]
    pub fn new(widget: impl Widget + 'static) -> Self {
        Self::New {
            key: None,
            widget: Box::new(widget),
        }
    }

    #[must_use]
    pub fn keyed(key: impl Into<ChildKey>, widget: impl Widget + 'static) -> Self {
        Self::New {
            key: Some(key.into()),
            widget: Box::new(widget),
        }
    }

    #[must_use]
    pub fn keep(id: NodeId) -> Self {
        Self::Keep(id)
    }
}

impl fmt::Debug for ChildDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep(id) => f.debug_tuple("Keep").field(id).finish(),
            Self::New { key, widget } => f
                .debug_struct("New")
                .field("key", key)
                .field("type", &widget.type_name())
                .finish(),
        }
    }
}

/// Behavior installed in a tree node.
pub trait Widget {
    /// Type name sent as `cellType` on the wire.
    fn type_name(&self) -> &'static str;

    /// Rebuild this node's exports and child declarations.
    ///
    /// Every cell read through `cx.reactive()` and every store field read
    /// through `cx.store_get` becomes a dependency edge; the node
    /// recomputes again when any of them changes. Errors do not abort the
    /// cycle — the node's content is replaced by a diagnostic node.
    fn recompute(&mut self, cx: &mut NodeCx<'_>) -> Result<(), RecomputeError>;

    /// Handle an inbound client message addressed to this node.
    ///
    /// Runs in a throwaway message context: reads register no
    /// dependencies. When the session runs the handler inside a store
    /// transaction, `cx` exposes it.
    fn on_message(&mut self, cx: &mut MessageCx<'_>, message: &Value) {
        let _ = (cx, message);
    }

    /// Called when the node leaves the tree.
    ///
    /// The sole place external resources (timers, subprocesses,
    /// subscriptions) are released; the manager never force-cancels them.
    /// May schedule callbacks, must not mutate cells directly.
    fn on_removed(&mut self, cx: &mut RemovalCx<'_>) {
        let _ = cx;
    }

    /// Messages composed before the widget was installed.
    ///
    /// Drained once at install time into the node's outbox, so nothing
    /// queued pre-attach is dropped.
    fn startup_messages(&mut self) -> Vec<Value> {
        Vec::new()
    }

    /// Whether the remote renderer should display this node.
    fn should_display(&self) -> bool {
        true
    }

    /// True when this node's rendering is structurally merged into its
    /// parent. A merged node must never be the root of a wire message;
    /// the encoder panics if asked.
    fn merged_into_parent(&self) -> bool {
        false
    }
}

pub(crate) enum StagedSlot {
    Single(ChildDecl),
    List(Vec<ChildDecl>),
}

/// Everything a recompute produced, harvested by the manager.
pub(crate) struct NodeOutput {
    pub children: Vec<(String, StagedSlot)>,
    pub export: Map<String, Value>,
    pub postscript: Option<String>,
    pub messages: Vec<Value>,
    pub postscripts: Vec<String>,
    pub packet_ids: Vec<PacketId>,
    pub reads: Vec<Rc<dyn DependencySource>>,
    pub store_reads: ReadRecord,
}

/// Context for one recompute of one node.
pub struct NodeCx<'a> {
    ctx: ComputeCtx,
    node: NodeId,
    view: Option<Box<dyn StoreView + 'a>>,
    packets: &'a mut PacketStore,
    callbacks: CallbackQueue,
    prev: ChildMap,
    children: Vec<(String, StagedSlot)>,
    export: Map<String, Value>,
    postscript: Option<String>,
    messages: Vec<Value>,
    postscripts: Vec<String>,
    packet_ids: Vec<PacketId>,
}

impl<'a> NodeCx<'a> {
    pub(crate) fn new(
        ctx: ComputeCtx,
        node: NodeId,
        view: Option<Box<dyn StoreView + 'a>>,
        packets: &'a mut PacketStore,
        callbacks: CallbackQueue,
        prev: ChildMap,
    ) -> Self {
        Self {
            ctx,
            node,
            view,
            packets,
            callbacks,
            prev,
            children: Vec::new(),
            export: Map::new(),
            postscript: None,
            messages: Vec::new(),
            postscripts: Vec::new(),
            packet_ids: Vec::new(),
        }
    }

    /// The id of the node being recomputed.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The dependency-capturing compute context, for cell reads.
    pub fn reactive(&mut self) -> &mut ComputeCtx {
        &mut self.ctx
    }

    /// Read a store field, recording the dependency.
    ///
    /// Returns `None` when no store is attached or the key is unset.
    pub fn store_get(&mut self, key: &StoreKey) -> Option<Value> {
        self.view.as_mut()?.get(key)
    }

    /// Declare a single named child.
    pub fn child(&mut self, name: impl Into<String>, decl: ChildDecl) {
        self.children.push((name.into(), StagedSlot::Single(decl)));
    }

    /// Declare an ordered list of children under one name.
    pub fn child_list(&mut self, name: impl Into<String>, decls: Vec<ChildDecl>) {
        self.children.push((name.into(), StagedSlot::List(decls)));
    }

    /// The single child installed under `name` before this recompute.
    #[must_use]
    pub fn existing_single(&self, name: &str) -> Option<NodeId> {
        self.prev.single(name)
    }

    /// The child list installed under `name` before this recompute.
    #[must_use]
    pub fn existing_list(&self, name: &str) -> Option<&[NodeId]> {
        self.prev.list(name)
    }

    /// Set one export-data entry (transmitted verbatim as `extraData`).
    pub fn export(&mut self, key: impl Into<String>, value: Value) {
        self.export.insert(key.into(), value);
    }

    /// Attach a postscript to this node's next update message.
    pub fn set_postscript(&mut self, script: impl Into<String>) {
        self.postscript = Some(script.into());
    }

    /// Queue a node-addressed message for the client.
    pub fn schedule_message(&mut self, message: Value) {
        self.messages.push(message);
    }

    /// Queue a side-channel script (`#appendPostscript`).
    pub fn append_postscript(&mut self, script: impl Into<String>) {
        self.postscripts.push(script.into());
    }

    /// Defer work onto the recompute path; runs before the next cycle.
    pub fn schedule_callback(&mut self, callback: impl FnOnce(&mut ComputeCtx) + 'static) {
        self.callbacks.schedule(callback);
    }

    /// Register an out-of-band binary payload and record the node's
    /// reference to it for generational liveness.
    pub fn register_packet(&mut self, bytes: &[u8]) -> PacketId {
        let id = self.packets.register(bytes);
        self.packet_ids.push(id);
        id
    }

    pub(crate) fn finish(mut self) -> NodeOutput {
        let store_reads = self
            .view
            .as_ref()
            .map(|v| v.read_record().clone())
            .unwrap_or_default();
        NodeOutput {
            children: self.children,
            export: self.export,
            postscript: self.postscript,
            messages: self.messages,
            postscripts: self.postscripts,
            packet_ids: self.packet_ids,
            reads: self.ctx.take_reads(),
            store_reads,
        }
    }
}

/// Context for one inbound client message.
pub struct MessageCx<'a> {
    ctx: &'a mut ComputeCtx,
    txn: Option<&'a mut dyn StoreTxn>,
    node: NodeId,
    callbacks: CallbackQueue,
    messages: Vec<Value>,
}

impl<'a> MessageCx<'a> {
    pub(crate) fn new(
        ctx: &'a mut ComputeCtx,
        txn: Option<&'a mut dyn StoreTxn>,
        node: NodeId,
        callbacks: CallbackQueue,
    ) -> Self {
        Self {
            ctx,
            txn,
            node,
            callbacks,
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The message-mode compute context (reads register nothing).
    pub fn reactive(&mut self) -> &mut ComputeCtx {
        self.ctx
    }

    #[must_use]
    pub fn has_txn(&self) -> bool {
        self.txn.is_some()
    }

    /// Read a store field through the handler's transaction.
    pub fn txn_get(&mut self, key: &StoreKey) -> Option<Value> {
        self.txn.as_mut()?.get(key)
    }

    /// Stage a store write through the handler's transaction. Ignored
    /// (with a log) when the handler runs without one.
    pub fn txn_set(&mut self, key: StoreKey, value: Option<Value>) {
        match self.txn.as_mut() {
            Some(txn) => txn.set(key, value),
            None => tracing::warn!(%key, "store write outside a transaction dropped"),
        }
    }

    /// Queue a node-addressed reply. Flushed to the node's outbox only if
    /// the handler's transaction commits.
    pub fn schedule_message(&mut self, message: Value) {
        self.messages.push(message);
    }

    /// Defer work onto the recompute path; runs before the next cycle.
    pub fn schedule_callback(&mut self, callback: impl FnOnce(&mut ComputeCtx) + 'static) {
        self.callbacks.schedule(callback);
    }

    pub(crate) fn take_messages(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.messages)
    }
}

/// Context for the removal hook.
pub struct RemovalCx<'a> {
    node: NodeId,
    callbacks: &'a CallbackQueue,
}

impl<'a> RemovalCx<'a> {
    pub(crate) fn new(node: NodeId, callbacks: &'a CallbackQueue) -> Self {
        Self { node, callbacks }
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Defer cleanup that must touch cells onto the recompute path.
    pub fn schedule_callback(&self, callback: impl FnOnce(&mut ComputeCtx) + 'static) {
        self.callbacks.schedule(callback);
    }
}
