//! The tree manager: arena ownership, recompute cycles, and subtree
//! reconciliation.
//!
//! # Cycle shape
//!
//! One [`TreeManager::run_cycle`] drains the scheduled-callback queue,
//! then processes the dirty set lowest-level-first until no node is dirty.
//! Because a recompute may deliberately dirty other nodes, the loop runs
//! to a fixpoint under a bounded pass cap; exceeding the cap is fatal and
//! logged, never silently truncated.
//!
//! # Invariants
//!
//! 1. At most one recompute is active at a time (single current-node slot
//!    in the compute context; the manager is not `Sync`).
//! 2. A node's dependency edges always reflect its most recent recompute:
//!    edges are diffed, not accumulated.
//! 3. A collected node never recomputes and is never marked dirty again
//!    (writes to cells it still appears in are dropped on drain).
//! 4. `to_discard` and the arena agree: every collected node stays in the
//!    arena until its discard message is emitted, then leaves both.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use arbor_proto::PacketStore;
use arbor_reactive::{CallbackQueue, ComputeCtx, DependencySource, DirtyQueue, NodeId};
use arbor_store::{DataStore, ReadRecord, StoreKey, StoreTxn, WriteRecord};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::diagnostic::Diagnostic;
use crate::node::{ChildMap, NodeEntry};
use crate::widget::{ChildDecl, ChildKey, MessageCx, NodeCx, RemovalCx, StagedSlot, Widget};

/// Tuning knobs for cycle execution.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Maximum dirty-set passes per cycle before the cycle is declared a
    /// runaway feedback loop.
    pub max_fixpoint_passes: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_fixpoint_passes: 100,
        }
    }
}

/// Fatal cycle failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    /// The dirty set kept refilling past the configured pass cap.
    FixpointExceeded { passes: u32 },
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixpointExceeded { passes } => {
                write!(f, "recompute did not reach a fixpoint after {passes} passes")
            }
        }
    }
}

impl std::error::Error for CycleError {}

/// Owner of the node arena and driver of the recompute/diff machinery.
pub struct TreeManager {
    pub(crate) arena: AHashMap<NodeId, NodeEntry>,
    root: Option<NodeId>,
    next_id: u64,
    dirty: DirtyQueue,
    callbacks: CallbackQueue,
    store: Option<Rc<dyn DataStore>>,
    /// Store key -> nodes that read it during their last recompute.
    store_subs: AHashMap<StoreKey, AHashSet<NodeId>>,
    pub(crate) to_broadcast: AHashSet<NodeId>,
    pub(crate) to_discard: BTreeSet<NodeId>,
    pub(crate) pending_postscripts: Vec<String>,
    packets: PacketStore,
    config: TreeConfig,
}

impl fmt::Debug for TreeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeManager")
            .field("nodes", &self.arena.len())
            .field("dirty", &self.dirty.len())
            .field("to_discard", &self.to_discard.len())
            .finish()
    }
}

impl Default for TreeManager {
    fn default() -> Self {
        Self::new(TreeConfig::default())
    }
}

impl TreeManager {
    #[must_use]
    pub fn new(config: TreeConfig) -> Self {
        Self {
            arena: AHashMap::new(),
            root: None,
            next_id: 0,
            dirty: DirtyQueue::new(),
            callbacks: CallbackQueue::new(),
            store: None,
            store_subs: AHashMap::new(),
            to_broadcast: AHashSet::new(),
            to_discard: BTreeSet::new(),
            pending_postscripts: Vec::new(),
            packets: PacketStore::new(),
            config,
        }
    }

    /// Attach the transactional store recomputes read through.
    pub fn set_store(&mut self, store: Rc<dyn DataStore>) {
        self.store = Some(store);
    }

    /// Install the root node. Must be called exactly once, before the
    /// first cycle.
    pub fn set_root(&mut self, widget: impl Widget + 'static) -> NodeId {
        assert!(self.root.is_none(), "root already installed");
        let id = self.install(None, None, None, Box::new(widget));
        self.root = Some(id);
        self.dirty.mark(id);
        id
    }

    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains_key(&id)
    }

    /// Number of live (non-collected) nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.values().filter(|e| !e.collected).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The shared dirty queue (cells clone this handle on subscription).
    #[must_use]
    pub fn dirty_queue(&self) -> &DirtyQueue {
        &self.dirty
    }

    /// The shared deferred-callback queue.
    #[must_use]
    pub fn callback_queue(&self) -> &CallbackQueue {
        &self.callbacks
    }

    /// The packet allocator.
    pub fn packet_store(&mut self) -> &mut PacketStore {
        &mut self.packets
    }

    /// Mark a node for recompute in the next cycle.
    pub fn mark_dirty(&mut self, id: NodeId) {
        if self.arena.get(&id).is_some_and(|e| !e.collected) {
            self.dirty.mark(id);
        }
    }

    /// Wire type name of a node.
    #[must_use]
    pub fn type_of(&self, id: NodeId) -> Option<&'static str> {
        self.arena.get(&id).map(NodeEntry::type_name)
    }

    /// A node's current children.
    #[must_use]
    pub fn children_of(&self, id: NodeId) -> Option<&ChildMap> {
        self.arena.get(&id).map(|e| &e.children)
    }

    /// A node's current export data.
    #[must_use]
    pub fn export_of(&self, id: NodeId) -> Option<&serde_json::Map<String, Value>> {
        self.arena.get(&id).map(|e| &e.export)
    }

    /// Parent of a node.
    #[must_use]
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.arena.get(&id).and_then(|e| e.parent)
    }

    // ========================================================================
    // Cycle execution
    // ========================================================================

    /// Drain callbacks and recompute dirty nodes to a fixpoint.
    ///
    /// Callbacks scheduled while the cycle runs (removal-hook cleanup,
    /// side effects of a recompute) drain within the same cycle, so one
    /// call settles everything or dies at the pass cap.
    pub fn run_cycle(&mut self) -> Result<(), CycleError> {
        let mut passes = 0u32;
        loop {
            self.drain_callbacks();
            if self.dirty.is_empty() {
                break;
            }
            passes += 1;
            if passes > self.config.max_fixpoint_passes {
                error!(
                    passes,
                    cap = self.config.max_fixpoint_passes,
                    "dirty set kept refilling; aborting cycle"
                );
                return Err(CycleError::FixpointExceeded { passes });
            }

            // Parents first: a parent's recompute may collect a dirty
            // child, whose stale mark is then dropped.
            let mut batch: Vec<(u32, NodeId)> = self
                .dirty
                .take()
                .into_iter()
                .filter_map(|id| {
                    self.arena
                        .get(&id)
                        .filter(|e| !e.collected)
                        .map(|e| (e.level, id))
                })
                .collect();
            batch.sort_unstable();

            for (_, id) in batch {
                if self.arena.get(&id).is_some_and(|e| !e.collected) {
                    self.recompute_node(id);
                }
            }
        }
        Ok(())
    }

    /// Run queued callbacks in a detached context.
    pub fn drain_callbacks(&mut self) {
        let mut cx = ComputeCtx::detached(self.dirty.clone());
        self.callbacks.drain(&mut cx);
    }

    fn recompute_node(&mut self, id: NodeId) {
        let (mut widget, prev_children) = {
            let Some(entry) = self.arena.get_mut(&id) else {
                return;
            };
            if entry.collected {
                return;
            }
            let Some(widget) = entry.widget.take() else {
                return;
            };
            (widget, entry.children.clone())
        };

        let (result, output) = {
            let view = self.store.as_ref().map(|s| s.begin_view());
            let mut cx = NodeCx::new(
                ComputeCtx::for_node(id, self.dirty.clone()),
                id,
                view,
                &mut self.packets,
                self.callbacks.clone(),
                prev_children.clone(),
            );
            let result = widget.recompute(&mut cx);
            (result, cx.finish())
        };

        let staged = match &result {
            Ok(()) => output.children,
            Err(err) => {
                error!(node = %id, kind = widget.type_name(), error = %err,
                    "recompute failed; replacing content with diagnostic");
                vec![(
                    "content".to_string(),
                    StagedSlot::Single(ChildDecl::new(Diagnostic::new(err.to_string()))),
                )]
            }
        };

        {
            let entry = self
                .arena
                .get_mut(&id)
                .expect("recomputed node vanished from arena");
            entry.widget = Some(widget);

            // Diff cell edges: unsubscribe only sources no longer read.
            let new_addrs: AHashSet<usize> = output.reads.iter().map(rc_addr).collect();
            for old in entry.cell_subs.drain(..) {
                if !new_addrs.contains(&rc_addr(&old)) {
                    old.unsubscribe(id);
                }
            }
            entry.cell_subs = output.reads;

            entry.export = output.export;
            if let Err(err) = &result {
                entry
                    .export
                    .insert("exception".to_string(), Value::String(err.to_string()));
            }
            entry.postscript = output.postscript;
            entry.outbox.extend(output.messages);
            entry.packets = output.packet_ids.into_iter().collect();
            if !entry.was_created {
                entry.was_updated = true;
            }
        }

        self.update_store_subs(id, output.store_reads);
        self.pending_postscripts.extend(output.postscripts);
        self.reconcile_children(id, &prev_children, staged);

        let target = self.root_merge_node(id);
        self.to_broadcast.insert(target);
    }

    /// Climb from a merged node to the outermost node actually rendered.
    fn root_merge_node(&self, mut id: NodeId) -> NodeId {
        while let Some(entry) = self.arena.get(&id) {
            if entry.merged_into_parent() {
                if let Some(parent) = entry.parent {
                    id = parent;
                    continue;
                }
            }
            break;
        }
        id
    }

    fn update_store_subs(&mut self, id: NodeId, new: ReadRecord) {
        let old = match self.arena.get_mut(&id) {
            Some(entry) => std::mem::replace(&mut entry.store_subs, new.clone()),
            None => return,
        };

        for key in old.difference(&new) {
            if let Some(set) = self.store_subs.get_mut(key) {
                set.remove(&id);
                if set.is_empty() {
                    self.store_subs.remove(key);
                }
            }
        }
        for key in new.difference(&old) {
            self.store_subs.entry(key.clone()).or_default().insert(id);
        }
    }

    /// Mark every node subscribed to one of `written` dirty. Called after
    /// a handler's transaction commits.
    pub fn notify_store_writes(&mut self, written: &WriteRecord) {
        for key in written {
            let Some(nodes) = self.store_subs.get(key) else {
                continue;
            };
            for id in nodes.clone() {
                if self.arena.get(&id).is_some_and(|e| !e.collected) {
                    self.dirty.mark(id);
                }
            }
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    fn reconcile_children(
        &mut self,
        parent: NodeId,
        prev: &ChildMap,
        staged: Vec<(String, StagedSlot)>,
    ) {
        let mut new_map = ChildMap::default();
        let mut claimed: AHashSet<NodeId> = AHashSet::new();

        for (name, slot) in staged {
            match slot {
                StagedSlot::Single(decl) => {
                    let child = self.resolve_decl(parent, &name, decl, prev, &mut claimed);
                    new_map.insert_single(name, child);
                }
                StagedSlot::List(decls) => {
                    let mut ids = Vec::with_capacity(decls.len());
                    for decl in decls {
                        ids.push(self.resolve_decl(parent, &name, decl, prev, &mut claimed));
                    }
                    new_map.insert_list(name, ids);
                }
            }
        }

        for child in prev.all_children() {
            if !claimed.contains(&child) {
                self.collect_subtree(child);
            }
        }

        if let Some(entry) = self.arena.get_mut(&parent) {
            entry.children = new_map;
        }
    }

    fn resolve_decl(
        &mut self,
        parent: NodeId,
        name: &str,
        decl: ChildDecl,
        prev: &ChildMap,
        claimed: &mut AHashSet<NodeId>,
    ) -> NodeId {
        match decl {
            ChildDecl::Keep(id) => {
                let collected = {
                    let entry = self.arena.get(&id).unwrap_or_else(|| {
                        panic!("Keep({id}) references a node that is not in the tree")
                    });
                    assert!(
                        entry.collected || entry.parent == Some(parent),
                        "Keep({id}) references a live child of another parent"
                    );
                    entry.collected
                };
                if collected {
                    self.reinstall(id, parent, name);
                } else if let Some(entry) = self.arena.get_mut(&id) {
                    entry.name_in_parent = Some(name.to_string());
                }
                claimed.insert(id);
                id
            }
            ChildDecl::New { key, widget } => {
                if let Some(key) = &key {
                    if let Some(matched) = self.find_keyed_match(prev, name, key, claimed) {
                        claimed.insert(matched);
                        // Fresh widget dropped; the retained node keeps its
                        // subtree and state.
                        if self.arena.get(&matched).is_some_and(|e| e.collected) {
                            self.reinstall(matched, parent, name);
                        } else if let Some(entry) = self.arena.get_mut(&matched) {
                            entry.name_in_parent = Some(name.to_string());
                        }
                        return matched;
                    }
                }
                let id = self.install(Some(parent), Some(name.to_string()), key, widget);
                claimed.insert(id);
                // Newly appearing children are fully expanded immediately.
                self.recompute_node(id);
                id
            }
        }
    }

    fn find_keyed_match(
        &self,
        prev: &ChildMap,
        name: &str,
        key: &ChildKey,
        claimed: &AHashSet<NodeId>,
    ) -> Option<NodeId> {
        let slot = prev.get(name)?;
        slot.ids().find(|id| {
            !claimed.contains(id)
                && self
                    .arena
                    .get(id)
                    .is_some_and(|e| e.identity_key.as_ref() == Some(key))
        })
    }

    fn install(
        &mut self,
        parent: Option<NodeId>,
        name: Option<String>,
        key: Option<ChildKey>,
        mut widget: Box<dyn Widget>,
    ) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        let level = parent.map_or(0, |p| {
            self.arena
                .get(&p)
                .map_or(0, |entry| entry.level.saturating_add(1))
        });

        // Flush anything queued before attach rather than dropping it.
        let outbox = widget.startup_messages();

        debug!(node = %id, kind = widget.type_name(), level, "installing node");
        self.arena
            .insert(id, NodeEntry::new(widget, parent, level, name, key, outbox));
        id
    }

    /// Bring a node collected earlier in this cycle back into the tree.
    ///
    /// Transient per-install state (subscriptions, lifecycle flags,
    /// pending discard) is cleared; the widget and its logical
    /// configuration survive, so the remote renderer sees no
    /// remove/recreate flash.
    fn reinstall(&mut self, id: NodeId, parent: NodeId, name: &str) {
        debug!(node = %id, "reinstalling collected node");
        self.to_discard.remove(&id);

        let level = self
            .arena
            .get(&parent)
            .map_or(0, |e| e.level.saturating_add(1));
        if let Some(entry) = self.arena.get_mut(&id) {
            entry.collected = false;
            entry.parent = Some(parent);
            entry.level = level;
            entry.name_in_parent = Some(name.to_string());
            entry.was_created = true;
            entry.was_updated = false;
        }
        // Subscriptions were dropped at collection; recompute rebuilds
        // them (and re-expands collected descendants through Keep/keyed
        // declarations).
        self.dirty.mark(id);
    }

    /// Remove a subtree: removal hooks bottom-up, subscriptions dropped,
    /// nodes marked for the next discard batch.
    fn collect_subtree(&mut self, id: NodeId) {
        let children = match self.arena.get(&id) {
            Some(entry) if !entry.collected => entry.children.all_children(),
            _ => return,
        };
        for child in children {
            self.collect_subtree(child);
        }

        if let Some(mut widget) = self.arena.get_mut(&id).and_then(|e| e.widget.take()) {
            let callbacks = self.callbacks.clone();
            let mut cx = RemovalCx::new(id, &callbacks);
            widget.on_removed(&mut cx);
            if let Some(entry) = self.arena.get_mut(&id) {
                entry.widget = Some(widget);
            }
        }

        let store_old = {
            let Some(entry) = self.arena.get_mut(&id) else {
                return;
            };
            for sub in entry.cell_subs.drain(..) {
                sub.unsubscribe(id);
            }
            entry.collected = true;
            entry.was_created = false;
            entry.was_updated = false;
            std::mem::take(&mut entry.store_subs)
        };
        for key in &store_old {
            if let Some(set) = self.store_subs.get_mut(key) {
                set.remove(&id);
                if set.is_empty() {
                    self.store_subs.remove(key);
                }
            }
        }

        self.dirty.discard(id);
        self.to_broadcast.remove(&id);
        self.to_discard.insert(id);
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    /// Dispatch an inbound client message to a node.
    ///
    /// Returns the replies the handler staged; the caller flushes them to
    /// the node's outbox only once the surrounding transaction commits
    /// (see [`TreeManager::push_node_messages`]).
    pub fn handle_message<'a>(
        &mut self,
        id: NodeId,
        cx: &'a mut ComputeCtx,
        txn: Option<&'a mut dyn StoreTxn>,
        message: &Value,
    ) -> Vec<Value> {
        let widget = self
            .arena
            .get_mut(&id)
            .filter(|e| !e.collected)
            .and_then(|e| e.widget.take());
        let Some(mut widget) = widget else {
            warn!(node = %id, "inbound message for unknown or collected node dropped");
            return Vec::new();
        };

        let mut mcx = MessageCx::new(cx, txn, id, self.callbacks.clone());
        widget.on_message(&mut mcx, message);
        let messages = mcx.take_messages();

        if let Some(entry) = self.arena.get_mut(&id) {
            entry.widget = Some(widget);
        }
        messages
    }

    /// Append committed handler replies to a node's outbox.
    pub fn push_node_messages(&mut self, id: NodeId, messages: Vec<Value>) {
        if let Some(entry) = self.arena.get_mut(&id).filter(|e| !e.collected) {
            entry.outbox.extend(messages);
        } else if !messages.is_empty() {
            warn!(node = %id, dropped = messages.len(),
                "replies for collected node dropped");
        }
    }

    /// Stage a side-channel script for the next frame.
    pub fn append_postscript(&mut self, script: impl Into<String>) {
        self.pending_postscripts.push(script.into());
    }

    /// Touch every live node's packets and free the rest.
    pub(crate) fn sweep_packets(&mut self) {
        let live: Vec<_> = self
            .arena
            .values()
            .filter(|e| !e.collected)
            .flat_map(|e| e.packets.iter().copied())
            .collect();
        for packet in live {
            self.packets.touch(packet);
        }
        self.packets.sweep();
    }
}

fn rc_addr(rc: &Rc<dyn DependencySource>) -> usize {
    Rc::as_ptr(rc).cast::<()>() as usize
}
