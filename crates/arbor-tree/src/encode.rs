//! Frame encoding: turning one settled cycle into outbound messages.
//!
//! Message volume is kept proportional to what changed:
//!
//! - a changed node's message is emitted from its *stable parent* — the
//!   highest ancestor that also changed this cycle — so one deep edit
//!   yields one message covering the changed path;
//! - inside an update, each named child collapses to its id when
//!   unchanged, a fully expanded structure when created this cycle, or a
//!   nested partial update when changed this cycle.

use std::collections::BTreeMap;

use arbor_proto::{ChildStructure, DisplayRegistry, NodeStructure, OutboundMessage};
use arbor_reactive::NodeId;
use tracing::debug;

use crate::manager::{CycleError, TreeManager};
use crate::node::ChildSlot;

impl TreeManager {
    /// Run one cycle and encode everything it changed.
    ///
    /// Output order: postscripts (reversed, the renderer executes them
    /// parent-before-child), structure updates, node-addressed messages,
    /// then the discard batch.
    pub fn render_frame(
        &mut self,
        registry: &DisplayRegistry,
    ) -> Result<Vec<OutboundMessage>, CycleError> {
        self.run_cycle()?;

        let mut out = Vec::new();

        let mut scripts = std::mem::take(&mut self.pending_postscripts);
        scripts.reverse();
        for script in scripts {
            out.push(OutboundMessage::postscript(script));
        }

        // Hoist each changed node to its stable parent, then drop any
        // candidate that is already covered by an ancestor in the set.
        let candidates: Vec<NodeId> = self
            .to_broadcast
            .iter()
            .copied()
            .filter(|id| {
                self.arena
                    .get(id)
                    .is_some_and(|e| !e.collected && (e.was_created || e.was_updated))
            })
            .collect();

        let mut to_send: Vec<NodeId> = candidates
            .iter()
            .map(|&id| self.find_stable_parent(id))
            .collect();
        to_send.sort_unstable();
        to_send.dedup();
        let send_set: ahash::AHashSet<NodeId> = to_send.iter().copied().collect();
        to_send.retain(|&id| !self.has_ancestor_in(id, &send_set));

        for id in &to_send {
            out.push(self.encode_update(*id, registry));
        }

        // Node-addressed messages, in id order.
        let mut with_outbox: Vec<NodeId> = self
            .arena
            .iter()
            .filter(|(_, e)| !e.collected && !e.outbox.is_empty())
            .map(|(id, _)| *id)
            .collect();
        with_outbox.sort_unstable();
        for id in with_outbox {
            if let Some(entry) = self.arena.get_mut(&id) {
                for message in entry.outbox.drain(..) {
                    out.push(OutboundMessage::cell_message(id.raw(), message));
                }
            }
        }

        // Discards, batched per collection pass.
        let discards: Vec<(u64, String)> = self
            .to_discard
            .iter()
            .filter_map(|id| {
                self.arena
                    .get(id)
                    .map(|e| (id.raw(), e.type_name().to_string()))
            })
            .collect();
        if let Some(msg) = OutboundMessage::discards(&discards) {
            out.push(msg);
        }
        for id in std::mem::take(&mut self.to_discard) {
            self.arena.remove(&id);
        }

        // Frame bookkeeping: lifecycle flags reset, packet generation ends.
        for entry in self.arena.values_mut() {
            entry.was_created = false;
            entry.was_updated = false;
        }
        self.to_broadcast.clear();
        self.sweep_packets();

        if !out.is_empty() {
            debug!(messages = out.len(), "frame encoded");
        }
        Ok(out)
    }

    /// The highest ancestor whose message will cover this node: climb
    /// while the parent also changed this cycle or while the current node
    /// renders merged into its parent.
    fn find_stable_parent(&self, mut id: NodeId) -> NodeId {
        loop {
            let Some(entry) = self.arena.get(&id) else {
                return id;
            };
            let Some(parent) = entry.parent else {
                return id;
            };
            let parent_changed = self
                .arena
                .get(&parent)
                .is_some_and(|p| p.was_created || p.was_updated);
            if parent_changed || entry.merged_into_parent() {
                id = parent;
            } else {
                return id;
            }
        }
    }

    fn has_ancestor_in(&self, id: NodeId, set: &ahash::AHashSet<NodeId>) -> bool {
        let mut cursor = self.arena.get(&id).and_then(|e| e.parent);
        while let Some(ancestor) = cursor {
            if set.contains(&ancestor) {
                return true;
            }
            cursor = self.arena.get(&ancestor).and_then(|e| e.parent);
        }
        false
    }

    /// Encode one changed node as a `#cellUpdated` message.
    ///
    /// # Panics
    ///
    /// Panics if the node renders merged into its parent: a merged node
    /// must never be referenced independently over the wire, and asking
    /// for it indicates a broken component, not a recoverable condition.
    pub fn encode_update(&self, id: NodeId, registry: &DisplayRegistry) -> OutboundMessage {
        let entry = self
            .arena
            .get(&id)
            .unwrap_or_else(|| panic!("encode_update({id}): unknown node"));
        assert!(
            !entry.merged_into_parent(),
            "node {id} is merged into its parent and must not be sent independently"
        );

        let structure = self.update_structure(id, registry);
        OutboundMessage::updated(structure, entry.should_display(), entry.postscript.clone())
    }

    /// Partial structure: children collapse to ids unless they changed.
    fn update_structure(&self, id: NodeId, registry: &DisplayRegistry) -> NodeStructure {
        let entry = &self.arena[&id];
        let mut named_children = BTreeMap::new();

        for (name, slot) in entry.children.iter() {
            let rendered = match slot {
                ChildSlot::Single(child) => self.resolve_update_child(*child, registry),
                ChildSlot::List(children) => ChildStructure::Many(
                    children
                        .iter()
                        .map(|c| self.resolve_update_child(*c, registry))
                        .collect(),
                ),
            };
            named_children.insert(name.to_string(), rendered);
        }

        self.structure_envelope(id, named_children, registry)
    }

    fn resolve_update_child(&self, child: NodeId, registry: &DisplayRegistry) -> ChildStructure {
        let entry = &self.arena[&child];
        if entry.was_created {
            ChildStructure::Nested(Box::new(self.expanded_structure(child, registry)))
        } else if entry.was_updated {
            ChildStructure::Nested(Box::new(self.update_structure(child, registry)))
        } else {
            ChildStructure::Id(child.raw())
        }
    }

    /// Full structure: every named child rendered as a nested structure
    /// down to the leaves.
    fn expanded_structure(&self, id: NodeId, registry: &DisplayRegistry) -> NodeStructure {
        let entry = &self.arena[&id];
        let mut named_children = BTreeMap::new();

        for (name, slot) in entry.children.iter() {
            let rendered = match slot {
                ChildSlot::Single(child) => {
                    ChildStructure::Nested(Box::new(self.expanded_structure(*child, registry)))
                }
                ChildSlot::List(children) => ChildStructure::Many(
                    children
                        .iter()
                        .map(|c| {
                            ChildStructure::Nested(Box::new(self.expanded_structure(*c, registry)))
                        })
                        .collect(),
                ),
            };
            named_children.insert(name.to_string(), rendered);
        }

        self.structure_envelope(id, named_children, registry)
    }

    fn structure_envelope(
        &self,
        id: NodeId,
        named_children: BTreeMap<String, ChildStructure>,
        registry: &DisplayRegistry,
    ) -> NodeStructure {
        let entry = &self.arena[&id];
        let mut extra_data = entry.export.clone();
        registry.apply(entry.type_name(), &mut extra_data);

        NodeStructure {
            id: id.raw(),
            cell_type: entry.type_name().to_string(),
            name_in_parent: entry.name_in_parent.clone(),
            parent_id: entry.parent.map(NodeId::raw),
            named_children,
            extra_data,
        }
    }
}
