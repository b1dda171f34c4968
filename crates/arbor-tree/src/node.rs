//! Node storage: child maps and arena entries.

use std::collections::BTreeMap;
use std::rc::Rc;

use arbor_proto::PacketId;
use arbor_reactive::{DependencySource, NodeId};
use arbor_store::ReadRecord;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::widget::{ChildKey, Widget};

/// What one name in a node's child map holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildSlot {
    Single(NodeId),
    List(Vec<NodeId>),
}

impl ChildSlot {
    /// All ids in this slot, in order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        match self {
            Self::Single(id) => std::slice::from_ref(id).iter().copied(),
            Self::List(ids) => ids.as_slice().iter().copied(),
        }
    }
}

/// Named children of a node. Each name holds either a single child or an
/// ordered list. Names iterate in lexical order so encoding and diffing
/// are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChildMap {
    entries: BTreeMap<String, ChildSlot>,
}

impl ChildMap {
    pub fn insert_single(&mut self, name: impl Into<String>, child: NodeId) {
        self.entries.insert(name.into(), ChildSlot::Single(child));
    }

    pub fn insert_list(&mut self, name: impl Into<String>, children: Vec<NodeId>) {
        self.entries.insert(name.into(), ChildSlot::List(children));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ChildSlot> {
        self.entries.get(name)
    }

    /// The single child under `name`, if that slot is a single.
    #[must_use]
    pub fn single(&self, name: &str) -> Option<NodeId> {
        match self.entries.get(name) {
            Some(ChildSlot::Single(id)) => Some(*id),
            _ => None,
        }
    }

    /// The list under `name`, if that slot is a list.
    #[must_use]
    pub fn list(&self, name: &str) -> Option<&[NodeId]> {
        match self.entries.get(name) {
            Some(ChildSlot::List(ids)) => Some(ids),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChildSlot)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every child id in the map, in name order then list order.
    #[must_use]
    pub fn all_children(&self) -> Vec<NodeId> {
        self.entries.values().flat_map(ChildSlot::ids).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One arena slot: a widget plus everything the manager tracks about it.
///
/// `widget` is an `Option` only so the manager can take it out while the
/// widget's own methods run against the arena; it is always present
/// between manager calls.
pub(crate) struct NodeEntry {
    pub widget: Option<Box<dyn Widget>>,
    pub parent: Option<NodeId>,
    pub level: u32,
    pub name_in_parent: Option<String>,
    pub identity_key: Option<ChildKey>,
    pub children: ChildMap,
    pub export: Map<String, Value>,
    pub postscript: Option<String>,
    /// Node-addressed messages awaiting the next frame. Messages queued
    /// before install land here at install time rather than being dropped.
    pub outbox: Vec<Value>,
    pub was_created: bool,
    pub was_updated: bool,
    pub collected: bool,
    /// Cell dependency edges from the last recompute.
    pub cell_subs: Vec<Rc<dyn DependencySource>>,
    /// Store dependency edges from the last recompute.
    pub store_subs: ReadRecord,
    /// Packets this node's export references; re-touched every sweep.
    pub packets: SmallVec<[PacketId; 2]>,
}

impl NodeEntry {
    pub fn new(
        widget: Box<dyn Widget>,
        parent: Option<NodeId>,
        level: u32,
        name_in_parent: Option<String>,
        identity_key: Option<ChildKey>,
        outbox: Vec<Value>,
    ) -> Self {
        Self {
            widget: Some(widget),
            parent,
            level,
            name_in_parent,
            identity_key,
            children: ChildMap::default(),
            export: Map::new(),
            postscript: None,
            outbox,
            was_created: true,
            was_updated: false,
            collected: false,
            cell_subs: Vec::new(),
            store_subs: ReadRecord::new(),
            packets: SmallVec::new(),
        }
    }

    /// The widget's reported type name ("cellType" on the wire).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.widget.as_ref().map_or("<detached>", |w| w.type_name())
    }

    #[must_use]
    pub fn merged_into_parent(&self) -> bool {
        self.widget.as_ref().is_some_and(|w| w.merged_into_parent())
    }

    #[must_use]
    pub fn should_display(&self) -> bool {
        self.widget.as_ref().is_none_or(|w| w.should_display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_map_orders_names_lexically() {
        let mut map = ChildMap::default();
        map.insert_single("zeta", NodeId(1));
        map.insert_single("alpha", NodeId(2));
        map.insert_list("mid", vec![NodeId(3), NodeId(4)]);

        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(
            map.all_children(),
            vec![NodeId(2), NodeId(3), NodeId(4), NodeId(1)]
        );
    }

    #[test]
    fn slot_accessors() {
        let mut map = ChildMap::default();
        map.insert_single("one", NodeId(1));
        map.insert_list("many", vec![NodeId(2)]);

        assert_eq!(map.single("one"), Some(NodeId(1)));
        assert_eq!(map.single("many"), None);
        assert_eq!(map.list("many"), Some(&[NodeId(2)][..]));
        assert_eq!(map.list("one"), None);
        assert!(map.get("absent").is_none());
    }
}
