//! Outbound message shapes.
//!
//! Three message families reach the remote renderer:
//!
//! - **created/updated** (`#cellUpdated`): a node's structure. A freshly
//!   created node is fully expanded down to its leaves; an updated node
//!   collapses recursively — each named child is an id (unchanged), a
//!   nested full structure (created this cycle), or a nested partial
//!   structure (updated this cycle). Message size is proportional to what
//!   changed, not to tree size.
//! - **discarded** (`#cellDiscarded` / `#cellsDiscarded`): id + type only,
//!   batched per collection pass.
//! - **side-channel** (`#appendPostscript`, `#cellMessage`): scripts and
//!   node-addressed payloads that ride alongside structure updates.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// The channel every structure message travels on.
pub const MAIN_CHANNEL: &str = "#main";

/// One named child as it appears inside `namedChildren`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChildStructure {
    /// Unchanged child: just its id.
    Id(u64),
    /// Created or updated child: a nested structure.
    Nested(Box<NodeStructure>),
    /// An ordered child list.
    Many(Vec<ChildStructure>),
}

/// A node's structure as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStructure {
    pub id: u64,
    #[serde(rename = "cellType")]
    pub cell_type: String,
    #[serde(rename = "nameInParent")]
    pub name_in_parent: Option<String>,
    #[serde(rename = "parentId")]
    pub parent_id: Option<u64>,
    #[serde(rename = "namedChildren")]
    pub named_children: BTreeMap<String, ChildStructure>,
    #[serde(rename = "extraData")]
    pub extra_data: Map<String, Value>,
}

/// Every message kind the server emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// A created or updated node (the structure says which, by expansion).
    #[serde(rename = "#cellUpdated")]
    CellUpdated {
        channel: &'static str,
        #[serde(flatten)]
        structure: NodeStructure,
        #[serde(rename = "shouldDisplay")]
        should_display: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        postscript: Option<String>,
    },
    /// A single node left the tree.
    #[serde(rename = "#cellDiscarded")]
    CellDiscarded {
        channel: &'static str,
        #[serde(rename = "cellType")]
        cell_type: String,
        id: u64,
    },
    /// A batch of nodes left the tree in one collection pass.
    #[serde(rename = "#cellsDiscarded")]
    CellsDiscarded {
        channel: &'static str,
        ids: Vec<u64>,
    },
    /// Side-channel script for the renderer to execute.
    #[serde(rename = "#appendPostscript")]
    AppendPostscript {
        channel: &'static str,
        script: String,
    },
    /// A node-addressed payload (document events, selection fan-out).
    #[serde(rename = "#cellMessage")]
    CellMessage {
        channel: &'static str,
        id: u64,
        message: Value,
    },
}

impl OutboundMessage {
    /// Build a `#cellUpdated` on the main channel.
    #[must_use]
    pub fn updated(structure: NodeStructure, should_display: bool, postscript: Option<String>) -> Self {
        Self::CellUpdated {
            channel: MAIN_CHANNEL,
            structure,
            should_display,
            postscript,
        }
    }

    /// Build a discard message: single when one node fell out, batched
    /// otherwise.
    ///
    /// `nodes` are `(id, cell_type)` pairs from one collection pass.
    /// Returns `None` for an empty pass.
    #[must_use]
    pub fn discards(nodes: &[(u64, String)]) -> Option<Self> {
        match nodes {
            [] => None,
            [(id, cell_type)] => Some(Self::CellDiscarded {
                channel: MAIN_CHANNEL,
                cell_type: cell_type.clone(),
                id: *id,
            }),
            many => Some(Self::CellsDiscarded {
                channel: MAIN_CHANNEL,
                ids: many.iter().map(|(id, _)| *id).collect(),
            }),
        }
    }

    /// Build an `#appendPostscript`.
    #[must_use]
    pub fn postscript(script: impl Into<String>) -> Self {
        Self::AppendPostscript {
            channel: MAIN_CHANNEL,
            script: script.into(),
        }
    }

    /// Build a `#cellMessage` addressed to `id`.
    #[must_use]
    pub fn cell_message(id: u64, message: Value) -> Self {
        Self::CellMessage {
            channel: MAIN_CHANNEL,
            id,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn leaf(id: u64, cell_type: &str, parent: Option<u64>, name: Option<&str>) -> NodeStructure {
        NodeStructure {
            id,
            cell_type: cell_type.to_string(),
            name_in_parent: name.map(str::to_string),
            parent_id: parent,
            named_children: BTreeMap::new(),
            extra_data: Map::new(),
        }
    }

    #[test]
    fn updated_message_shape() {
        let mut root = leaf(1, "Root", None, None);
        root.named_children
            .insert("body".to_string(), ChildStructure::Id(2));
        root.extra_data.insert("k".to_string(), json!("v"));

        let msg = OutboundMessage::updated(root, true, None);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "channel": "#main",
                "type": "#cellUpdated",
                "id": 1,
                "cellType": "Root",
                "nameInParent": null,
                "parentId": null,
                "namedChildren": {"body": 2},
                "extraData": {"k": "v"},
                "shouldDisplay": true,
            })
        );
    }

    #[test]
    fn nested_and_list_children_serialize() {
        let mut root = leaf(1, "Root", None, None);
        root.named_children.insert(
            "items".to_string(),
            ChildStructure::Many(vec![
                ChildStructure::Id(4),
                ChildStructure::Nested(Box::new(leaf(5, "Label", Some(1), Some("items")))),
            ]),
        );

        let value = serde_json::to_value(&root).unwrap();
        assert_eq!(value["namedChildren"]["items"][0], json!(4));
        assert_eq!(value["namedChildren"]["items"][1]["cellType"], json!("Label"));
    }

    #[test]
    fn postscript_field_is_omitted_when_absent() {
        let msg = OutboundMessage::updated(leaf(1, "Root", None, None), false, None);
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("postscript").is_none());

        let msg = OutboundMessage::updated(leaf(1, "Root", None, None), false, Some("go()".into()));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["postscript"], json!("go()"));
    }

    #[test]
    fn discard_single_vs_batch() {
        let one = OutboundMessage::discards(&[(9, "Label".to_string())]).unwrap();
        assert_eq!(
            serde_json::to_value(&one).unwrap(),
            json!({"channel": "#main", "type": "#cellDiscarded", "cellType": "Label", "id": 9})
        );

        let many =
            OutboundMessage::discards(&[(9, "Label".to_string()), (10, "Label".to_string())])
                .unwrap();
        assert_eq!(
            serde_json::to_value(&many).unwrap(),
            json!({"channel": "#main", "type": "#cellsDiscarded", "ids": [9, 10]})
        );

        assert!(OutboundMessage::discards(&[]).is_none());
    }

    #[test]
    fn postscript_and_cell_message_shapes() {
        let ps = OutboundMessage::postscript("alert(1)");
        assert_eq!(
            serde_json::to_value(&ps).unwrap(),
            json!({"channel": "#main", "type": "#appendPostscript", "script": "alert(1)"})
        );

        let cm = OutboundMessage::cell_message(3, json!({"acceptedEvents": []}));
        assert_eq!(
            serde_json::to_value(&cm).unwrap(),
            json!({"channel": "#main", "type": "#cellMessage", "id": 3,
                   "message": {"acceptedEvents": []}})
        );
    }
}
