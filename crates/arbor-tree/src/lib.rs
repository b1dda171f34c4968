#![forbid(unsafe_code)]

//! The Arbor node tree: a server-resident hierarchy of stateful nodes that
//! recomputes itself incrementally and reconciles each recompute's output
//! against the previous subtree shape.
//!
//! # Model
//!
//! Nodes live in an arena keyed by [`arbor_reactive::NodeId`]; behavior
//! lives in a [`Widget`] trait object owned by the arena entry. Children
//! reference parents by id lookup only — there are no owning back-pointers
//! and therefore no cycles to break on teardown.
//!
//! A recompute runs inside a [`NodeCx`] that captures every cell and store
//! read as a dependency edge and collects the widget's child declarations.
//! The [`TreeManager`] then diffs declarations against the previous child
//! map by `(name, identity key)`: matches are retained with their subtrees
//! and state intact, new children are installed and fully expanded, and
//! disappearing children get their removal hook before being marked for
//! collection. Collected nodes re-declared later in the same cycle are
//! reinstalled instead of destroyed, so the remote renderer never sees a
//! remove/recreate flash.
//!
//! # Failure isolation
//!
//! A failing recompute never aborts the cycle: the node's content is
//! replaced by a [`Diagnostic`] node carrying the formatted failure and
//! its siblings proceed normally. A cycle that keeps producing dirty nodes
//! past the configured pass cap is fatal ([`CycleError::FixpointExceeded`])
//! — a runaway feedback loop is a bug, not a load condition.

pub mod diagnostic;
pub mod encode;
pub mod manager;
pub mod node;
pub mod widget;

pub use diagnostic::Diagnostic;
pub use manager::{CycleError, TreeConfig, TreeManager};
pub use node::{ChildMap, ChildSlot};
pub use widget::{
    ChildDecl, ChildKey, MessageCx, NodeCx, RecomputeError, RemovalCx, Widget,
};

pub use arbor_reactive::NodeId;
