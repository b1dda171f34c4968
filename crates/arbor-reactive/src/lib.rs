#![forbid(unsafe_code)]

//! Reactive primitives for the Arbor node tree.
//!
//! This crate holds the leaf-level machinery everything else is built on:
//!
//! - [`Cell`]: a single observable value with change listeners and a set of
//!   dependent tree nodes. The unit of reactive state.
//! - [`ComputeCtx`]: an explicit computation context threaded through every
//!   recompute and message handler. It carries the single "currently
//!   recomputing node" slot that makes implicit dependency capture work.
//! - [`DirtyQueue`]: the shared set of nodes awaiting recompute.
//! - [`CallbackQueue`]: a deferral queue that marshals mutations back onto
//!   the single recompute path.
//!
//! # Single-writer model
//!
//! Recomputation is cooperative and single-threaded per tree: at most one
//! node is recomputing at a time, enforced by the context's single
//! current-node slot. Nothing in this crate is `Send`; work arriving from
//! other threads must be funneled through the owning session's inbox and
//! drained into a [`CallbackQueue`] on the tree thread.

pub mod callbacks;
pub mod cell;
pub mod context;
pub mod dirty;

pub use callbacks::CallbackQueue;
pub use cell::{Cell, ChangeReason, ListenerGuard};
pub use context::{ComputeCtx, DependencySource, NodeId};
pub use dirty::DirtyQueue;
