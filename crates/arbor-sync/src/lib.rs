#![forbid(unsafe_code)]

//! Multi-party document synchronization for Arbor.
//!
//! A document is an ordered sequence of lines plus an append-only log of
//! [`EditEvent`]s; replaying the log against the base lines
//! deterministically reconstructs the current text. On top of that model
//! this crate provides:
//!
//! - **Delta computation** ([`delta::compute_delta_event`]): two text
//!   snapshots reduce to one single-hunk line replacement with bracketing
//!   cursor hints.
//! - **Grouped undo/redo** ([`undo`]): a backward counter scan finds the
//!   event to reverse, then extends greedily through the same "undo
//!   stream" (contiguous cursors, same keystroke category) so a typing
//!   burst undoes as one unit. Reversals are appended as new, marked
//!   events — history is never rewritten.
//! - **Log compression** ([`compress`]): unreachable undo/redo spans are
//!   excised, adjacent same-stream events collapse, and a cold prefix
//!   folds into the base lines — all under the invariant that the
//!   compressed state replays to byte-identical text.
//! - **Conflict policy** ([`session::SessionSync`]): a conservative
//!   single-window optimistic-concurrency scheme; a session whose claimed
//!   index falls outside its watermark window is told to resynchronize.
//! - **[`DocumentNode`]**: the tree widget binding the engine to cells,
//!   sessions, and the wire.

pub mod compress;
pub mod delta;
pub mod document_node;
pub mod event;
pub mod session;
pub mod state;
pub mod undo;

pub use compress::{compress_state, CompressLimits};
pub use delta::{compute_delta_event, reverse_change, reverse_event_for_undo};
pub use document_node::{DocumentNode, SelectionEntry, SelectionMap};
pub use event::{Change, Cursor, EditEvent, EditReason, KeystrokeCategory, UndoKind};
pub use session::SessionSync;
pub use state::DocumentState;
pub use undo::{
    compute_redo_events, compute_undo_events, next_redo_index, next_undo_index, same_undo_stream,
};
