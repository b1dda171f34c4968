#![forbid(unsafe_code)]

//! Wire protocol for the Arbor tree: message shapes, the display
//! registry, and the content-addressed packet store.
//!
//! Everything the remote renderer sees is defined here. The tree crate
//! builds these structures; the session crate serializes and sends them.
//! This crate knows nothing about nodes or cells — it is pure data plus
//! the packet allocator.

pub mod messages;
pub mod packets;
pub mod registry;

pub use messages::{ChildStructure, NodeStructure, OutboundMessage, MAIN_CHANNEL};
pub use packets::{PacketId, PacketStore};
pub use registry::DisplayRegistry;
