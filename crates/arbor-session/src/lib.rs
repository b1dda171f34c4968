#![forbid(unsafe_code)]

//! One remote renderer session over an Arbor tree.
//!
//! The session owns a [`arbor_tree::TreeManager`] and a [`Transport`],
//! and pumps them: inbound JSON is parsed and dispatched (handlers run
//! inside a retried store transaction with a throwaway message context),
//! then a frame is rendered, sent, and paced by the [`FrameThrottle`] so
//! a slow remote renderer is never flooded.
//!
//! Transport and handshake internals stay external: anything that can
//! deliver JSON strings in and take JSON values out can drive a session.

pub mod session;
pub mod throttle;
pub mod transport;

pub use session::{Session, SessionConfig};
pub use throttle::FrameThrottle;
pub use transport::Transport;
