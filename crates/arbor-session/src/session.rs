//! The session pump.
//!
//! # Inbound
//!
//! Raw JSON strings arrive through [`Session::handle_inbound`]:
//!
//! - `{"event": "requestSessionId"}` / `{"event": "setSessionId", ...}` —
//!   handshake bookkeeping;
//! - `{"ACK": n}` — the renderer confirmed frame `n`, reopening the
//!   outbound window;
//! - `{"target_cell": id, ...}` — routed to that node's message handler,
//!   inside a throwaway message context (reads register no dependencies)
//!   and, when a store is attached, inside a retried transaction. A
//!   conflicted handler is re-run from scratch — cell writes rolled back
//!   first — and abandoned with a log once the policy is exhausted,
//!   invisible to the remote caller.
//!
//! Malformed input is logged and dropped; nothing inbound can take the
//! session down.
//!
//! # Outbound
//!
//! [`Session::run_frame`] renders one cycle, sends the batch, requests an
//! ACK, and paces itself with the frame throttle. While an ACK is
//! outstanding no further frame is sent, so a renderer that stops reading
//! stops receiving.

use std::rc::Rc;

use arbor_proto::{DisplayRegistry, PacketId};
use arbor_reactive::{ComputeCtx, NodeId};
use arbor_store::{run_with_retry, DataStore, RetryOutcome, RetryPolicy};
use arbor_tree::{CycleError, TreeManager};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::throttle::FrameThrottle;
use crate::transport::Transport;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound frame-rate cap.
    pub max_fps: u32,
    /// Retry policy for conflicted message handlers.
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_fps: 10,
            retry: RetryPolicy::default(),
        }
    }
}

/// One remote renderer session.
pub struct Session<T: Transport> {
    manager: TreeManager,
    transport: T,
    registry: DisplayRegistry,
    store: Option<Rc<dyn DataStore>>,
    retry: RetryPolicy,
    throttle: FrameThrottle,
    session_id: Option<String>,
    /// Frame number awaiting its ACK, if any.
    awaiting_ack: Option<u64>,
    frames_sent: u64,
}

impl<T: Transport> Session<T> {
    #[must_use]
    pub fn new(manager: TreeManager, transport: T, config: SessionConfig) -> Self {
        Self {
            manager,
            transport,
            registry: DisplayRegistry::new(),
            store: None,
            retry: config.retry,
            throttle: FrameThrottle::new(config.max_fps),
            session_id: None,
            awaiting_ack: None,
            frames_sent: 0,
        }
    }

    /// Attach the transactional store handlers run against. Also wires
    /// the manager's recompute views to it.
    #[must_use]
    pub fn with_store(mut self, store: Rc<dyn DataStore>) -> Self {
        self.manager.set_store(Rc::clone(&store));
        self.store = Some(store);
        self
    }

    /// Replace the display registry passed to the encoder.
    #[must_use]
    pub fn with_registry(mut self, registry: DisplayRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn manager(&self) -> &TreeManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut TreeManager {
        &mut self.manager
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Resolve an out-of-band packet (stale ids yield empty payloads).
    #[must_use]
    pub fn packet_payload(&mut self, id: PacketId) -> std::sync::Arc<[u8]> {
        self.manager.packet_store().payload(id)
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Parse and dispatch one raw inbound message. Malformed input is
    /// logged and dropped.
    pub fn handle_inbound(&mut self, raw: &str) {
        match serde_json::from_str::<Value>(raw) {
            Ok(message) => self.dispatch(message),
            Err(err) => warn!(%err, "undecodable inbound message dropped"),
        }
    }

    /// Dispatch one parsed inbound message.
    pub fn dispatch(&mut self, message: Value) {
        if let Some(ack) = message.get("ACK") {
            match ack.as_u64() {
                Some(frame) => self.note_ack(frame),
                None => warn!("non-numeric ACK dropped"),
            }
            return;
        }

        if let Some(event) = message.get("event").and_then(Value::as_str) {
            match event {
                "requestSessionId" => {
                    let id = self.ensure_session_id();
                    self.transport.send(json!({"sessionId": id}));
                }
                "setSessionId" => {
                    self.session_id = message
                        .get("sessionId")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    debug!(session = ?self.session_id, "session id set");
                }
                other => warn!(other, "unknown session event dropped"),
            }
            return;
        }

        if let Some(target) = message.get("target_cell").and_then(Value::as_u64) {
            self.dispatch_to_node(NodeId(target), &message);
            return;
        }

        warn!("unrecognized inbound message dropped");
    }

    /// Run a node's message handler, transactionally when a store is
    /// attached.
    fn dispatch_to_node(&mut self, node: NodeId, message: &Value) {
        let Some(store) = self.store.clone() else {
            let mut ctx = ComputeCtx::for_message(node, self.manager.dirty_queue().clone());
            let replies = self.manager.handle_message(node, &mut ctx, None, message);
            ctx.clear_rollbacks();
            self.manager.push_node_messages(node, replies);
            return;
        };

        let retry = self.retry.clone();
        let dirty = self.manager.dirty_queue().clone();
        let manager = &mut self.manager;

        let outcome = run_with_retry(
            &*store,
            &retry,
            "client-message",
            |txn| {
                let mut ctx = ComputeCtx::for_message(node, dirty.clone());
                let replies = manager.handle_message(node, &mut ctx, Some(txn), message);
                (ctx, replies)
            },
            |(mut ctx, _replies)| {
                // Undo the doomed attempt's cell writes before retrying.
                ctx.run_rollbacks();
            },
        );

        match outcome {
            RetryOutcome::Committed {
                result: (mut ctx, replies),
                written,
            } => {
                ctx.clear_rollbacks();
                manager.push_node_messages(node, replies);
                manager.notify_store_writes(&written);
            }
            // Abandoned: already logged; the attempted change simply does
            // not take effect.
            RetryOutcome::Abandoned => {}
        }
    }

    fn note_ack(&mut self, frame: u64) {
        match self.awaiting_ack {
            Some(expected) if expected == frame => {
                self.awaiting_ack = None;
            }
            Some(expected) => {
                warn!(expected, got = frame, "out-of-sequence ACK; window reopened");
                self.awaiting_ack = None;
            }
            None => debug!(frame, "stale ACK ignored"),
        }
    }

    fn ensure_session_id(&mut self) -> String {
        if let Some(id) = &self.session_id {
            return id.clone();
        }
        let stamp = web_time::SystemTime::now()
            .duration_since(web_time::UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let id = format!("session-{stamp:x}");
        self.session_id = Some(id.clone());
        id
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Render one frame and send it.
    ///
    /// Returns the number of messages sent; zero when the previous frame
    /// is still unacknowledged or nothing changed. Sending paces itself
    /// through the frame throttle.
    pub fn run_frame(&mut self) -> Result<usize, CycleError> {
        if self.awaiting_ack.is_some() {
            debug!("previous frame unacknowledged; holding output");
            return Ok(0);
        }

        let messages = self.manager.render_frame(&self.registry)?;
        if messages.is_empty() {
            return Ok(0);
        }

        let count = messages.len();
        for message in &messages {
            match serde_json::to_value(message) {
                Ok(value) => self.transport.send(value),
                Err(err) => error!(%err, "failed to encode outbound message"),
            }
        }

        self.frames_sent += 1;
        self.transport.send(json!({"request_ack": self.frames_sent}));
        self.awaiting_ack = Some(self.frames_sent);
        self.throttle.pace();
        Ok(count)
    }
}
