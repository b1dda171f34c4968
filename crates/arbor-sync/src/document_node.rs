//! The collaborative document node.
//!
//! One `DocumentNode` exists per editing session, all sharing the same
//! document [`Cell`] (and a selection cell for cursor fan-out). The node:
//!
//! - exports the collapsed initial state on its first recompute;
//! - on every later recompute, relays events the client has not seen
//!   (`acceptedEvents`), or a full `resetState` when the client's view
//!   is unreachable from the log;
//! - handles inbound `newEvent` / `selectionState` / `triggerUndo` /
//!   `triggerRedo` messages under the watermark conflict policy;
//! - compresses the log every [`DocumentNode::COMPRESS_EVERY`] accepted
//!   events, sparing anything younger than the age guard.

use std::collections::BTreeMap;

use arbor_reactive::{Cell, ChangeReason};
use arbor_tree::{MessageCx, NodeCx, RecomputeError, RemovalCx, Widget};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::compress::{compress_state, CompressLimits};
use crate::event::EditEvent;
use crate::session::SessionSync;
use crate::state::{event_applies, events_apply, DocumentState};
use crate::undo::{compute_redo_events, compute_undo_events};

/// One session's cursor presence, fanned out to every other session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionEntry {
    #[serde(rename = "lastUpdateTimestamp")]
    pub last_update_timestamp: f64,
    #[serde(rename = "selectionState")]
    pub selection_state: Value,
    pub username: Option<String>,
}

/// Session id -> that session's selection presence.
pub type SelectionMap = BTreeMap<String, SelectionEntry>;

/// Collaborative text editor node.
pub struct DocumentNode {
    state: Cell<DocumentState>,
    selections: Cell<SelectionMap>,
    sync: SessionSync,
    username: Option<String>,
    read_only: bool,
    commit_delay: Option<u64>,
    first_line: Cell<u64>,
    last_line: Cell<u64>,
    split_fraction: Cell<f64>,
    cursors: Cell<Value>,
    ever_calculated: bool,
    last_selection_broadcast: Option<SelectionMap>,
    clock: Box<dyn Fn() -> f64>,
    limits: CompressLimits,
}

impl DocumentNode {
    /// Compress after this many accepted events.
    pub const COMPRESS_EVERY: usize = 100;
    /// Events younger than this many seconds are never compressed.
    pub const COMPRESS_AGE: f64 = 10.0;

    #[must_use]
    pub fn new(
        state: Cell<DocumentState>,
        selections: Cell<SelectionMap>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            state,
            selections,
            sync: SessionSync::new(session_id, 0),
            username: None,
            read_only: false,
            commit_delay: None,
            first_line: Cell::new(0),
            last_line: Cell::new(0),
            split_fraction: Cell::new(0.5),
            cursors: Cell::new(Value::Null),
            ever_calculated: false,
            last_selection_broadcast: None,
            clock: Box::new(system_clock),
            limits: CompressLimits::default(),
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn with_commit_delay(mut self, millis: u64) -> Self {
        self.commit_delay = Some(millis);
        self
    }

    /// Replace the timestamp source (tests use a fixed clock).
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> f64 + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// This session's sync bookkeeping.
    #[must_use]
    pub fn sync_state(&self) -> &SessionSync {
        &self.sync
    }

    fn now(&self) -> f64 {
        (self.clock)()
    }

    /// Events the client has not seen, or a full reset when its sent
    /// index is unreachable (compressed past, or diverged).
    fn sync_message(&mut self, state: &DocumentState) -> Option<Value> {
        let top = state.top_index();
        let sent = self.sync.sent_event_index();
        if sent == top {
            return None;
        }

        if let Some(pos) = state.events.iter().position(|e| e.index >= sent) {
            if state.events[pos].index == sent {
                let tail = &state.events[pos..];
                info!(
                    session = self.sync.session_id(),
                    from = sent,
                    to = top,
                    count = tail.len(),
                    "relaying accepted events"
                );
                self.sync.mark_sent(top);
                return Some(json!({"acceptedEvents": tail, "topEventIndex": top}));
            }
        }

        warn!(
            session = self.sync.session_id(),
            sent, top, "client view unreachable from log; resetting"
        );
        self.sync.note_resync(top);
        Some(json!({
            "resetState": state.collapse_to_topmost(),
            "topEventIndex": top,
        }))
    }

    fn send_reset(&mut self, cx: &mut MessageCx<'_>, state: &DocumentState) {
        let top = state.top_index();
        cx.schedule_message(json!({
            "resetState": state.collapse_to_topmost(),
            "topEventIndex": top,
        }));
        self.sync.note_resync(top);
    }

    fn handle_new_event(&mut self, cx: &mut MessageCx<'_>, message: &Value) {
        if self.read_only {
            warn!(
                session = self.sync.session_id(),
                "edit for a read-only document dropped"
            );
            return;
        }

        let state = self.state.get_untracked();
        let top = state.top_index();

        let claimed = message.get("topEventIndex").and_then(Value::as_u64);
        let event = message
            .get("event")
            .cloned()
            .and_then(|v| serde_json::from_value::<EditEvent>(v).ok());
        let (Some(claimed), Some(event)) = (claimed, event) else {
            warn!(session = self.sync.session_id(), "malformed newEvent; resetting");
            self.send_reset(cx, &state);
            return;
        };

        let acceptable = self.sync.accepts(claimed, top)
            && event.is_well_formed()
            && event_applies(&state.current_lines(), &event);
        if !acceptable {
            warn!(
                session = self.sync.session_id(),
                claimed, top, "dropping event; session must resynchronize"
            );
            self.send_reset(cx, &state);
            return;
        }

        let mut next = state;
        next.append(event);
        if next.events.len() % Self::COMPRESS_EVERY == 0 {
            next = compress_state(&next, Some(self.now() - Self::COMPRESS_AGE), &self.limits);
        }

        if claimed == top {
            // The client was fully caught up; its in-flight chain starts
            // fresh here.
            self.sync.close_window();
        }
        self.sync.note_accepted(claimed, next.top_index());
        debug!(
            session = self.sync.session_id(),
            claimed,
            top = next.top_index(),
            "accepted event"
        );
        self.state
            .set_in(cx.reactive(), next, ChangeReason::Message);
    }

    fn handle_selection_state(&mut self, cx: &mut MessageCx<'_>, message: &Value) {
        let first = message
            .get("topLineNumber")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let last = message
            .get("bottomLineNumber")
            .and_then(Value::as_u64)
            .unwrap_or(first);
        let cursors = message
            .get("currentCursors")
            .cloned()
            .unwrap_or(Value::Null);

        self.first_line.set_in(cx.reactive(), first, ChangeReason::Message);
        self.last_line.set_in(cx.reactive(), last, ChangeReason::Message);
        self.cursors
            .set_in(cx.reactive(), cursors.clone(), ChangeReason::Message);
        if let Some(split) = message.get("splitFraction").and_then(Value::as_f64) {
            self.split_fraction
                .set_in(cx.reactive(), split, ChangeReason::Message);
        }

        // Tell the other sessions about our selection.
        if self.username.is_some() {
            let mut map = self.selections.get_untracked();
            map.insert(
                self.sync.session_id().to_string(),
                SelectionEntry {
                    last_update_timestamp: self.now(),
                    selection_state: cursors,
                    username: self.username.clone(),
                },
            );
            self.selections
                .set_in(cx.reactive(), map, ChangeReason::Message);
        }
    }

    fn trigger_undo_or_redo(&mut self, cx: &mut MessageCx<'_>, is_undo: bool) {
        let state = self.state.get_untracked();
        let now = self.now();
        let reversals = if is_undo {
            compute_undo_events(&state, self.sync.session_id(), now)
        } else {
            compute_redo_events(&state, self.sync.session_id(), now)
        };

        if reversals.is_empty() {
            debug!(
                session = self.sync.session_id(),
                is_undo, "no reversal group available"
            );
            return;
        }

        // Our own reversal of our own log must always apply.
        assert!(
            events_apply(&state.current_lines(), &reversals),
            "computed a reversal group that does not apply"
        );

        info!(
            session = self.sync.session_id(),
            is_undo,
            count = reversals.len(),
            "appending reversal group"
        );
        let mut next = state;
        for event in reversals {
            next.append(event);
        }
        self.state
            .set_in(cx.reactive(), next, ChangeReason::Message);
    }
}

impl Widget for DocumentNode {
    fn type_name(&self) -> &'static str {
        "DocumentNode"
    }

    fn recompute(&mut self, cx: &mut NodeCx<'_>) -> Result<(), RecomputeError> {
        let state = self.state.get(cx.reactive());
        let selections = self.selections.get(cx.reactive());

        if !self.ever_calculated {
            let initial = state.collapse_to_topmost();
            self.sync.mark_sent(initial.top_index());

            cx.export(
                "initialState",
                serde_json::to_value(&initial).map_err(|e| RecomputeError::new(e.to_string()))?,
            );
            cx.export("editSessionId", json!(self.sync.session_id()));
            cx.export("username", json!(self.username));
            cx.export("readOnly", json!(self.read_only));
            cx.export("commitDelay", json!(self.commit_delay));
            cx.export(
                "firstLineIx",
                json!(self.first_line.get_untracked()),
            );
            cx.export("initialCursors", self.cursors.get_untracked());
            cx.export("splitFraction", json!(self.split_fraction.get_untracked()));
            cx.export(
                "userSelectionData",
                serde_json::to_value(&selections)
                    .map_err(|e| RecomputeError::new(e.to_string()))?,
            );
            self.last_selection_broadcast = Some(selections);
            self.ever_calculated = true;
            return Ok(());
        }

        if let Some(message) = self.sync_message(&state) {
            cx.schedule_message(message);
        }

        if self.last_selection_broadcast.as_ref() != Some(&selections) {
            let others: SelectionMap = selections
                .iter()
                .filter(|(id, _)| id.as_str() != self.sync.session_id())
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect();
            cx.schedule_message(json!({
                "userSelectionSlotChanged": true,
                "userSelections": others,
            }));
            self.last_selection_broadcast = Some(selections);
        }

        Ok(())
    }

    fn on_message(&mut self, cx: &mut MessageCx<'_>, message: &Value) {
        match message.get("msg").and_then(Value::as_str) {
            Some("newEvent") => self.handle_new_event(cx, message),
            Some("selectionState") => self.handle_selection_state(cx, message),
            Some("triggerUndo") => self.trigger_undo_or_redo(cx, true),
            Some("triggerRedo") => self.trigger_undo_or_redo(cx, false),
            other => debug!(?other, "unhandled document message"),
        }
    }

    fn on_removed(&mut self, cx: &mut RemovalCx<'_>) {
        // Evict our selection entry once we are off the recompute path.
        let selections = self.selections.clone();
        let session_id = self.sync.session_id().to_string();
        cx.schedule_callback(move |_| {
            let mut map = selections.get_untracked();
            if map.remove(&session_id).is_some() {
                selections.set_with_reason(map, ChangeReason::Callback);
            }
        });
    }
}

fn system_clock() -> f64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
