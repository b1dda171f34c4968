//! Grouped undo/redo over the event log.
//!
//! Undo never rewrites history: it appends reversing events. Finding what
//! to reverse is a backward scan with a signed pending counter; extending
//! the reversal through a typing burst is the coalescing predicate
//! [`same_undo_stream`].

use tracing::debug;

use crate::delta::reverse_event_for_undo;
use crate::event::EditEvent;
use crate::state::DocumentState;

/// Do `e1` then `e2` belong to one undo group?
///
/// True when `e1`'s ending cursor set equals `e2`'s starting cursor set
/// and both carry keystroke reasons of the same category (space, newline,
/// or plain character) — a burst of typing undoes as one unit, but a
/// space or newline starts a new group.
#[must_use]
pub fn same_undo_stream(e1: &EditEvent, e2: &EditEvent) -> bool {
    if e1.new_cursors != e2.start_cursors {
        return false;
    }
    match (e1.reason.keystroke_category(), e2.reason.keystroke_category()) {
        (Some(c1), Some(c2)) => c1 == c2,
        _ => false,
    }
}

/// Position of the event a `pending`-deep undo reverses.
///
/// Scan backward keeping a signed counter: a plain edit or a redo marker
/// consumes one pending undo, an undo marker adds one (its paired edit is
/// already reversed). `None` when the log cannot satisfy the request.
#[must_use]
pub fn next_undo_index(events: &[EditEvent], pending: u32) -> Option<usize> {
    let mut pending = i64::from(pending);
    let mut i = events.len() as i64 - 1;

    while i >= 0 && pending > 0 {
        match events[i as usize].undo_state {
            None => pending -= 1,
            Some(crate::event::UndoKind::Undo) => pending += 1,
            Some(crate::event::UndoKind::Redo) => pending -= 1,
        }
        i -= 1;
    }

    if pending > 0 {
        None
    } else {
        Some((i + 1) as usize)
    }
}

/// Position of the undo a `pending`-deep redo reverses.
///
/// The forward-scanning symmetric of [`next_undo_index`]: a plain edit
/// kills the redo chain entirely, an undo consumes a pending redo, a redo
/// adds one.
#[must_use]
pub fn next_redo_index(events: &[EditEvent], pending: u32) -> Option<usize> {
    let mut pending = i64::from(pending);
    let mut i = events.len() as i64 - 1;

    while i >= 0 && pending > 0 {
        match events[i as usize].undo_state {
            None => return None,
            Some(crate::event::UndoKind::Undo) => pending -= 1,
            Some(crate::event::UndoKind::Redo) => pending += 1,
        }
        i -= 1;
    }

    if pending > 0 {
        None
    } else {
        Some((i + 1) as usize)
    }
}

/// Events that undo the most recent undo group.
///
/// The first reversal targets the event found by the counter scan; the
/// group then extends greedily through [`same_undo_stream`]. Returned
/// events are in application order (append them as-is); empty when there
/// is nothing to undo.
#[must_use]
pub fn compute_undo_events(
    state: &DocumentState,
    session_id: &str,
    timestamp: f64,
) -> Vec<EditEvent> {
    compute_reversals(state, session_id, timestamp, next_undo_index)
}

/// Events that redo the most recent redo group. Symmetric to
/// [`compute_undo_events`].
#[must_use]
pub fn compute_redo_events(
    state: &DocumentState,
    session_id: &str,
    timestamp: f64,
) -> Vec<EditEvent> {
    compute_reversals(state, session_id, timestamp, next_redo_index)
}

fn compute_reversals(
    state: &DocumentState,
    session_id: &str,
    timestamp: f64,
    locate: fn(&[EditEvent], u32) -> Option<usize>,
) -> Vec<EditEvent> {
    let events = &state.events;
    let Some(mut i) = locate(events, 1) else {
        return Vec::new();
    };

    let mut res = vec![reverse_event_for_undo(&events[i], session_id, timestamp)];

    loop {
        let Some(i2) = locate(events, 1 + res.len() as u32) else {
            break;
        };
        debug_assert!(i2 < i);
        if !same_undo_stream(&events[i2], &events[i]) {
            break;
        }
        res.push(reverse_event_for_undo(&events[i2], session_id, timestamp));
        i = i2;
    }

    debug!(count = res.len(), "computed reversal group");
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::compute_delta_event;
    use crate::event::{EditReason, UndoKind};
    use pretty_assertions::assert_eq;

    /// Append the delta from the current text to `next`, with `reason`.
    fn push(state: &mut DocumentState, next: &str, reason: EditReason) {
        let event = compute_delta_event(&state.current_text(), next, reason, 0.0)
            .expect("texts must differ");
        state.append(event);
    }

    fn trigger_undo(state: &mut DocumentState) -> usize {
        let events = compute_undo_events(state, "sess", 1.0);
        let n = events.len();
        for e in events {
            state.append(e);
        }
        n
    }

    fn trigger_redo(state: &mut DocumentState) -> usize {
        let events = compute_redo_events(state, "sess", 2.0);
        let n = events.len();
        for e in events {
            state.append(e);
        }
        n
    }

    #[test]
    fn undo_then_redo_single_edit() {
        let mut state = DocumentState::from_text("a");
        push(&mut state, "ab", EditReason::Event { event: "paste".into() });

        assert_eq!(trigger_undo(&mut state), 1);
        assert_eq!(state.current_text(), "a");
        assert_eq!(state.events.last().unwrap().undo_state, Some(UndoKind::Undo));
        assert_eq!(state.events.last().unwrap().undoing, Some(0));

        assert_eq!(trigger_redo(&mut state), 1);
        assert_eq!(state.current_text(), "ab");
        assert_eq!(state.events.last().unwrap().undo_state, Some(UndoKind::Redo));
    }

    #[test]
    fn nothing_to_undo_or_redo() {
        let mut state = DocumentState::from_text("a");
        assert!(compute_undo_events(&state, "s", 0.0).is_empty());
        assert!(compute_redo_events(&state, "s", 0.0).is_empty());

        // Redo without a preceding undo is empty too.
        push(&mut state, "ab", EditReason::keystroke("b"));
        assert!(compute_redo_events(&state, "s", 0.0).is_empty());
    }

    #[test]
    fn typing_burst_undoes_as_one_group() {
        let mut state = DocumentState::from_text("");
        push(&mut state, "h", EditReason::keystroke("h"));
        push(&mut state, "he", EditReason::keystroke("e"));
        push(&mut state, "hey", EditReason::keystroke("y"));

        // One undo reverses the whole burst.
        assert_eq!(trigger_undo(&mut state), 3);
        assert_eq!(state.current_text(), "");

        // One redo replays it.
        assert_eq!(trigger_redo(&mut state), 3);
        assert_eq!(state.current_text(), "hey");
    }

    #[test]
    fn space_starts_a_new_undo_group() {
        let mut state = DocumentState::from_text("");
        push(&mut state, "hi", EditReason::keystroke("i"));
        push(&mut state, "hi ", EditReason::keystroke(" "));
        push(&mut state, "hi t", EditReason::keystroke("t"));
        push(&mut state, "hi th", EditReason::keystroke("h"));

        // First undo removes the second word only.
        trigger_undo(&mut state);
        assert_eq!(state.current_text(), "hi ");
        // Second removes the space.
        trigger_undo(&mut state);
        assert_eq!(state.current_text(), "hi");
        // Third removes the first word.
        trigger_undo(&mut state);
        assert_eq!(state.current_text(), "");
    }

    #[test]
    fn non_keystroke_reasons_never_coalesce() {
        let mut state = DocumentState::from_text("a");
        push(&mut state, "ab", EditReason::server_push());
        push(&mut state, "abc", EditReason::server_push());

        assert_eq!(trigger_undo(&mut state), 1);
        assert_eq!(state.current_text(), "ab");
        assert_eq!(trigger_undo(&mut state), 1);
        assert_eq!(state.current_text(), "a");
    }

    #[test]
    fn n_undos_then_n_redos_round_trip() {
        let texts = ["one", "one\ntwo", "one\ntwo\nthree", "one\n2\nthree"];
        let mut state = DocumentState::from_text(texts[0]);
        for t in &texts[1..] {
            push(&mut state, t, EditReason::Event { event: "paste".into() });
        }

        for expected in texts.iter().rev().skip(1) {
            trigger_undo(&mut state);
            assert_eq!(&state.current_text(), expected);
        }
        for expected in texts.iter().skip(1) {
            trigger_redo(&mut state);
            assert_eq!(&state.current_text(), expected);
        }
    }

    #[test]
    fn new_edit_after_undo_clears_the_redo_chain() {
        let mut state = DocumentState::from_text("a");
        push(&mut state, "ab", EditReason::keystroke("b"));
        trigger_undo(&mut state);
        push(&mut state, "ax", EditReason::keystroke("x"));

        // The plain edit kills the redo chain.
        assert!(compute_redo_events(&state, "s", 0.0).is_empty());
        assert_eq!(state.current_text(), "ax");
    }

    #[test]
    fn undoing_an_undo_via_redo_then_undo_again() {
        let mut state = DocumentState::from_text("x");
        push(&mut state, "xy", EditReason::Event { event: "paste".into() });
        trigger_undo(&mut state); // -> "x"
        trigger_redo(&mut state); // -> "xy"
        trigger_undo(&mut state); // -> "x" (reverses the redo)

        assert_eq!(state.current_text(), "x");
        let last = state.events.last().unwrap();
        assert_eq!(last.undo_state, Some(UndoKind::Undo));
    }
}
