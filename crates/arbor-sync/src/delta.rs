//! Delta computation between two text snapshots, and event reversal.

use crate::event::{Change, Cursor, EditEvent, EditReason, UndoKind};

/// Compute the single-hunk event that turns `cur_text` into `new_text`.
///
/// A forward cursor advances while lines match at the head; a backward
/// cursor advances while lines match at the tail; the remaining middle
/// span is the replacement. The start/end cursor sets bracket the hunk.
///
/// Returns `None` when the texts are equal.
#[must_use]
pub fn compute_delta_event(
    cur_text: &str,
    new_text: &str,
    reason: EditReason,
    timestamp: f64,
) -> Option<EditEvent> {
    let cur: Vec<&str> = cur_text.split('\n').collect();
    let new: Vec<&str> = new_text.split('\n').collect();

    if cur == new {
        return None;
    }

    let mut i = 0;
    while i < cur.len() && i < new.len() && cur[i] == new[i] {
        i += 1;
    }

    let mut j = 0;
    while j < cur.len()
        && j < new.len()
        && i + j < cur.len()
        && i + j < new.len()
        && cur[cur.len() - 1 - j] == new[new.len() - 1 - j]
    {
        j += 1;
    }

    let start_cursor = Cursor {
        pos: ((cur.len() - j).min(cur.len() - 1), 0),
        tail: (i.min(cur.len() - 1), 0),
        desired_col: 0,
    };
    let end_cursor = Cursor {
        pos: ((new.len() - j).min(new.len() - 1), 0),
        tail: (i.min(new.len() - 1), 0),
        desired_col: 0,
    };

    Some(EditEvent {
        index: 0,
        changes: vec![Change {
            line_index: i,
            old_lines: cur[i..cur.len() - j].iter().map(|s| s.to_string()).collect(),
            new_lines: new[i..new.len() - j].iter().map(|s| s.to_string()).collect(),
        }],
        start_cursors: vec![start_cursor],
        new_cursors: vec![end_cursor],
        timestamp,
        undo_state: None,
        session_id: None,
        reason,
        undoing: None,
    })
}

/// Swap a change's old and new spans.
#[must_use]
pub fn reverse_change(change: &Change) -> Change {
    Change {
        line_index: change.line_index,
        old_lines: change.new_lines.clone(),
        new_lines: change.old_lines.clone(),
    }
}

/// Build the event that reverses `event`.
///
/// Changes are reversed in reverse order, cursor sets swap, and the new
/// event carries an undo marker: reversing an undo yields a redo,
/// reversing anything else yields an undo. `undoing` records the global
/// index of the reversed event.
#[must_use]
pub fn reverse_event_for_undo(
    event: &EditEvent,
    session_id: impl Into<String>,
    timestamp: f64,
) -> EditEvent {
    let undo_state = match event.undo_state {
        Some(UndoKind::Undo) => Some(UndoKind::Redo),
        _ => Some(UndoKind::Undo),
    };

    EditEvent {
        index: 0,
        changes: event.changes.iter().rev().map(reverse_change).collect(),
        start_cursors: event.new_cursors.clone(),
        new_cursors: event.start_cursors.clone(),
        timestamp,
        undo_state,
        session_id: Some(session_id.into()),
        reason: event.reason.clone(),
        undoing: Some(event.index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{apply_events, event_applies};
    use pretty_assertions::assert_eq;

    fn lines(text: &str) -> Vec<String> {
        text.split('\n').map(str::to_string).collect()
    }

    fn apply(text: &str, event: &EditEvent) -> String {
        apply_events(&lines(text), std::slice::from_ref(event)).join("\n")
    }

    #[test]
    fn equal_texts_have_no_delta() {
        assert!(compute_delta_event("a\nb", "a\nb", EditReason::unknown(), 0.0).is_none());
    }

    #[test]
    fn middle_line_replacement() {
        let event =
            compute_delta_event("a\nb\nc", "a\nx\nc", EditReason::unknown(), 0.0).unwrap();
        assert_eq!(event.changes.len(), 1);
        assert_eq!(event.changes[0].line_index, 1);
        assert_eq!(event.changes[0].old_lines, vec!["b"]);
        assert_eq!(event.changes[0].new_lines, vec!["x"]);
        assert_eq!(apply("a\nb\nc", &event), "a\nx\nc");
    }

    #[test]
    fn insertion_and_deletion_deltas_round_trip() {
        let cases = [
            ("a\nb", "a\nmid\nb"),
            ("a\nmid\nb", "a\nb"),
            ("", "x\ny"),
            ("x\ny", ""),
            ("a\nb\nc\nd", "a\nz\nd"),
            ("same\nsame\nsame", "same\nsame"),
        ];

        for (from, to) in cases {
            let event = compute_delta_event(from, to, EditReason::unknown(), 0.0).unwrap();
            assert!(event_applies(&lines(from), &event), "{from:?} -> {to:?}");
            assert_eq!(apply(from, &event), to, "{from:?} -> {to:?}");

            let reversed = reverse_event_for_undo(&event, "s", 1.0);
            assert_eq!(apply(to, &reversed), from, "reverse {from:?} -> {to:?}");
        }
    }

    #[test]
    fn reversal_swaps_cursors_and_marks_undo() {
        let event = compute_delta_event("a", "b", EditReason::keystroke("b"), 0.0).unwrap();
        let mut indexed = event.clone();
        indexed.index = 7;

        let reversed = reverse_event_for_undo(&indexed, "sess", 2.0);
        assert_eq!(reversed.undo_state, Some(UndoKind::Undo));
        assert_eq!(reversed.undoing, Some(7));
        assert_eq!(reversed.start_cursors, event.new_cursors);
        assert_eq!(reversed.new_cursors, event.start_cursors);
        assert_eq!(reversed.session_id.as_deref(), Some("sess"));

        // Reversing an undo yields a redo.
        let mut undo_event = reversed;
        undo_event.index = 8;
        let redone = reverse_event_for_undo(&undo_event, "sess", 3.0);
        assert_eq!(redone.undo_state, Some(UndoKind::Redo));
        assert_eq!(redone.undoing, Some(8));
    }
}
