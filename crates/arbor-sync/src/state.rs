//! Document state: base lines plus the event log.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event::{Change, EditEvent};

/// A document: base lines, the events not yet folded into them, and the
/// monotonically increasing next event index.
///
/// # Invariants
///
/// 1. Replaying `events` in order against `base_lines` deterministically
///    reconstructs the current text.
/// 2. `next_index` only grows; every event in `events` has
///    `index < next_index`, and events are ordered by `index` (gaps are
///    legal after compression).
/// 3. `events` is append-only except during compression, which folds a
///    contiguous prefix into `base_lines`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    #[serde(rename = "lines")]
    pub base_lines: Vec<String>,
    pub events: Vec<EditEvent>,
    #[serde(rename = "topEventIndex")]
    pub next_index: u64,
}

impl Default for DocumentState {
    fn default() -> Self {
        // Documents start as a single empty line.
        Self::from_text("")
    }
}

impl DocumentState {
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self {
            base_lines: text.split('\n').map(str::to_string).collect(),
            events: Vec::new(),
            next_index: 0,
        }
    }

    /// The authoritative top-event index: the index the next accepted
    /// event will get.
    #[must_use]
    pub fn top_index(&self) -> u64 {
        self.next_index
    }

    /// Current lines after replaying the whole log.
    #[must_use]
    pub fn current_lines(&self) -> Vec<String> {
        apply_events(&self.base_lines, &self.events)
    }

    /// Current text after replaying the whole log.
    #[must_use]
    pub fn current_text(&self) -> String {
        self.current_lines().join("\n")
    }

    /// Append an event, assigning it the next global index. Returns the
    /// assigned index.
    pub fn append(&mut self, mut event: EditEvent) -> u64 {
        let index = self.next_index;
        event.index = index;
        self.next_index += 1;
        self.events.push(event);
        index
    }

    /// The state with the whole log folded into the base lines: what a
    /// freshly connecting client receives.
    #[must_use]
    pub fn collapse_to_topmost(&self) -> Self {
        Self {
            base_lines: self.current_lines(),
            events: Vec::new(),
            next_index: self.next_index,
        }
    }
}

/// Apply one change in place.
///
/// # Panics
///
/// Panics when the change's range is out of bounds: a locally generated
/// change that does not fit its document indicates a broken engine, not a
/// runtime condition. Inbound events are screened with
/// [`event_applies`] first.
pub fn apply_change(lines: &mut Vec<String>, change: &Change) {
    let start = change.line_index;
    let end = start + change.old_lines.len();
    assert!(
        end <= lines.len(),
        "change [{start}..{end}) out of bounds for document of {} lines",
        lines.len()
    );
    lines.splice(start..end, change.new_lines.iter().cloned());
}

/// Apply every change of every event, in order.
#[must_use]
pub fn apply_events(base: &[String], events: &[EditEvent]) -> Vec<String> {
    let mut lines = base.to_vec();
    for event in events {
        for change in &event.changes {
            apply_change(&mut lines, change);
        }
    }
    lines
}

/// Check that `event` matches the document it claims to edit: every
/// change must find its `old_lines` verbatim at its `line_index`
/// (applying as it goes). A mismatch is a rejection, never a panic.
#[must_use]
pub fn event_applies(current_lines: &[String], event: &EditEvent) -> bool {
    if !event.is_well_formed() {
        return false;
    }
    let mut lines = current_lines.to_vec();
    for change in &event.changes {
        let start = change.line_index;
        let end = start + change.old_lines.len();
        if start > lines.len() || end > lines.len() {
            warn!(start, end, lines = lines.len(), "change out of bounds");
            return false;
        }
        if lines[start..end] != change.old_lines[..] {
            warn!(start, "change old lines do not match document");
            return false;
        }
        lines.splice(start..end, change.new_lines.iter().cloned());
    }
    true
}

/// [`event_applies`] over a whole candidate sequence.
#[must_use]
pub fn events_apply(current_lines: &[String], events: &[EditEvent]) -> bool {
    let mut lines = current_lines.to_vec();
    for event in events {
        if !event_applies(&lines, event) {
            return false;
        }
        lines = apply_events(&lines, std::slice::from_ref(event));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Cursor, EditReason};
    use pretty_assertions::assert_eq;

    fn plain_event(changes: Vec<Change>) -> EditEvent {
        EditEvent {
            index: 0,
            changes,
            start_cursors: vec![Cursor::caret(0, 0)],
            new_cursors: vec![Cursor::caret(0, 0)],
            timestamp: 0.0,
            undo_state: None,
            session_id: None,
            reason: EditReason::unknown(),
            undoing: None,
        }
    }

    #[test]
    fn empty_document_is_one_empty_line() {
        let state = DocumentState::default();
        assert_eq!(state.base_lines, vec![String::new()]);
        assert_eq!(state.current_text(), "");
        assert_eq!(state.top_index(), 0);
    }

    #[test]
    fn replay_reconstructs_text() {
        let mut state = DocumentState::from_text("a\nb\nc");
        state.append(plain_event(vec![Change {
            line_index: 0,
            old_lines: vec!["a".into()],
            new_lines: vec!["x".into()],
        }]));
        state.append(plain_event(vec![Change {
            line_index: 2,
            old_lines: vec!["c".into()],
            new_lines: vec!["c".into(), "d".into()],
        }]));

        assert_eq!(state.current_text(), "x\nb\nc\nd");
        assert_eq!(state.top_index(), 2);
        assert_eq!(state.events[0].index, 0);
        assert_eq!(state.events[1].index, 1);
    }

    #[test]
    fn collapse_folds_everything() {
        let mut state = DocumentState::from_text("a\nb");
        state.append(plain_event(vec![Change {
            line_index: 1,
            old_lines: vec!["b".into()],
            new_lines: vec!["z".into()],
        }]));

        let collapsed = state.collapse_to_topmost();
        assert_eq!(collapsed.base_lines, vec!["a".to_string(), "z".to_string()]);
        assert!(collapsed.events.is_empty());
        assert_eq!(collapsed.top_index(), 1);
        assert_eq!(collapsed.current_text(), state.current_text());
    }

    #[test]
    fn insertion_and_deletion_via_splice() {
        let mut lines = vec!["a".to_string(), "b".to_string()];
        // Pure insertion: no old lines.
        apply_change(
            &mut lines,
            &Change {
                line_index: 1,
                old_lines: vec![],
                new_lines: vec!["mid".into()],
            },
        );
        assert_eq!(lines, vec!["a", "mid", "b"]);

        // Pure deletion: no new lines.
        apply_change(
            &mut lines,
            &Change {
                line_index: 0,
                old_lines: vec!["a".into()],
                new_lines: vec![],
            },
        );
        assert_eq!(lines, vec!["mid", "b"]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_range_local_change_is_fatal() {
        let mut lines = vec!["a".to_string()];
        apply_change(
            &mut lines,
            &Change {
                line_index: 5,
                old_lines: vec![],
                new_lines: vec!["x".into()],
            },
        );
    }

    #[test]
    fn inbound_validation_rejects_instead_of_panicking() {
        let lines = vec!["a".to_string(), "b".to_string()];

        let stale = plain_event(vec![Change {
            line_index: 0,
            old_lines: vec!["not-a".into()],
            new_lines: vec!["x".into()],
        }]);
        assert!(!event_applies(&lines, &stale));

        let oob = plain_event(vec![Change {
            line_index: 9,
            old_lines: vec![],
            new_lines: vec!["x".into()],
        }]);
        assert!(!event_applies(&lines, &oob));

        let good = plain_event(vec![Change {
            line_index: 0,
            old_lines: vec!["a".into()],
            new_lines: vec!["x".into()],
        }]);
        assert!(event_applies(&lines, &good));
    }

    #[test]
    fn sequential_validation_applies_as_it_goes() {
        let lines = vec!["a".to_string()];
        let first = plain_event(vec![Change {
            line_index: 0,
            old_lines: vec!["a".into()],
            new_lines: vec!["b".into()],
        }]);
        // Valid only after `first` has been applied.
        let second = plain_event(vec![Change {
            line_index: 0,
            old_lines: vec!["b".into()],
            new_lines: vec!["c".into()],
        }]);

        assert!(events_apply(&lines, &[first.clone(), second.clone()]));
        assert!(!events_apply(&lines, &[second, first]));
    }
}
