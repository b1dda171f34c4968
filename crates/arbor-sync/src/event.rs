//! The document event model.
//!
//! A document starts as a single empty line. A [`Change`] replaces a run
//! of lines; an [`EditEvent`] bundles an ordered list of changes with the
//! cursor sets before and after, a timestamp, an undo marker, the
//! originating session, and the reason the edit happened. Events are
//! identified by a monotonically assigned global index; reversing events
//! reference the index of the event they reverse.

use serde::{Deserialize, Serialize};

/// One contiguous line-range replacement.
///
/// Applying a change replaces `old_lines` at `line_index` with
/// `new_lines`. Lines never contain `'\n'`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "lineIndex")]
    pub line_index: usize,
    #[serde(rename = "oldLines")]
    pub old_lines: Vec<String>,
    #[serde(rename = "newLines")]
    pub new_lines: Vec<String>,
}

impl Change {
    /// Structural validity: no embedded newlines.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.old_lines
            .iter()
            .chain(self.new_lines.iter())
            .all(|line| !line.contains('\n'))
    }
}

/// A cursor: active position, selection tail, and the column the cursor
/// would like to be on if its line were long enough. All zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub pos: (usize, usize),
    pub tail: (usize, usize),
    #[serde(rename = "desiredCol")]
    pub desired_col: usize,
}

impl Cursor {
    #[must_use]
    pub fn caret(line: usize, col: usize) -> Self {
        Self {
            pos: (line, col),
            tail: (line, col),
            desired_col: col,
        }
    }
}

/// Why an edit happened. Keystroke reasons drive undo coalescing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EditReason {
    Keystroke { keystroke: String },
    Event { event: String },
    /// Free-form labels: "unknown", "server-push", ...
    Label(String),
}

impl EditReason {
    #[must_use]
    pub fn keystroke(key: impl Into<String>) -> Self {
        Self::Keystroke {
            keystroke: key.into(),
        }
    }

    #[must_use]
    pub fn server_push() -> Self {
        Self::Label("server-push".to_string())
    }

    #[must_use]
    pub fn unknown() -> Self {
        Self::Label("unknown".to_string())
    }

    /// The coalescing category of a keystroke reason.
    #[must_use]
    pub fn keystroke_category(&self) -> Option<KeystrokeCategory> {
        match self {
            Self::Keystroke { keystroke } => Some(match keystroke.as_str() {
                " " => KeystrokeCategory::Space,
                "Enter" => KeystrokeCategory::Newline,
                _ => KeystrokeCategory::Char,
            }),
            _ => None,
        }
    }
}

/// Keystroke classes for undo grouping: a run of plain characters undoes
/// together, but a space or newline starts a new group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystrokeCategory {
    Space,
    Newline,
    Char,
}

/// Undo marker on a reversing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndoKind {
    Undo,
    Redo,
}

/// One recorded text mutation plus its reversal data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEvent {
    /// Global sequence number, assigned when the server appends the
    /// event. Zero until then (client-built events carry no authority).
    #[serde(default)]
    pub index: u64,
    pub changes: Vec<Change>,
    #[serde(rename = "startCursors")]
    pub start_cursors: Vec<Cursor>,
    #[serde(rename = "newCursors")]
    pub new_cursors: Vec<Cursor>,
    pub timestamp: f64,
    /// `None` for a plain edit; `Undo`/`Redo` on reversing events.
    #[serde(rename = "undoState")]
    pub undo_state: Option<UndoKind>,
    /// Session that produced the event, when known.
    #[serde(rename = "editSessionId")]
    pub session_id: Option<String>,
    pub reason: EditReason,
    /// Global index of the event this one reverses.
    pub undoing: Option<u64>,
}

impl EditEvent {
    /// Structural validity of every change.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.changes.iter().all(Change::is_well_formed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reason_wire_shapes() {
        assert_eq!(
            serde_json::to_value(EditReason::keystroke("a")).unwrap(),
            json!({"keystroke": "a"})
        );
        assert_eq!(
            serde_json::to_value(EditReason::server_push()).unwrap(),
            json!("server-push")
        );
        let parsed: EditReason = serde_json::from_value(json!({"keystroke": "Enter"})).unwrap();
        assert_eq!(parsed.keystroke_category(), Some(KeystrokeCategory::Newline));
        let parsed: EditReason = serde_json::from_value(json!("unknown")).unwrap();
        assert_eq!(parsed, EditReason::unknown());
        assert_eq!(parsed.keystroke_category(), None);
    }

    #[test]
    fn keystroke_categories() {
        assert_eq!(
            EditReason::keystroke(" ").keystroke_category(),
            Some(KeystrokeCategory::Space)
        );
        assert_eq!(
            EditReason::keystroke("Enter").keystroke_category(),
            Some(KeystrokeCategory::Newline)
        );
        assert_eq!(
            EditReason::keystroke("x").keystroke_category(),
            Some(KeystrokeCategory::Char)
        );
    }

    #[test]
    fn undo_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_value(UndoKind::Undo).unwrap(), json!("undo"));
        assert_eq!(serde_json::to_value(UndoKind::Redo).unwrap(), json!("redo"));
    }

    #[test]
    fn change_well_formedness() {
        let good = Change {
            line_index: 0,
            old_lines: vec!["a".into()],
            new_lines: vec!["b".into()],
        };
        assert!(good.is_well_formed());

        let bad = Change {
            line_index: 0,
            old_lines: vec![],
            new_lines: vec!["a\nb".into()],
        };
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = EditEvent {
            index: 4,
            changes: vec![Change {
                line_index: 1,
                old_lines: vec!["old".into()],
                new_lines: vec!["new".into()],
            }],
            start_cursors: vec![Cursor::caret(1, 0)],
            new_cursors: vec![Cursor::caret(1, 3)],
            timestamp: 12.5,
            undo_state: Some(UndoKind::Undo),
            session_id: Some("s1".into()),
            reason: EditReason::keystroke("z"),
            undoing: Some(2),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["undoState"], json!("undo"));
        assert_eq!(value["changes"][0]["lineIndex"], json!(1));
        let back: EditEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
