//! Event-log compression.
//!
//! Three passes keep the log from building up, in order:
//!
//! 1. **Unreachable excision**: a run of undo/redo events immediately
//!    followed by a plain edit leaves every event it undid unreachable —
//!    the span is cut out whole (the document state on both sides is
//!    identical by construction, and this is asserted).
//! 2. **Neighbor collapsing**: below the lowest event still referenced by
//!    the undo stream, adjacent events in the same undo stream collapse
//!    into one; past the word budget, same-line neighbors collapse too.
//! 3. **Prefix folding**: whatever remains below the modifiable bound is
//!    replayed into the base lines and dropped from the log.
//!
//! # Invariant
//!
//! Compression never changes the document: after every pass the
//! compressed state replays to byte-identical text, checked on exit. A
//! violation panics — it means the engine is broken, not that input was
//! bad. Event indices are stable: surviving events keep their global
//! indices (gaps are fine), so sessions and undo references stay valid.

use ahash::AHashMap;
use tracing::{debug, info, warn};

use crate::event::{Change, EditEvent, UndoKind};
use crate::state::{apply_events, DocumentState};
use crate::undo::same_undo_stream;

/// Budgets for the collapsing pass.
#[derive(Debug, Clone)]
pub struct CompressLimits {
    /// Single-word undo steps preserved before same-line collapsing kicks
    /// in.
    pub max_word_undos: usize,
    /// Hard cap on preserved line-level undo steps.
    pub max_line_undos: usize,
}

impl Default for CompressLimits {
    fn default() -> Self {
        Self {
            max_word_undos: 1000,
            max_line_undos: 10_000,
        }
    }
}

/// Merge two events into one (the later event's identity survives).
#[must_use]
pub fn collapse_events(e1: &EditEvent, e2: &EditEvent) -> EditEvent {
    let mut changes = e1.changes.clone();
    changes.extend(e2.changes.iter().cloned());

    EditEvent {
        index: e2.index,
        changes: collapse_changes(&changes),
        start_cursors: e1.start_cursors.clone(),
        new_cursors: e2.new_cursors.clone(),
        timestamp: e2.timestamp,
        undo_state: e2.undo_state,
        session_id: e2.session_id.clone(),
        reason: e2.reason.clone(),
        undoing: e2.undoing,
    }
}

/// Collapse a change list pairwise: overlapping or adjacent neighbors
/// merge; disjoint out-of-order neighbors swap (with index adjustment) so
/// repeated passes bubble mergeable changes together.
#[must_use]
pub fn collapse_changes(changes: &[Change]) -> Vec<Change> {
    let mut slots: Vec<Option<Change>> = changes.iter().cloned().map(Some).collect();

    let mut i = 0;
    while i + 1 < slots.len() {
        let a = slots[i].clone().expect("left slot populated");
        let b = slots[i + 1].clone().expect("right slot populated");

        // Range `a` covers on the intermediate document vs the range `b`
        // consumes from it.
        let l0 = a.line_index;
        let l1 = a.line_index + a.new_lines.len();
        let r0 = b.line_index;
        let r1 = b.line_index + b.old_lines.len();

        if l0 <= r1 && r0 <= l1 {
            let mut old_lines = a.old_lines.clone();
            if r0 < l0 {
                let mut prefix: Vec<String> = b.old_lines[..l0 - r0].to_vec();
                prefix.extend(old_lines);
                old_lines = prefix;
            }
            if r1 > l1 {
                old_lines.extend(b.old_lines[b.old_lines.len() - (r1 - l1)..].iter().cloned());
            }

            let mut new_lines = b.new_lines.clone();
            if l0 < r0 {
                let mut prefix: Vec<String> = a.new_lines[..r0 - l0].to_vec();
                prefix.extend(new_lines);
                new_lines = prefix;
            }
            if l1 > r1 {
                new_lines.extend(a.new_lines[a.new_lines.len() - (l1 - r1)..].iter().cloned());
            }

            slots[i] = None;
            slots[i + 1] = Some(Change {
                line_index: a.line_index.min(b.line_index),
                old_lines,
                new_lines,
            });
        } else if b.line_index < a.line_index {
            // Disjoint and out of order: swap, shifting `a` by `b`'s line
            // delta. Repeated passes act like a bubble sort.
            let delta = b.new_lines.len() as i64 - b.old_lines.len() as i64;
            let mut a_shifted = a;
            a_shifted.line_index = (a_shifted.line_index as i64 + delta) as usize;
            slots[i] = Some(b);
            slots[i + 1] = Some(a_shifted);
        }

        i += 1;
    }

    slots.into_iter().flatten().collect()
}

/// True when both events touch exactly the same single lines.
#[must_use]
pub fn events_on_same_line(e1: &EditEvent, e2: &EditEvent) -> bool {
    let mut lines1 = Vec::new();
    for c in &e1.changes {
        if c.old_lines.len() != 1 || c.new_lines.len() != 1 {
            return false;
        }
        lines1.push(c.line_index);
    }
    let mut lines2 = Vec::new();
    for c in &e2.changes {
        if c.old_lines.len() != 1 || c.new_lines.len() != 1 {
            return false;
        }
        lines2.push(c.line_index);
    }
    lines1.sort_unstable();
    lines1.dedup();
    lines2.sort_unstable();
    lines2.dedup();
    lines1 == lines2
}

/// The lowest log position still referenced by the undo stream.
///
/// `events[..ix]` contains no undo/redo events and nothing in
/// `events[ix..]` reaches below `ix`, so everything below is free to
/// collapse or fold.
#[must_use]
pub fn lowest_position_referenced_by_undos(events: &[EditEvent]) -> usize {
    let mut event_stack: Vec<usize> = Vec::new();
    let mut redo_stack: Vec<usize> = Vec::new();
    let mut min_reffed = events.len();

    for (ix, event) in events.iter().enumerate() {
        match event.undo_state {
            None => {
                event_stack.push(ix);
                redo_stack.clear();
            }
            Some(UndoKind::Undo) => {
                if let Some(target) = event_stack.pop() {
                    redo_stack.push(target);
                    min_reffed = min_reffed.min(target);
                }
            }
            Some(UndoKind::Redo) => {
                if let Some(target) = redo_stack.pop() {
                    event_stack.push(target);
                }
            }
        }
    }

    min_reffed
}

/// Power-of-ten replay cache: the state after `events[..p]`.
struct EventStateCache<'a> {
    lines: &'a [String],
    events: &'a [EditEvent],
    cache: AHashMap<usize, Vec<String>>,
}

impl<'a> EventStateCache<'a> {
    fn new(lines: &'a [String], events: &'a [EditEvent]) -> Self {
        Self {
            lines,
            events,
            cache: AHashMap::new(),
        }
    }

    fn lines_at(&mut self, p: usize) -> Vec<String> {
        debug_assert!(p <= self.events.len());
        if let Some(hit) = self.cache.get(&p) {
            return hit.clone();
        }

        let mut power = 10;
        while power <= p {
            if p % power != 0 {
                let anchor = p - (p % power);
                let prior = self.lines_at(anchor);
                let lines = apply_events(&prior, &self.events[anchor..p]);
                self.cache.insert(p, lines.clone());
                return lines;
            }
            power *= 10;
        }

        let lines = apply_events(self.lines, &self.events[..p]);
        self.cache.insert(p, lines.clone());
        lines
    }
}

/// Cut out undo/redo spans made unreachable by a later plain edit.
///
/// Surviving events keep their indices; reversal references into an
/// excised span are remapped to the plain event the excised operation
/// resolved to.
fn compress_unreachable(
    lines: &[String],
    events: &[EditEvent],
    max_timestamp: Option<f64>,
) -> Vec<EditEvent> {
    if events.is_empty() {
        return Vec::new();
    }

    let pos_of_index: AHashMap<u64, usize> = events
        .iter()
        .enumerate()
        .map(|(p, e)| (e.index, p))
        .collect();

    // transitions[p]: (state before, state after) where a state is the
    // position of the plain event that produced it (None = base state).
    let mut transitions: Vec<(Option<usize>, Option<usize>)> = Vec::with_capacity(events.len());
    let mut cur_state: Option<usize> = None;
    for event in events {
        match event.undo_state {
            None => {
                transitions.push((cur_state, Some(transitions.len())));
                cur_state = Some(transitions.len() - 1);
            }
            Some(_) => {
                let Some(target) = event
                    .undoing
                    .and_then(|g| pos_of_index.get(&g))
                    .copied()
                else {
                    warn!("reversal target missing from log; skipping unreachable excision");
                    return events.to_vec();
                };
                let reverse_of = transitions[target];
                transitions.push((reverse_of.1, reverse_of.0));
                cur_state = reverse_of.0;
            }
        }
    }

    let mut max_ts_triggered = false;
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for p in 1..events.len() {
        let event = &events[p];
        if max_ts_triggered || max_timestamp.is_some_and(|m| event.timestamp > m) {
            max_ts_triggered = true;
        } else if event.undo_state.is_none() && events[p - 1].undo_state.is_some() {
            // The state we are in at p-1 identifies where the unreachable
            // span started.
            let base_ix: i64 = transitions[p - 1].1.map_or(-1, |v| v as i64);
            while ranges
                .last()
                .is_some_and(|&(start, _)| base_ix + 1 <= start as i64)
            {
                ranges.pop();
            }
            ranges.push(((base_ix + 1) as usize, p));
        }
    }

    if ranges.is_empty() {
        return events.to_vec();
    }

    let mut cache = EventStateCache::new(lines, events);
    let mut removed = vec![false; events.len()];
    for &(start, stop) in &ranges {
        assert_eq!(
            cache.lines_at(start),
            cache.lines_at(stop),
            "unreachable span [{start}..{stop}) does not preserve state"
        );
        for slot in &mut removed[start..stop] {
            *slot = true;
        }
    }

    let mut out = Vec::with_capacity(events.len());
    for (p, event) in events.iter().enumerate() {
        if removed[p] {
            continue;
        }
        let mut event = event.clone();
        if event.undo_state.is_some() {
            if let Some(target) = event.undoing.and_then(|g| pos_of_index.get(&g)).copied() {
                if removed[target] {
                    // Point at the plain event the excised op resolved to.
                    event.undoing = transitions[target].1.map(|q| events[q].index);
                }
            }
        }
        out.push(event);
    }

    debug!(
        before = events.len(),
        after = out.len(),
        "excised unreachable undo spans"
    );
    out
}

/// Compress a document's event log.
///
/// `max_timestamp` bounds what may be modified: events newer than it are
/// left untouched (clients may still be referencing them). `None` means
/// the whole log is fair game.
///
/// # Panics
///
/// Panics if compression would change the replayed document text — that
/// invariant is checked after every pass.
#[must_use]
pub fn compress_state(
    state: &DocumentState,
    max_timestamp: Option<f64>,
    limits: &CompressLimits,
) -> DocumentState {
    if state.events.is_empty() {
        return state.clone();
    }
    let original_text = state.current_text();

    let mut lines = state.base_lines.clone();
    let events = compress_unreachable(&lines, &state.events, max_timestamp);

    let max_modifiable = lowest_position_referenced_by_undos(&events);
    let mut i = match max_timestamp {
        Some(max_ts) => {
            let mut i = 0;
            while i + 1 < max_modifiable {
                if events[i].timestamp >= max_ts {
                    break;
                }
                i += 1;
            }
            i
        }
        None => max_modifiable.saturating_sub(1),
    };

    let mut slots: Vec<Option<EditEvent>> = events.into_iter().map(Some).collect();
    let mut events_kept = 0usize;
    while i > 0 && events_kept < limits.max_line_undos {
        let a = slots[i - 1].take().expect("left event populated");
        let b = slots[i].take().expect("right event populated");

        if same_undo_stream(&a, &b) {
            slots[i - 1] = Some(collapse_events(&a, &b));
        } else if events_on_same_line(&a, &b) && events_kept > limits.max_word_undos {
            slots[i - 1] = Some(collapse_events(&a, &b));
        } else {
            slots[i - 1] = Some(a);
            slots[i] = Some(b);
            events_kept += 1;
        }

        i -= 1;
    }

    // Fold the untouched prefix into the base lines.
    if i > 0 {
        let prefix: Vec<EditEvent> = slots[..i]
            .iter()
            .map(|s| s.clone().expect("prefix slot populated"))
            .collect();
        info!(folded = prefix.len(), "folding event prefix into base lines");
        lines = apply_events(&lines, &prefix);
        slots.drain(..i);
    }

    let events: Vec<EditEvent> = slots.into_iter().flatten().collect();
    if events.len() != state.events.len() {
        info!(
            before = state.events.len(),
            after = events.len(),
            "compressed event log"
        );
    }

    let compressed = DocumentState {
        base_lines: lines,
        events,
        next_index: state.next_index,
    };
    assert_eq!(
        original_text,
        compressed.current_text(),
        "compression changed the document"
    );
    compressed
}
