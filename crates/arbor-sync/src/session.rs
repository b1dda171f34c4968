//! Per-session synchronization state: the watermark-window conflict
//! policy.
//!
//! This is conservative single-window optimistic concurrency, not a
//! multi-writer merge. Each session tracks the top-event index it last
//! sent to its client and, while its own edits are in flight, a
//! contiguous `[low, high]` window of claimed indices still considered
//! valid despite intervening events. An inbound edit claiming the
//! authoritative index (or one inside the window) is accepted; anything
//! else means the session's view has diverged and it must fully
//! resynchronize. Two genuinely simultaneous sessions do not get merged —
//! the later one resyncs.

use tracing::{debug, warn};

/// Sync bookkeeping for one editing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSync {
    session_id: String,
    /// Top-event index the client is known to hold.
    sent_event_index: u64,
    /// `[low, high]` claimed-index watermarks while an own edit is in
    /// flight. `None` when the session is fully synced.
    window: Option<(u64, u64)>,
}

impl SessionSync {
    #[must_use]
    pub fn new(session_id: impl Into<String>, initial_top: u64) -> Self {
        Self {
            session_id: session_id.into(),
            sent_event_index: initial_top,
            window: None,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn sent_event_index(&self) -> u64 {
        self.sent_event_index
    }

    /// The current watermark window, if an edit is in flight.
    #[must_use]
    pub fn window(&self) -> Option<(u64, u64)> {
        self.window
    }

    /// Is an edit claiming `claimed` acceptable against authoritative
    /// `top`?
    #[must_use]
    pub fn accepts(&self, claimed: u64, top: u64) -> bool {
        if claimed == top {
            return true;
        }
        self.window
            .is_some_and(|(low, high)| low <= claimed && claimed <= high)
    }

    /// Record an accepted edit: the window opens (or widens) to cover the
    /// session's subsequent in-flight claims up to the new top.
    pub fn note_accepted(&mut self, claimed: u64, new_top: u64) {
        let low = match self.window {
            Some((low, _)) => low.min(claimed),
            None => claimed,
        };
        self.window = Some((low, new_top));
        debug!(
            session = %self.session_id,
            low,
            high = new_top,
            "watermark window extended"
        );
    }

    /// Record that the client has been sent everything up to `top`.
    ///
    /// The window stays open: edits the client put on the wire before our
    /// relay reached it are still in flight and still acceptable.
    pub fn mark_sent(&mut self, top: u64) {
        self.sent_event_index = top;
    }

    /// The client demonstrably caught up (it claimed the authoritative
    /// top); its in-flight chain is settled.
    pub fn close_window(&mut self) {
        self.window = None;
    }

    /// The session diverged and was told to fully resynchronize.
    pub fn note_resync(&mut self, top: u64) {
        warn!(session = %self.session_id, top, "session resynchronized");
        self.sent_event_index = top;
        self.window = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_top_is_always_accepted() {
        let sync = SessionSync::new("s", 5);
        assert!(sync.accepts(5, 5));
        assert!(!sync.accepts(4, 5));
        assert!(!sync.accepts(6, 5));
    }

    #[test]
    fn window_covers_in_flight_chain() {
        let mut sync = SessionSync::new("s", 3);

        // Edit claiming top 3 accepted; top advances to 4.
        assert!(sync.accepts(3, 3));
        sync.note_accepted(3, 4);
        assert_eq!(sync.window(), Some((3, 4)));

        // Another session's event lands: top is now 5. Our client still
        // claims 4 (it only counts its own accepted edit).
        assert!(sync.accepts(4, 5));
        sync.note_accepted(4, 6);
        assert_eq!(sync.window(), Some((3, 6)));

        // A claim outside the window is refused.
        assert!(!sync.accepts(1, 6));
        assert!(!sync.accepts(7, 6));
    }

    #[test]
    fn mark_sent_keeps_the_window_open() {
        let mut sync = SessionSync::new("s", 0);
        sync.note_accepted(0, 1);

        // We relayed the accepted event, but a keystroke the client sent
        // before our relay is still in flight and still acceptable.
        sync.mark_sent(1);
        assert_eq!(sync.sent_event_index(), 1);
        assert!(sync.accepts(0, 1));
    }

    #[test]
    fn close_window_restores_exact_matching() {
        let mut sync = SessionSync::new("s", 0);
        sync.note_accepted(0, 1);
        assert!(sync.window().is_some());

        sync.close_window();
        assert!(sync.window().is_none());
        assert!(!sync.accepts(0, 1));
        assert!(sync.accepts(1, 1));
    }

    #[test]
    fn resync_discards_the_window() {
        let mut sync = SessionSync::new("s", 0);
        sync.note_accepted(0, 1);
        sync.note_resync(9);
        assert_eq!(sync.sent_event_index(), 9);
        assert!(sync.window().is_none());
    }
}
