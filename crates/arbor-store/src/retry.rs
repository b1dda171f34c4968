//! Bounded retry for optimistic-concurrency conflicts.
//!
//! A message handler runs inside a transaction; when `commit()` raises a
//! conflict the *whole handler* is re-run, up to an attempt cap and a
//! wall-clock budget. An exhausted handler is abandoned and logged —
//! never surfaced to the remote caller. The attempted change simply does
//! not take effect.

use web_time::{Duration, Instant};

use tracing::warn;

use crate::contract::{DataStore, StoreTxn, WriteRecord};

/// Attempt/budget limits for conflicted handlers.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Wall-clock budget across all attempts.
    pub wall_clock_budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            wall_clock_budget: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, wall_clock_budget: Duration) -> Self {
        Self {
            max_attempts,
            wall_clock_budget,
        }
    }
}

/// What happened to a retried handler.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// An attempt committed. Carries the handler's result and the keys the
    /// winning transaction wrote.
    Committed { result: T, written: WriteRecord },
    /// Every attempt conflicted (or the budget ran out); the handler's
    /// effects were discarded.
    Abandoned,
}

impl<T> RetryOutcome<T> {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Run `attempt` in a fresh transaction until one commits or the policy is
/// exhausted.
///
/// Store writes of a conflicted attempt are discarded by the store
/// itself; `on_conflict` receives the attempt's result so the caller can
/// undo any out-of-store effects (the session layer replays its cell
/// rollback log there) before the next attempt runs.
pub fn run_with_retry<T>(
    store: &dyn DataStore,
    policy: &RetryPolicy,
    label: &str,
    mut attempt: impl FnMut(&mut dyn StoreTxn) -> T,
    mut on_conflict: impl FnMut(T),
) -> RetryOutcome<T> {
    let started = Instant::now();

    for attempt_ix in 1..=policy.max_attempts {
        if attempt_ix > 1 && started.elapsed() > policy.wall_clock_budget {
            warn!(
                handler = label,
                attempts = attempt_ix - 1,
                "abandoning handler: wall-clock budget exhausted"
            );
            return RetryOutcome::Abandoned;
        }

        let mut txn = store.begin_transaction();
        let result = attempt(txn.as_mut());

        match txn.commit() {
            Ok(written) => return RetryOutcome::Committed { result, written },
            Err(conflict) => {
                warn!(
                    handler = label,
                    attempt = attempt_ix,
                    %conflict,
                    "handler transaction conflicted; retrying"
                );
                on_conflict(result);
            }
        }
    }

    warn!(
        handler = label,
        attempts = policy.max_attempts,
        "abandoning handler: attempt cap exhausted"
    );
    RetryOutcome::Abandoned
}
