// Attempt Ledger - single source of truth for "may another attempt start"
// and "has the run finished". All counter mutations happen under one lock;
// the stop flag is mirrored into an atomic so workers can poll it lock-free.

use crate::workflow::types::{AttemptClaim, StopReason};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct LedgerState {
    attempt_count: u64,
    success_count: u64,
    stop_reason: Option<StopReason>,
}

/// Read-only copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub attempt_count: u64,
    pub success_count: u64,
    pub target_successes: u64,
    pub max_attempts: u64,
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug)]
pub struct AttemptLedger {
    target_successes: u64,
    max_attempts: u64,
    state: Mutex<LedgerState>,
    stopped: AtomicBool,
}

impl AttemptLedger {
    pub fn new(target_successes: u64, max_attempts: u64) -> Self {
        Self {
            target_successes: target_successes.max(1),
            max_attempts: max_attempts.max(1),
            state: Mutex::new(LedgerState::default()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn target_successes(&self) -> u64 {
        self.target_successes
    }

    pub fn max_attempts(&self) -> u64 {
        self.max_attempts
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // Counters stay consistent even if a holder panicked: every
        // critical section is a handful of integer updates.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// First reason wins. Caller holds the lock.
    fn stop_with(&self, state: &mut LedgerState, reason: StopReason) {
        if state.stop_reason.is_none() {
            state.stop_reason = Some(reason);
            debug!(stop_reason = %reason, "ledger stop flag set");
        }
        self.stopped.store(true, Ordering::Release);
    }

    pub fn claim_attempt_slot(&self) -> AttemptClaim {
        let mut state = self.lock();

        if self.stopped.load(Ordering::Acquire) {
            return AttemptClaim {
                allowed: false,
                slot_no: state.attempt_count,
                reason: state.stop_reason,
            };
        }

        if state.attempt_count >= self.max_attempts {
            self.stop_with(&mut state, StopReason::AttemptLimit);
            return AttemptClaim {
                allowed: false,
                slot_no: state.attempt_count,
                reason: state.stop_reason,
            };
        }

        state.attempt_count += 1;
        AttemptClaim {
            allowed: true,
            slot_no: state.attempt_count,
            reason: None,
        }
    }

    /// Counts one committed success and returns the new total.
    ///
    /// Successes that land after the stop flag are still counted; they
    /// reflect work that already happened. They never change the reason.
    pub fn mark_success(&self) -> u64 {
        let mut state = self.lock();
        state.success_count += 1;
        if state.success_count >= self.target_successes {
            self.stop_with(&mut state, StopReason::TargetReached);
        }
        state.success_count
    }

    /// External cancellation (e.g. Ctrl-C)
    pub fn request_stop(&self) {
        let mut state = self.lock();
        self.stop_with(&mut state, StopReason::ExternalStop);
    }

    pub fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.lock().stop_reason
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        LedgerSnapshot {
            attempt_count: state.attempt_count,
            success_count: state.success_count,
            target_successes: self.target_successes,
            max_attempts: self.max_attempts,
            stop_reason: state.stop_reason,
        }
    }
}
