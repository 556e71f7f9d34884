// Declared retry budgets for the attempt state machine

use std::time::Duration;

/// `(max_rounds, polls_per_round, poll_interval)` budget for a polling stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_rounds: u32,
    pub polls_per_round: u32,
    pub poll_interval: Duration,
}

impl PollPolicy {
    pub fn new(max_rounds: u32, polls_per_round: u32, poll_interval: Duration) -> Self {
        Self {
            max_rounds: max_rounds.max(1),
            polls_per_round: polls_per_round.max(1),
            poll_interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPolicy {
    /// Request-then-poll rounds for the one-time code
    pub credential: PollPolicy,
    /// Submission tries (`max_rounds`) and solver polls per try
    pub challenge: PollPolicy,
    /// ObtainCredential -> VerifyCredential cycles per resource
    pub max_code_cycles: u32,
    /// Pause after a non-success submission response
    pub submit_retry_delay: Duration,
    /// Pause after an abandoned attempt before claiming the next slot
    pub attempt_backoff: Duration,
    /// Upper bound of the random delay before a worker's first claim
    pub startup_jitter: Duration,
    /// Global submission rate across all workers, `None` for unlimited
    pub submit_per_second: Option<u32>,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            credential: PollPolicy::new(3, 180, Duration::from_secs(1)),
            challenge: PollPolicy::new(3, 35, Duration::from_secs(2)),
            max_code_cycles: 3,
            submit_retry_delay: Duration::from_secs(3),
            attempt_backoff: Duration::from_secs(5),
            startup_jitter: Duration::from_secs(5),
            submit_per_second: None,
        }
    }
}

impl WorkflowPolicy {
    /// Every wait set to zero; budgets unchanged
    pub fn immediate() -> Self {
        Self {
            credential: PollPolicy::new(3, 180, Duration::ZERO),
            challenge: PollPolicy::new(3, 35, Duration::ZERO),
            submit_retry_delay: Duration::ZERO,
            attempt_backoff: Duration::ZERO,
            startup_jitter: Duration::ZERO,
            ..Self::default()
        }
    }
}
