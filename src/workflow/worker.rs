use crate::telemetry::{create_attempt_span, generate_correlation_id};
use crate::workflow::engine::{jitter, panic_message, AttemptEngine, AttemptScope};
use crate::workflow::types::{ErrorKind, Stage, StageResult};
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use tracing::{debug, Instrument};

/// Per-worker totals, returned when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub attempts: u64,
    pub successes: u64,
}

/// One pool member: claims slots from the ledger until told to stop
pub struct Worker {
    id: usize,
    engine: AttemptEngine,
}

impl Worker {
    pub fn new(id: usize, engine: AttemptEngine) -> Self {
        Self { id, engine }
    }

    pub async fn run(self) -> WorkerStats {
        let shared = self.engine.shared().clone();
        let ledger = &shared.ledger;
        let mut stats = WorkerStats::default();

        tokio::time::sleep(jitter(shared.policy.startup_jitter)).await;

        while !ledger.should_stop() {
            let claim = ledger.claim_attempt_slot();
            if !claim.allowed {
                debug!(worker = self.id, reason = ?claim.reason, "no slot granted, worker exiting");
                break;
            }

            let slot_no = claim.slot_no;
            stats.attempts += 1;
            if slot_no <= 3 || slot_no % 20 == 0 {
                shared.log.info(
                    "attempt",
                    &format!("[W{}] global attempt progress: {slot_no}/{}", self.id, ledger.max_attempts()),
                    json!({ "worker_id": self.id, "attempt_no": slot_no }),
                );
            }

            let scope = AttemptScope {
                worker_id: self.id,
                slot_no,
                correlation_id: generate_correlation_id(),
            };
            let span = create_attempt_span(self.id, slot_no, &scope.correlation_id);

            let succeeded = match AssertUnwindSafe(self.engine.run_attempt(&scope).instrument(span))
                .catch_unwind()
                .await
            {
                Ok(report) => report.succeeded(),
                Err(panic) => {
                    let result = StageResult::failure(
                        Stage::Worker,
                        ErrorKind::Unknown,
                        true,
                        format!("worker exception: {}", panic_message(&*panic)),
                    );
                    self.engine.fail(&scope, None, &result);
                    false
                }
            };

            if succeeded {
                stats.successes += 1;
            } else if !ledger.should_stop() {
                tokio::time::sleep(shared.policy.attempt_backoff).await;
            }
        }

        stats
    }
}
