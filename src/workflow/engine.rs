// Attempt engine - drives one claimed slot through the stage machine:
// acquire -> (obtain code -> verify -> challenge & submit)* -> post-success
// -> finalize, with resource cleanup on every exit path.

use crate::events::{compact_text, mask_resource, EventLevel, EventLog};
use crate::ledger::AttemptLedger;
use crate::observability::{FailureTally, OperationTimer};
use crate::output::SuccessSink;
use crate::workflow::policy::WorkflowPolicy;
use crate::workflow::traits::Collaborators;
use crate::workflow::types::*;
use futures::FutureExt;
use governor::DefaultDirectRateLimiter;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Run-scoped state every worker shares. Built once after bootstrap.
pub struct RunShared {
    pub context: Arc<RuntimeContext>,
    pub policy: WorkflowPolicy,
    pub ledger: Arc<AttemptLedger>,
    pub sink: Arc<SuccessSink>,
    pub log: Arc<EventLog>,
    pub tally: Arc<FailureTally>,
    pub keep_successful_resource: bool,
    pub throttle: Option<Arc<DefaultDirectRateLimiter>>,
    pub started_at: Instant,
}

/// Identifies one attempt in events
#[derive(Debug, Clone)]
pub struct AttemptScope {
    pub worker_id: usize,
    pub slot_no: u64,
    pub correlation_id: String,
}

enum SubmitOutcome {
    Accepted(SessionCredential),
    /// Remote side says the code is no longer valid; back to the code cycle
    CodeInvalid,
    Failed(StageResult),
}

pub struct AttemptEngine {
    collaborators: Collaborators,
    shared: Arc<RunShared>,
}

impl AttemptEngine {
    pub fn new(collaborators: Collaborators, shared: Arc<RunShared>) -> Self {
        Self { collaborators, shared }
    }

    pub fn shared(&self) -> &Arc<RunShared> {
        &self.shared
    }

    /// Runs the whole state machine for one slot. Never panics and never
    /// returns without releasing (or deliberately keeping) the resource.
    pub async fn run_attempt(&self, scope: &AttemptScope) -> AttemptReport {
        let resource = match AssertUnwindSafe(self.acquire_resource()).catch_unwind().await {
            Ok(Ok(resource)) => resource,
            Ok(Err(result)) => {
                self.fail(scope, None, &result);
                return abandoned(scope, result);
            }
            Err(panic) => {
                let result = panicked(Stage::AcquireResource, &*panic);
                self.fail(scope, None, &result);
                return abandoned(scope, result);
            }
        };

        let report = match AssertUnwindSafe(self.drive(scope, &resource)).catch_unwind().await {
            Ok(report) => report,
            Err(panic) => {
                let result = panicked(Stage::Worker, &*panic);
                self.fail(scope, Some(&resource), &result);
                abandoned(scope, result)
            }
        };

        self.cleanup(scope, &resource, report.succeeded()).await;
        report
    }

    async fn acquire_resource(&self) -> Result<ResourceId, StageResult> {
        let timer = OperationTimer::new(Stage::AcquireResource.as_str());
        match self.collaborators.resources.acquire().await {
            Ok(resource) if !resource.as_str().trim().is_empty() => Ok(resource),
            Ok(_) => Err(StageResult::failure(
                Stage::AcquireResource,
                ErrorKind::Dependency,
                true,
                "provider returned an empty resource id",
            )
            .with_latency(timer.finish())),
            Err(e) => Err(
                StageResult::failure(Stage::AcquireResource, ErrorKind::Dependency, true, e.to_string())
                    .with_latency(timer.finish()),
            ),
        }
    }

    async fn drive(&self, scope: &AttemptScope, resource: &ResourceId) -> AttemptReport {
        // codes rejected for this resource only
        let mut excluded: HashSet<String> = HashSet::new();
        let max_cycles = self.shared.policy.max_code_cycles;

        for cycle in 1..=max_cycles {
            if let Some(result) = self.halted(Stage::ObtainCredential) {
                self.note(scope, Some(resource), EventLevel::Info, &result);
                return abandoned(scope, result);
            }

            let code = match self.obtain_credential(scope, resource, &excluded).await {
                Ok(code) => code,
                Err(result) => return abandoned(scope, result),
            };

            if self.verify_credential(scope, resource, &code).await.is_err() {
                excluded.insert(code);
                continue;
            }

            match self.challenge_and_submit(scope, resource, &code).await {
                SubmitOutcome::Accepted(session) => return self.complete(scope, resource, session).await,
                SubmitOutcome::CodeInvalid => {
                    excluded.insert(code);
                    self.emit(
                        EventLevel::Warning,
                        Stage::ChallengeAndSubmit.as_str(),
                        &format!("[W{}] submission reported the code invalid, requesting a fresh one", scope.worker_id),
                        scope,
                        Some(resource),
                        json!({
                            "error_type": ErrorKind::WorkflowRejected,
                            "code_cycle": cycle,
                        }),
                    );
                }
                SubmitOutcome::Failed(result) => return abandoned(scope, result),
            }
        }

        let result = StageResult::failure(
            Stage::VerifyCredential,
            ErrorKind::WorkflowRejected,
            false,
            format!("{max_cycles} code cycles exhausted"),
        );
        self.fail(scope, Some(resource), &result);
        abandoned(scope, result)
    }

    /// Request + poll rounds. The request acknowledgement never decides
    /// anything: the code may still arrive.
    async fn obtain_credential(
        &self,
        scope: &AttemptScope,
        resource: &ResourceId,
        excluded: &HashSet<String>,
    ) -> Result<String, StageResult> {
        let timer = OperationTimer::new(Stage::ObtainCredential.as_str());
        let policy = self.shared.policy.credential;
        let channel = &self.collaborators.credentials;

        for round in 1..=policy.max_rounds {
            let accepted = match channel.request_code(resource).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!(error = %e, round, "code request failed");
                    false
                }
            };
            self.emit(
                EventLevel::Info,
                Stage::ObtainCredential.as_str(),
                &format!(
                    "[W{}] code request round {round}/{} {}, polling",
                    scope.worker_id,
                    policy.max_rounds,
                    if accepted { "accepted" } else { "not confirmed" }
                ),
                scope,
                Some(resource),
                json!({ "round": round, "request_accepted": accepted }),
            );

            match channel.poll_code(resource, &policy, excluded).await {
                Ok(Some(code)) if !code.is_empty() && !excluded.contains(&code) => {
                    self.emit(
                        EventLevel::Info,
                        Stage::ObtainCredential.as_str(),
                        &format!("[W{}] code received in round {round}", scope.worker_id),
                        scope,
                        Some(resource),
                        json!({ "round": round, "code_len": code.len(), "latency_ms": timer.elapsed_ms() }),
                    );
                    return Ok(code);
                }
                Ok(Some(_)) => debug!(round, "ignoring excluded or empty code"),
                Ok(None) => {}
                Err(e) => {
                    let result = StageResult::failure(Stage::ObtainCredential, e.kind(), true, e.to_string());
                    self.note(scope, Some(resource), EventLevel::Warning, &result);
                }
            }
        }

        let result = StageResult::failure(
            Stage::ObtainCredential,
            ErrorKind::Timeout,
            false,
            format!("no code received after {} request rounds", policy.max_rounds),
        )
        .with_latency(timer.finish());
        self.fail(scope, Some(resource), &result);
        Err(result)
    }

    async fn verify_credential(&self, scope: &AttemptScope, resource: &ResourceId, code: &str) -> Result<(), StageResult> {
        let timer = OperationTimer::new(Stage::VerifyCredential.as_str());
        let result = match self.collaborators.verifier.verify(resource, code).await {
            Ok(true) => return Ok(()),
            Ok(false) => StageResult::failure(
                Stage::VerifyCredential,
                ErrorKind::WorkflowRejected,
                true,
                "code rejected by verification",
            ),
            Err(e) => StageResult::failure(Stage::VerifyCredential, e.kind(), true, e.to_string()),
        }
        .with_latency(timer.finish());

        self.fail(scope, Some(resource), &result);
        Err(result)
    }

    /// Bounded solve-and-submit loop. A code-invalid answer leaves the loop
    /// without spending the remaining tries.
    async fn challenge_and_submit(&self, scope: &AttemptScope, resource: &ResourceId, code: &str) -> SubmitOutcome {
        let timer = OperationTimer::new(Stage::ChallengeAndSubmit.as_str());
        let tries = self.shared.policy.challenge.max_rounds;
        let mut last_kind = ErrorKind::WorkflowRejected;

        for try_no in 1..=tries {
            if let Some(result) = self.halted(Stage::ChallengeAndSubmit) {
                self.note(scope, Some(resource), EventLevel::Info, &result);
                return SubmitOutcome::Failed(result);
            }

            let token = match self.solve_challenge().await {
                Ok(token) => token,
                Err(result) => {
                    last_kind = result.error_type;
                    self.note(scope, Some(resource), EventLevel::Warning, &result.with_data("try", try_no));
                    continue;
                }
            };

            if let Some(throttle) = &self.shared.throttle {
                throttle.until_ready().await;
            }

            let failure = match self
                .collaborators
                .submitter
                .submit(resource, code, &token, &self.shared.context)
                .await
            {
                Ok(response) if response.flag(keys::CODE_INVALID) => return SubmitOutcome::CodeInvalid,
                Ok(response) if response.ok => match response.text(keys::SESSION_CREDENTIAL) {
                    // the artifact holds one credential per line
                    Some(session) if session.contains(['\n', '\r']) => StageResult::failure(
                        Stage::ChallengeAndSubmit,
                        ErrorKind::Parse,
                        true,
                        "session credential spans multiple lines",
                    ),
                    Some(session) => return SubmitOutcome::Accepted(SessionCredential::new(session)),
                    None => StageResult::failure(
                        Stage::ChallengeAndSubmit,
                        ErrorKind::Parse,
                        true,
                        "submission accepted without a session credential",
                    ),
                },
                Ok(response) => {
                    let kind = match response.error_type {
                        ErrorKind::None => ErrorKind::WorkflowRejected,
                        kind => kind,
                    };
                    StageResult::failure(Stage::ChallengeAndSubmit, kind, true, response.details)
                }
                Err(e) => StageResult::failure(Stage::ChallengeAndSubmit, e.kind(), true, e.to_string()),
            };

            last_kind = failure.error_type;
            self.note(scope, Some(resource), EventLevel::Warning, &failure.with_data("try", try_no));
            if try_no < tries {
                tokio::time::sleep(self.shared.policy.submit_retry_delay).await;
            }
        }

        let result = StageResult::failure(
            Stage::ChallengeAndSubmit,
            last_kind,
            false,
            format!("submission retries exhausted after {tries} tries"),
        )
        .with_latency(timer.finish());
        self.fail(scope, Some(resource), &result);
        SubmitOutcome::Failed(result)
    }

    async fn solve_challenge(&self) -> Result<String, StageResult> {
        let policy = self.shared.policy.challenge;
        let solver = &self.collaborators.solver;

        let task = solver
            .create_task(&self.shared.context)
            .await
            .map_err(|e| StageResult::failure(Stage::ChallengeAndSubmit, e.kind(), true, e.to_string()))?;

        for _ in 0..policy.polls_per_round {
            tokio::time::sleep(policy.poll_interval).await;
            match solver.poll_result(&task).await {
                Ok(ChallengePoll { token: Some(token), .. }) if !token.is_empty() => return Ok(token),
                Ok(ChallengePoll { terminal: true, .. }) => {
                    return Err(StageResult::failure(
                        Stage::ChallengeAndSubmit,
                        ErrorKind::Captcha,
                        true,
                        "challenge reported unsolvable",
                    ))
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "challenge poll failed"),
            }
        }

        Err(StageResult::failure(
            Stage::ChallengeAndSubmit,
            ErrorKind::Captcha,
            true,
            format!("challenge not solved after {} polls", policy.polls_per_round),
        ))
    }

    /// Post-success side effects, then the counted commit
    async fn complete(&self, scope: &AttemptScope, resource: &ResourceId, session: SessionCredential) -> AttemptReport {
        let mut tags = Vec::with_capacity(self.collaborators.post_success.len());

        for action in &self.collaborators.post_success {
            let report = match AssertUnwindSafe(action.run(&session)).catch_unwind().await {
                Ok(report) => report,
                Err(panic) => ActionReport::failed(panic_message(&*panic)),
            };
            let (level, message) = match report.tag() {
                "OK" => (EventLevel::Info, format!("[W{}] {} done", scope.worker_id, action.name())),
                "SKIP" => (
                    EventLevel::Info,
                    format!("[W{}] {} not supported by the server, skipped", scope.worker_id, action.name()),
                ),
                _ => (EventLevel::Warning, format!("[W{}] {} failed", scope.worker_id, action.name())),
            };
            self.emit(
                level,
                Stage::PostSuccessActions.as_str(),
                &message,
                scope,
                Some(resource),
                json!({
                    "action": action.name(),
                    "outcome": report.tag(),
                    "error_type": (!report.ok && report.supported).then_some(ErrorKind::Dependency),
                    "details": report.error.as_deref().map(|e| compact_text(e, 220)),
                }),
            );
            tags.push(format!("{}={}", action.name(), report.tag()));
        }

        self.finalize(scope, resource, &session, &tags).await
    }

    async fn finalize(
        &self,
        scope: &AttemptScope,
        resource: &ResourceId,
        session: &SessionCredential,
        tags: &[String],
    ) -> AttemptReport {
        let timer = OperationTimer::new(Stage::Finalize.as_str());
        match self.shared.sink.commit(session, &self.shared.ledger).await {
            Ok(success_no) => {
                let elapsed = self.shared.started_at.elapsed().as_secs_f64();
                let average = elapsed / success_no.max(1) as f64;
                self.emit(
                    EventLevel::Info,
                    Stage::Finalize.as_str(),
                    &format!(
                        "[W{}] success {success_no}/{} | {} | avg {average:.1}s | {}",
                        scope.worker_id,
                        self.shared.ledger.target_successes(),
                        mask_resource(resource.as_str()),
                        if tags.is_empty() { "-".to_string() } else { tags.join(" ") },
                    ),
                    scope,
                    Some(resource),
                    json!({ "success_no": success_no, "latency_ms": timer.finish() }),
                );
                AttemptReport {
                    slot_no: scope.slot_no,
                    outcome: AttemptOutcome::Succeeded { success_no },
                }
            }
            Err(e) => {
                let result = StageResult::failure(
                    Stage::Finalize,
                    ErrorKind::Dependency,
                    false,
                    format!("failed to write output artifact: {e}"),
                )
                .with_latency(timer.finish());
                self.fail(scope, Some(resource), &result);
                abandoned(scope, result)
            }
        }
    }

    async fn cleanup(&self, scope: &AttemptScope, resource: &ResourceId, succeeded: bool) {
        if succeeded && self.shared.keep_successful_resource {
            self.emit(
                EventLevel::Info,
                Stage::Cleanup.as_str(),
                &format!("[W{}] keeping resource of successful attempt", scope.worker_id),
                scope,
                Some(resource),
                json!({}),
            );
            return;
        }

        let outcome = AssertUnwindSafe(self.collaborators.resources.release(resource))
            .catch_unwind()
            .await;
        let problem = match outcome {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some("release not confirmed".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(&*panic)),
        };
        if let Some(details) = problem {
            self.emit(
                EventLevel::Warning,
                Stage::Cleanup.as_str(),
                &format!("[W{}] resource release failed", scope.worker_id),
                scope,
                Some(resource),
                json!({ "details": compact_text(&details, 220) }),
            );
        }
    }

    /// In-flight attempts stop early for target or external stops. An
    /// attempt-limit stop lets already-claimed slots finish.
    fn halted(&self, stage: Stage) -> Option<StageResult> {
        if !self.shared.ledger.should_stop() {
            return None;
        }
        match self.shared.ledger.stop_reason() {
            None | Some(StopReason::AttemptLimit) => None,
            Some(reason) => Some(StageResult::failure(
                stage,
                ErrorKind::Policy,
                false,
                format!("run stopping: {reason}"),
            )),
        }
    }

    /// Logs a stage failure and counts it in the run summary
    pub fn fail(&self, scope: &AttemptScope, resource: Option<&ResourceId>, result: &StageResult) {
        self.shared.tally.record(result.error_type);
        let level = if result.retryable { EventLevel::Warning } else { EventLevel::Error };
        self.note(scope, resource, level, result);
    }

    /// Logs a stage failure without counting it (intermediate retries)
    fn note(&self, scope: &AttemptScope, resource: Option<&ResourceId>, level: EventLevel, result: &StageResult) {
        let mut fields = json!({
            "error_type": result.error_type,
            "retryable": result.retryable,
            "details": compact_text(&result.details, 220),
            "latency_ms": result.latency_ms,
        });
        if let Value::Object(map) = &mut fields {
            for (key, value) in &result.data {
                map.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        self.emit(
            level,
            &result.stage,
            &format!("[W{}] {} failed", scope.worker_id, result.stage),
            scope,
            resource,
            fields,
        );
    }

    fn emit(
        &self,
        level: EventLevel,
        stage: &str,
        message: &str,
        scope: &AttemptScope,
        resource: Option<&ResourceId>,
        mut fields: Value,
    ) {
        if let Value::Object(map) = &mut fields {
            map.insert("worker_id".to_string(), json!(scope.worker_id));
            map.insert("attempt_no".to_string(), json!(scope.slot_no));
            map.insert("correlation_id".to_string(), json!(scope.correlation_id));
            if let Some(resource) = resource {
                map.insert("resource".to_string(), json!(mask_resource(resource.as_str())));
            }
        }
        self.shared.log.event(level, stage, message, fields);
    }
}

fn abandoned(scope: &AttemptScope, result: StageResult) -> AttemptReport {
    AttemptReport {
        slot_no: scope.slot_no,
        outcome: AttemptOutcome::Abandoned(result),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn panicked(stage: Stage, panic: &(dyn Any + Send)) -> StageResult {
    StageResult::failure(stage, ErrorKind::Unknown, true, format!("panic: {}", panic_message(panic)))
}

/// Random delay in `[0, max]`, used to spread worker start-up
pub(crate) fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let ms = rand::Rng::random_range(&mut rand::rng(), 0..=max_ms);
    Duration::from_millis(ms)
}
