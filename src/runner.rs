// Runner - bootstraps the run, spawns the worker pool and reports the summary

use crate::config::RunConfig;
use crate::errors::RunnerError;
use crate::events::{compact_text, mask_proxy, EventLog};
use crate::ledger::AttemptLedger;
use crate::observability::{FailureTally, OperationTimer};
use crate::output::SuccessSink;
use crate::workflow::{
    AttemptEngine, Bootstrapper, CollaboratorFactory, ErrorKind, RunShared, RuntimeContext, Stage,
    StopReason, Worker, WorkflowPolicy,
};
use governor::{Quota, RateLimiter};
use serde_json::json;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Final counters of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub attempts: u64,
    pub successes: u64,
    pub target_successes: u64,
    pub max_attempts: u64,
    pub stop_reason: Option<StopReason>,
    /// `(kind, count)` sorted by count, largest first
    pub failures: Vec<(ErrorKind, u64)>,
    pub elapsed: Duration,
    pub output_path: PathBuf,
    pub metrics_path: PathBuf,
}

impl RunSummary {
    pub fn target_reached(&self) -> bool {
        self.successes >= self.target_successes
    }
}

pub struct Runner {
    config: RunConfig,
    policy: WorkflowPolicy,
    bootstrapper: Arc<dyn Bootstrapper>,
    factory: Arc<dyn CollaboratorFactory>,
    ledger: Arc<AttemptLedger>,
    sink: Arc<SuccessSink>,
    log: Arc<EventLog>,
    tally: Arc<FailureTally>,
}

impl Runner {
    /// Creates the output artifact and the event log. Nothing runs yet.
    pub async fn new(
        config: RunConfig,
        policy: WorkflowPolicy,
        bootstrapper: Arc<dyn Bootstrapper>,
        factory: Arc<dyn CollaboratorFactory>,
    ) -> Result<Self, RunnerError> {
        let sink = SuccessSink::create(&config.output_path).await?;
        let log = EventLog::open(&config.metrics_path);
        let ledger = AttemptLedger::new(config.target_successes, config.max_attempts);

        Ok(Self {
            config,
            policy,
            bootstrapper,
            factory,
            ledger: Arc::new(ledger),
            sink: Arc::new(sink),
            log: Arc::new(log),
            tally: Arc::new(FailureTally::new()),
        })
    }

    /// Shared with the shutdown coordinator so Ctrl-C can stop the run
    pub fn ledger(&self) -> &Arc<AttemptLedger> {
        &self.ledger
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Resolves the run-scoped context once. Failure ends the run.
    pub async fn bootstrap(&self) -> Result<RuntimeContext, RunnerError> {
        let timer = OperationTimer::new(Stage::Bootstrap.as_str());
        match self.bootstrapper.resolve().await {
            Ok(context) => {
                self.log.info(
                    Stage::Bootstrap.as_str(),
                    "runtime context resolved",
                    json!({
                        "site_key": context.challenge_site_key,
                        "action_id_prefix": context.action_id.chars().take(12).collect::<String>(),
                        "latency_ms": timer.finish(),
                    }),
                );
                Ok(context)
            }
            Err(e) => {
                let kind = e.kind();
                let details = e.to_string();
                self.tally.record(kind);
                self.log.error(
                    Stage::Bootstrap.as_str(),
                    "bootstrap failed, aborting run",
                    json!({
                        "error_type": kind,
                        "details": compact_text(&details, 220),
                        "latency_ms": timer.finish(),
                    }),
                );
                Err(RunnerError::Bootstrap { kind, details })
            }
        }
    }

    pub async fn run(&self) -> Result<RunSummary, RunnerError> {
        let started_at = Instant::now();
        self.log_startup();

        let context = self.bootstrap().await?;

        let throttle = self
            .policy
            .submit_per_second
            .and_then(NonZeroU32::new)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));

        let shared = Arc::new(RunShared {
            context: Arc::new(context),
            policy: self.policy.clone(),
            ledger: Arc::clone(&self.ledger),
            sink: Arc::clone(&self.sink),
            log: Arc::clone(&self.log),
            tally: Arc::clone(&self.tally),
            keep_successful_resource: self.config.keep_successful_resource,
            throttle,
            started_at,
        });

        let mut workers = JoinSet::new();
        for worker_id in 1..=self.config.worker_count {
            match self.factory.build(worker_id, self.config.proxy.as_deref()) {
                Ok(collaborators) => {
                    let engine = AttemptEngine::new(collaborators, Arc::clone(&shared));
                    workers.spawn(Worker::new(worker_id, engine).run());
                }
                Err(e) => {
                    self.tally.record(ErrorKind::Dependency);
                    self.log.error(
                        Stage::Worker.as_str(),
                        &format!("[W{worker_id}] collaborator setup failed, worker not started"),
                        json!({
                            "worker_id": worker_id,
                            "error_type": ErrorKind::Dependency,
                            "details": compact_text(&e.to_string(), 220),
                        }),
                    );
                }
            }
        }
        info!(workers = workers.len(), "worker pool started");

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                self.tally.record(ErrorKind::Unknown);
                self.log.error(
                    Stage::Worker.as_str(),
                    "worker task ended abnormally",
                    json!({
                        "error_type": ErrorKind::Unknown,
                        "details": compact_text(&e.to_string(), 220),
                    }),
                );
            }
        }

        let summary = self.summarize(started_at.elapsed());
        self.log_summary(&summary);
        Ok(summary)
    }

    fn log_startup(&self) {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let proxy = self
            .config
            .proxy
            .as_deref()
            .map(mask_proxy)
            .unwrap_or_else(|| "direct".to_string());

        self.log.info(
            "startup",
            &format!(
                "run starting: {} workers, target {}, max attempts {}",
                self.config.worker_count, self.config.target_successes, self.config.max_attempts
            ),
            json!({
                "metrics_path": self.log.path().display().to_string(),
                "output_path": self.sink.path().display().to_string(),
                "proxy": proxy,
                "keep_success_resource": self.config.keep_successful_resource,
                "host": host,
            }),
        );
    }

    fn summarize(&self, elapsed: Duration) -> RunSummary {
        let snapshot = self.ledger.snapshot();
        RunSummary {
            attempts: snapshot.attempt_count,
            successes: snapshot.success_count,
            target_successes: snapshot.target_successes,
            max_attempts: snapshot.max_attempts,
            stop_reason: snapshot.stop_reason,
            failures: self.tally.sorted(),
            elapsed,
            output_path: self.sink.path().to_path_buf(),
            metrics_path: self.log.path().to_path_buf(),
        }
    }

    fn log_summary(&self, summary: &RunSummary) {
        let stop_reason = summary
            .stop_reason
            .map(|r| r.as_str())
            .unwrap_or("workers_exhausted");

        self.log.info(
            "summary",
            &format!(
                "run finished: {}/{} successes in {} attempts ({stop_reason}), {:.1}s",
                summary.successes,
                summary.target_successes,
                summary.attempts,
                summary.elapsed.as_secs_f64()
            ),
            json!({
                "success_count": summary.successes,
                "attempt_count": summary.attempts,
                "target_successes": summary.target_successes,
                "max_attempts": summary.max_attempts,
                "stop_reason": stop_reason,
                "elapsed_ms": summary.elapsed.as_millis() as u64,
            }),
        );

        for (kind, count) in &summary.failures {
            self.log.info(
                "summary",
                &format!("failure_bucket {kind}: {count}"),
                json!({ "failure_bucket": kind, "count": count }),
            );
        }

        if summary.stop_reason == Some(StopReason::AttemptLimit) && !summary.target_reached() {
            warn!(
                successes = summary.successes,
                target = summary.target_successes,
                "attempt limit reached before target"
            );
            self.log.warning(
                "summary",
                &format!(
                    "attempt limit {} reached with {}/{} successes",
                    summary.max_attempts, summary.successes, summary.target_successes
                ),
                json!({ "error_type": ErrorKind::Policy }),
            );
        }
    }
}
