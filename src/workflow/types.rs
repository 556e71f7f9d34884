// Value types shared by the ledger, the attempt engine and the runner

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Data keys a `WorkflowSubmitter` sets on its `StageResult`
pub mod keys {
    pub const CODE_INVALID: &str = "code_invalid";
    pub const SESSION_CREDENTIAL: &str = "session_credential";
}

/// Failure classification, used for metrics and retryability only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    Network,
    Timeout,
    Captcha,
    Parse,
    WorkflowRejected,
    Dependency,
    Policy,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::None => "none",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Captcha => "captcha",
            ErrorKind::Parse => "parse",
            ErrorKind::WorkflowRejected => "workflow_rejected",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Policy => "policy",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the run stopped. Set at most once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    AttemptLimit,
    ExternalStop,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::TargetReached => "target_reached",
            StopReason::AttemptLimit => "attempt_limit",
            StopReason::ExternalStop => "external_stop",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a slot request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptClaim {
    pub allowed: bool,
    pub slot_no: u64,
    pub reason: Option<StopReason>,
}

/// Stages of one attempt, plus the pseudo-stages used for worker-level events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Bootstrap,
    AcquireResource,
    ObtainCredential,
    VerifyCredential,
    ChallengeAndSubmit,
    PostSuccessActions,
    Finalize,
    Cleanup,
    Worker,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Bootstrap => "bootstrap",
            Stage::AcquireResource => "acquire_resource",
            Stage::ObtainCredential => "obtain_credential",
            Stage::VerifyCredential => "verify_credential",
            Stage::ChallengeAndSubmit => "challenge_and_submit",
            Stage::PostSuccessActions => "post_success_actions",
            Stage::Finalize => "finalize",
            Stage::Cleanup => "cleanup",
            Stage::Worker => "worker",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified outcome of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub ok: bool,
    pub stage: String,
    pub error_type: ErrorKind,
    pub retryable: bool,
    pub details: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub latency_ms: Option<u64>,
}

impl StageResult {
    pub fn success(stage: Stage) -> Self {
        Self {
            ok: true,
            stage: stage.as_str().to_string(),
            error_type: ErrorKind::None,
            retryable: false,
            details: String::new(),
            data: Map::new(),
            latency_ms: None,
        }
    }

    pub fn failure(stage: Stage, error_type: ErrorKind, retryable: bool, details: impl Into<String>) -> Self {
        Self {
            ok: false,
            stage: stage.as_str().to_string(),
            error_type,
            retryable,
            details: details.into(),
            data: Map::new(),
            latency_ms: None,
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Boolean data field, false when absent or not a bool
    pub fn flag(&self, key: &str) -> bool {
        self.data.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Non-empty string data field
    pub fn text(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Run-scoped parameters resolved once by bootstrap and read-only afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub challenge_site_key: String,
    pub action_id: String,
    pub router_state_token: String,
}

/// Identifier of a disposable resource (e.g. a throwaway mailbox address)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of a pending challenge task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

/// Session credential captured from a successful submission.
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCredential(<{} chars>)", self.0.len())
    }
}

/// One poll of a challenge task
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChallengePoll {
    pub token: Option<String>,
    /// No further polling will help, regardless of token presence
    pub terminal: bool,
}

/// Tri-state report of a post-success side effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub ok: bool,
    pub supported: bool,
    pub error: Option<String>,
}

impl ActionReport {
    pub fn ok() -> Self {
        Self { ok: true, supported: true, error: None }
    }

    pub fn unsupported() -> Self {
        Self { ok: false, supported: false, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { ok: false, supported: true, error: Some(error.into()) }
    }

    /// `OK`, `SKIP` or `WARN`
    pub fn tag(&self) -> &'static str {
        if !self.supported {
            "SKIP"
        } else if self.ok {
            "OK"
        } else {
            "WARN"
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded { success_no: u64 },
    Abandoned(StageResult),
}

/// What one pass through the state machine produced
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub slot_no: u64,
    pub outcome: AttemptOutcome,
}

impl AttemptReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded { .. })
    }

    pub fn failure(&self) -> Option<&StageResult> {
        match &self.outcome {
            AttemptOutcome::Abandoned(result) => Some(result),
            AttemptOutcome::Succeeded { .. } => None,
        }
    }
}
