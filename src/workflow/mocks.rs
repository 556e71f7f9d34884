// Scripted collaborators for testing - no I/O, every call recorded

use crate::errors::CollaboratorError;
use crate::workflow::policy::PollPolicy;
use crate::workflow::traits::*;
use crate::workflow::types::*;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

/// Hands out `user{n}@mail.test` unless scripted otherwise
#[derive(Debug, Default)]
pub struct ScriptedResources {
    pub acquire_script: Mutex<VecDeque<Result<ResourceId, CollaboratorError>>>,
    pub acquired: AtomicUsize,
    pub released: Mutex<Vec<ResourceId>>,
}

impl ScriptedResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_acquire(&self, result: Result<ResourceId, CollaboratorError>) {
        lock(&self.acquire_script).push_back(result);
    }

    pub fn released(&self) -> Vec<ResourceId> {
        lock(&self.released).clone()
    }
}

#[async_trait]
impl ResourceProvider for ScriptedResources {
    async fn acquire(&self) -> Result<ResourceId, CollaboratorError> {
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.acquire_script)
            .pop_front()
            .unwrap_or_else(|| Ok(ResourceId(format!("user{n}@mail.test"))))
    }

    async fn release(&self, resource: &ResourceId) -> Result<bool, CollaboratorError> {
        lock(&self.released).push(resource.clone());
        Ok(true)
    }
}

/// Mailbox model: each poll may deliver one scripted code; the newest
/// delivered code outside the exclusion set is returned.
#[derive(Debug, Default)]
pub struct ScriptedCredentials {
    pub request_answers: Mutex<VecDeque<Result<bool, CollaboratorError>>>,
    pub deliveries: Mutex<VecDeque<Option<String>>>,
    pub inbox: Mutex<Vec<String>>,
    /// Ignore the exclusion set, like a broken channel would
    pub ignore_exclusions: bool,
    pub requests: AtomicUsize,
    pub polls: AtomicUsize,
    pub exclusions_seen: Mutex<Vec<HashSet<String>>>,
    pub returned: Mutex<Vec<String>>,
}

impl ScriptedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deliveries(deliveries: &[Option<&str>]) -> Self {
        let channel = Self::default();
        *lock(&channel.deliveries) = deliveries.iter().map(|d| d.map(str::to_string)).collect();
        channel
    }

    pub fn push_request_answer(&self, answer: Result<bool, CollaboratorError>) {
        lock(&self.request_answers).push_back(answer);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialChannel for ScriptedCredentials {
    async fn request_code(&self, _resource: &ResourceId) -> Result<bool, CollaboratorError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        lock(&self.request_answers).pop_front().unwrap_or(Ok(true))
    }

    async fn poll_code(
        &self,
        _resource: &ResourceId,
        _policy: &PollPolicy,
        excluded: &HashSet<String>,
    ) -> Result<Option<String>, CollaboratorError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        lock(&self.exclusions_seen).push(excluded.clone());

        if let Some(Some(code)) = lock(&self.deliveries).pop_front() {
            lock(&self.inbox).push(code);
        }
        let found = lock(&self.inbox)
            .iter()
            .rev()
            .find(|code| self.ignore_exclusions || !excluded.contains(*code))
            .cloned();
        if let Some(code) = &found {
            lock(&self.returned).push(code.clone());
        }
        Ok(found)
    }
}

/// Accepts every code unless scripted otherwise
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    pub answers: Mutex<VecDeque<Result<bool, CollaboratorError>>>,
    pub verified: Mutex<Vec<String>>,
}

impl ScriptedVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answers(answers: &[bool]) -> Self {
        let verifier = Self::default();
        *lock(&verifier.answers) = answers.iter().map(|a| Ok(*a)).collect();
        verifier
    }

    pub fn verified(&self) -> Vec<String> {
        lock(&self.verified).clone()
    }
}

#[async_trait]
impl VerificationChannel for ScriptedVerifier {
    async fn verify(&self, _resource: &ResourceId, code: &str) -> Result<bool, CollaboratorError> {
        lock(&self.verified).push(code.to_string());
        lock(&self.answers).pop_front().unwrap_or(Ok(true))
    }
}

/// Solves on the first poll unless scripted otherwise
#[derive(Debug, Default)]
pub struct ScriptedSolver {
    pub polls_script: Mutex<VecDeque<ChallengePoll>>,
    pub tasks: AtomicUsize,
    pub polls: AtomicUsize,
    /// Panic inside `create_task` on this task number (1-based)
    pub panic_on_task: Option<usize>,
}

impl ScriptedSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_polls(polls: Vec<ChallengePoll>) -> Self {
        let solver = Self::default();
        *lock(&solver.polls_script) = polls.into();
        solver
    }

    pub fn tasks(&self) -> usize {
        self.tasks.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

pub fn pending() -> ChallengePoll {
    ChallengePoll { token: None, terminal: false }
}

pub fn unsolvable() -> ChallengePoll {
    ChallengePoll { token: None, terminal: true }
}

pub fn solved(token: &str) -> ChallengePoll {
    ChallengePoll { token: Some(token.to_string()), terminal: false }
}

#[async_trait]
impl ChallengeSolver for ScriptedSolver {
    async fn create_task(&self, _context: &RuntimeContext) -> Result<TaskId, CollaboratorError> {
        let n = self.tasks.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_on_task == Some(n) {
            panic!("solver crashed on task {n}");
        }
        Ok(TaskId(format!("task-{n}")))
    }

    async fn poll_result(&self, _task: &TaskId) -> Result<ChallengePoll, CollaboratorError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.polls_script).pop_front().unwrap_or_else(|| solved("challenge-token")))
    }
}

#[derive(Debug, Clone)]
pub enum SubmitScript {
    Accept(String),
    CodeInvalid,
    Reject(String),
    MissingCredential,
    Fail(CollaboratorError),
}

/// Accepts with `session-{n}` unless scripted otherwise
#[derive(Debug, Default)]
pub struct ScriptedSubmitter {
    pub script: Mutex<VecDeque<SubmitScript>>,
    pub submitted_codes: Mutex<Vec<String>>,
}

impl ScriptedSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<SubmitScript>) -> Self {
        let submitter = Self::default();
        *lock(&submitter.script) = script.into();
        submitter
    }

    pub fn submitted_codes(&self) -> Vec<String> {
        lock(&self.submitted_codes).clone()
    }
}

#[async_trait]
impl WorkflowSubmitter for ScriptedSubmitter {
    async fn submit(
        &self,
        _resource: &ResourceId,
        code: &str,
        _challenge_token: &str,
        _context: &RuntimeContext,
    ) -> Result<StageResult, CollaboratorError> {
        let n = {
            let mut codes = lock(&self.submitted_codes);
            codes.push(code.to_string());
            codes.len()
        };
        let step = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| SubmitScript::Accept(format!("session-{n}")));
        match step {
            SubmitScript::Accept(session) => Ok(StageResult::success(Stage::ChallengeAndSubmit)
                .with_data(keys::SESSION_CREDENTIAL, session)),
            SubmitScript::CodeInvalid => Ok(StageResult::failure(
                Stage::ChallengeAndSubmit,
                ErrorKind::WorkflowRejected,
                false,
                "invalid validation code",
            )
            .with_data(keys::CODE_INVALID, true)),
            SubmitScript::Reject(details) => Ok(StageResult::failure(
                Stage::ChallengeAndSubmit,
                ErrorKind::None,
                true,
                details,
            )),
            SubmitScript::MissingCredential => Ok(StageResult::success(Stage::ChallengeAndSubmit)),
            SubmitScript::Fail(e) => Err(e),
        }
    }
}

/// Post-success action returning a fixed report
#[derive(Debug)]
pub struct RecordingAction {
    pub name: String,
    pub report: ActionReport,
    pub runs: AtomicUsize,
}

impl RecordingAction {
    pub fn new(name: &str, report: ActionReport) -> Self {
        Self {
            name: name.to_string(),
            report,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostSuccessAction for RecordingAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _session: &SessionCredential) -> ActionReport {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.report.clone()
    }
}

pub struct StaticBootstrapper(pub Result<RuntimeContext, CollaboratorError>);

#[async_trait]
impl Bootstrapper for StaticBootstrapper {
    async fn resolve(&self) -> Result<RuntimeContext, CollaboratorError> {
        self.0.clone()
    }
}

pub fn test_context() -> RuntimeContext {
    RuntimeContext {
        challenge_site_key: "site-key".to_string(),
        action_id: "7f".to_string() + &"a".repeat(40),
        router_state_token: "router-state".to_string(),
    }
}

/// Concrete handles kept next to the trait-object bundle so tests can
/// inspect what happened
pub struct Fakes {
    pub resources: Arc<ScriptedResources>,
    pub credentials: Arc<ScriptedCredentials>,
    pub verifier: Arc<ScriptedVerifier>,
    pub solver: Arc<ScriptedSolver>,
    pub submitter: Arc<ScriptedSubmitter>,
    pub actions: Vec<Arc<RecordingAction>>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            resources: Arc::new(ScriptedResources::new()),
            credentials: Arc::new(ScriptedCredentials::with_deliveries(&[Some("123456")])),
            verifier: Arc::new(ScriptedVerifier::new()),
            solver: Arc::new(ScriptedSolver::new()),
            submitter: Arc::new(ScriptedSubmitter::new()),
            actions: vec![
                Arc::new(RecordingAction::new("accept_terms", ActionReport::ok())),
                Arc::new(RecordingAction::new("enable_feature", ActionReport::ok())),
            ],
        }
    }
}

impl Fakes {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            resources: self.resources.clone(),
            credentials: self.credentials.clone(),
            verifier: self.verifier.clone(),
            solver: self.solver.clone(),
            submitter: self.submitter.clone(),
            post_success: self
                .actions
                .iter()
                .map(|a| a.clone() as Arc<dyn PostSuccessAction>)
                .collect(),
        }
    }
}
