// Simulation backend - in-process stand-ins for every collaborator, driven
// by configured probabilities. Lets the runner be exercised end to end
// without any remote service.

use crate::bootstrap::PageFetcher;
use crate::config::SimulationSettings;
use crate::errors::CollaboratorError;
use crate::workflow::types::keys;
use crate::workflow::*;
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Rolls `true` with probability `rate`, clamped to `[0, 1]`
fn roll(rate: f64) -> bool {
    let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
    rand::rng().random_bool(rate)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct BackendState {
    /// Delivered codes per resource, oldest first
    mailboxes: HashMap<String, Vec<String>>,
    /// Whether each challenge task will be solved
    tasks: HashMap<String, bool>,
}

/// One object playing every remote party of the workflow
#[derive(Debug)]
pub struct SimulatedBackend {
    settings: SimulationSettings,
    next_resource: AtomicU64,
    next_task: AtomicU64,
    state: Mutex<BackendState>,
}

impl SimulatedBackend {
    pub fn new(settings: SimulationSettings) -> Self {
        Self {
            settings,
            next_resource: AtomicU64::new(0),
            next_task: AtomicU64::new(0),
            state: Mutex::new(BackendState::default()),
        }
    }

    async fn latency(&self) {
        if self.settings.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.latency_ms)).await;
        }
    }

    /// Bundles the backend with the two post-success actions: accepting
    /// the terms always works, the feature toggle may be unsupported.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        let rate = self.settings.action_supported_rate;
        Collaborators {
            resources: self.clone(),
            credentials: self.clone(),
            verifier: self.clone(),
            solver: self.clone(),
            submitter: self.clone(),
            post_success: vec![
                Arc::new(SimulatedAction::new("accept_terms", 1.0)),
                Arc::new(SimulatedAction::new("enable_feature", rate)),
            ],
        }
    }
}

#[async_trait]
impl ResourceProvider for SimulatedBackend {
    async fn acquire(&self) -> Result<ResourceId, CollaboratorError> {
        self.latency().await;
        let n = self.next_resource.fetch_add(1, Ordering::Relaxed) + 1;
        let resource = ResourceId(format!("sim{n:05}@mail.example.test"));
        lock(&self.state)
            .mailboxes
            .insert(resource.as_str().to_string(), Vec::new());
        Ok(resource)
    }

    async fn release(&self, resource: &ResourceId) -> Result<bool, CollaboratorError> {
        self.latency().await;
        Ok(lock(&self.state).mailboxes.remove(resource.as_str()).is_some())
    }
}

#[async_trait]
impl CredentialChannel for SimulatedBackend {
    async fn request_code(&self, resource: &ResourceId) -> Result<bool, CollaboratorError> {
        self.latency().await;
        if !roll(self.settings.code_delivery_rate) {
            return Ok(false);
        }
        let code = format!("{:06}", rand::rng().random_range(0..1_000_000u32));
        let mut state = lock(&self.state);
        match state.mailboxes.get_mut(resource.as_str()) {
            Some(mailbox) => {
                mailbox.push(code);
                Ok(true)
            }
            None => Err(CollaboratorError::Rejected(format!("unknown resource {resource}"))),
        }
    }

    /// Codes land at request time, so a single look after one interval
    /// is as good as the full round.
    async fn poll_code(
        &self,
        resource: &ResourceId,
        policy: &PollPolicy,
        excluded: &HashSet<String>,
    ) -> Result<Option<String>, CollaboratorError> {
        tokio::time::sleep(policy.poll_interval.min(Duration::from_millis(self.settings.latency_ms))).await;
        let state = lock(&self.state);
        Ok(state.mailboxes.get(resource.as_str()).and_then(|mailbox| {
            mailbox.iter().rev().find(|code| !excluded.contains(*code)).cloned()
        }))
    }
}

#[async_trait]
impl VerificationChannel for SimulatedBackend {
    async fn verify(&self, _resource: &ResourceId, code: &str) -> Result<bool, CollaboratorError> {
        self.latency().await;
        if code.len() != 6 {
            return Err(CollaboratorError::Parse(format!("malformed code of length {}", code.len())));
        }
        Ok(roll(self.settings.verify_accept_rate))
    }
}

#[async_trait]
impl ChallengeSolver for SimulatedBackend {
    async fn create_task(&self, context: &RuntimeContext) -> Result<TaskId, CollaboratorError> {
        self.latency().await;
        if context.challenge_site_key.is_empty() {
            return Err(CollaboratorError::Captcha("missing site key".to_string()));
        }
        let n = self.next_task.fetch_add(1, Ordering::Relaxed) + 1;
        let task = TaskId(format!("task-{n}"));
        let solvable = roll(self.settings.challenge_solve_rate);
        lock(&self.state).tasks.insert(task.0.clone(), solvable);
        Ok(task)
    }

    async fn poll_result(&self, task: &TaskId) -> Result<ChallengePoll, CollaboratorError> {
        self.latency().await;
        let solvable = lock(&self.state).tasks.remove(&task.0);
        match solvable {
            Some(true) => Ok(ChallengePoll {
                token: Some(format!("0.{}", Uuid::new_v4().simple())),
                terminal: false,
            }),
            Some(false) => Ok(ChallengePoll {
                token: None,
                terminal: true,
            }),
            None => Err(CollaboratorError::Captcha(format!("unknown task {}", task.0))),
        }
    }
}

#[async_trait]
impl WorkflowSubmitter for SimulatedBackend {
    async fn submit(
        &self,
        _resource: &ResourceId,
        code: &str,
        challenge_token: &str,
        context: &RuntimeContext,
    ) -> Result<StageResult, CollaboratorError> {
        self.latency().await;
        if challenge_token.is_empty() || context.action_id.is_empty() {
            return Err(CollaboratorError::Rejected("incomplete submission".to_string()));
        }

        let (invalid, accepted) = (roll(self.settings.code_invalid_rate), roll(self.settings.submit_accept_rate));
        if invalid {
            return Ok(StageResult::failure(
                Stage::ChallengeAndSubmit,
                ErrorKind::WorkflowRejected,
                false,
                format!("code {code} no longer valid"),
            )
            .with_data(keys::CODE_INVALID, true));
        }
        if !accepted {
            return Ok(StageResult::failure(
                Stage::ChallengeAndSubmit,
                ErrorKind::WorkflowRejected,
                true,
                "confirmation link missing from response",
            ));
        }
        Ok(StageResult::success(Stage::ChallengeAndSubmit)
            .with_data(keys::SESSION_CREDENTIAL, format!("sso-{}", Uuid::new_v4().simple())))
    }
}

/// Post-success action supported with a fixed probability
#[derive(Debug, Clone)]
pub struct SimulatedAction {
    name: String,
    supported_rate: f64,
}

impl SimulatedAction {
    pub fn new(name: &str, supported_rate: f64) -> Self {
        Self {
            name: name.to_string(),
            supported_rate,
        }
    }
}

#[async_trait]
impl PostSuccessAction for SimulatedAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, session: &SessionCredential) -> ActionReport {
        if session.expose().is_empty() {
            return ActionReport::failed("empty session");
        }
        if roll(self.supported_rate) {
            ActionReport::ok()
        } else {
            ActionReport::unsupported()
        }
    }
}

/// Serves a landing page and script asset shaped like the real sign-up page
#[derive(Debug, Clone)]
pub struct SimulatedPages {
    landing_url: String,
    site_key: String,
    action_id: String,
}

impl SimulatedPages {
    pub fn new(landing_url: impl Into<String>) -> Self {
        Self {
            landing_url: landing_url.into(),
            site_key: "0x4AAAAAAAsimulated_key".to_string(),
            action_id: format!("7f{}00000000", Uuid::new_v4().simple()),
        }
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    fn landing_html(&self) -> String {
        format!(
            concat!(
                "<!DOCTYPE html><html><head>",
                "<script src=\"/_next/static/chunks/webpack-sim.js\" async></script>",
                "<script src=\"/_next/static/chunks/app/sign-up/page-sim.js\" async></script>",
                "</head><body><div data-props='{{\"sitekey\":\"{site_key}\"}}'></div>",
                "<meta name=\"state\" content='{{\"next-router-state-tree\":\"%5B%22%22%2C%7B%22sign-up%22%7D%5D\"}}'>",
                "</body></html>"
            ),
            site_key = self.site_key
        )
    }
}

#[async_trait]
impl PageFetcher for SimulatedPages {
    async fn fetch(&self, url: &str) -> Result<String, CollaboratorError> {
        if url == self.landing_url {
            Ok(self.landing_html())
        } else if url.ends_with("/_next/static/chunks/app/sign-up/page-sim.js") {
            Ok(format!(
                "(self.webpackChunk=self.webpackChunk||[]).push([[1],{{1:(e,t,n)=>{{n.r(t);\
                 var a=(0,n.createServerReference)(\"{}\")}}}}]);",
                self.action_id
            ))
        } else if url.contains("/_next/static/") {
            Ok("(()=>{\"use strict\"})();".to_string())
        } else {
            Err(CollaboratorError::Network(format!("404 for {url}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{PageScraper, ScrapeRules};

    fn certain() -> SimulationSettings {
        SimulationSettings {
            code_delivery_rate: 1.0,
            verify_accept_rate: 1.0,
            challenge_solve_rate: 1.0,
            code_invalid_rate: 0.0,
            submit_accept_rate: 1.0,
            action_supported_rate: 1.0,
            latency_ms: 0,
            ..SimulationSettings::default()
        }
    }

    #[test]
    fn test_roll_handles_out_of_range_rates() {
        assert!(roll(1.5));
        assert!(!roll(-1.0));
        assert!(!roll(f64::NAN));
    }

    #[tokio::test]
    async fn test_codes_flow_through_mailbox() {
        let backend = SimulatedBackend::new(certain());
        let resource = backend.acquire().await.unwrap();
        assert!(backend.request_code(&resource).await.unwrap());

        let policy = PollPolicy::new(1, 1, Duration::ZERO);
        let code = backend
            .poll_code(&resource, &policy, &HashSet::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code.len(), 6);

        let excluded: HashSet<String> = [code].into_iter().collect();
        assert_eq!(backend.poll_code(&resource, &policy, &excluded).await.unwrap(), None);

        assert!(backend.release(&resource).await.unwrap());
        assert!(!backend.release(&resource).await.unwrap());
    }

    #[tokio::test]
    async fn test_collaborators_carry_two_post_success_actions() {
        let backend = Arc::new(SimulatedBackend::new(SimulationSettings {
            action_supported_rate: 0.0,
            ..certain()
        }));
        let collaborators = backend.collaborators();
        let names: Vec<&str> = collaborators.post_success.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["accept_terms", "enable_feature"]);

        let session = SessionCredential::new("sso-test");
        assert_eq!(collaborators.post_success[0].run(&session).await.tag(), "OK");
        assert_eq!(collaborators.post_success[1].run(&session).await.tag(), "SKIP");
    }

    #[tokio::test]
    async fn test_unsolvable_task_is_terminal() {
        let backend = SimulatedBackend::new(SimulationSettings {
            challenge_solve_rate: 0.0,
            ..certain()
        });
        let context = RuntimeContext {
            challenge_site_key: "0x4key".to_string(),
            action_id: "7f00".to_string(),
            router_state_token: String::new(),
        };
        let task = backend.create_task(&context).await.unwrap();
        let poll = backend.poll_result(&task).await.unwrap();
        assert!(poll.terminal);
        assert!(poll.token.is_none());
    }

    #[tokio::test]
    async fn test_submit_signals_code_invalid() {
        let backend = SimulatedBackend::new(SimulationSettings {
            code_invalid_rate: 1.0,
            ..certain()
        });
        let context = RuntimeContext {
            challenge_site_key: "0x4key".to_string(),
            action_id: "7f00".to_string(),
            router_state_token: String::new(),
        };
        let result = backend
            .submit(&ResourceId("a@b.test".into()), "123456", "tok", &context)
            .await
            .unwrap();
        assert!(result.flag(keys::CODE_INVALID));
    }

    #[tokio::test]
    async fn test_simulated_pages_satisfy_scraper() {
        let landing = "https://signup.example.test/sign-up";
        let pages = SimulatedPages::new(landing);
        let expected = pages.action_id().to_string();

        let context = PageScraper::new(pages, ScrapeRules::new(landing))
            .resolve()
            .await
            .unwrap();

        assert_eq!(context.action_id, expected);
        assert_eq!(context.challenge_site_key, "0x4AAAAAAAsimulated_key");
        assert!(context.router_state_token.starts_with("%5B"));
    }
}
