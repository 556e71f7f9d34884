// Capability interfaces of the external collaborators the engine drives.
// Wire formats and transport live behind these traits.

use crate::errors::CollaboratorError;
use crate::workflow::policy::PollPolicy;
use crate::workflow::types::*;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Disposable resources (e.g. throwaway identities)
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn acquire(&self) -> Result<ResourceId, CollaboratorError>;

    async fn release(&self, resource: &ResourceId) -> Result<bool, CollaboratorError>;
}

/// Delivery of one-time codes to a resource
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CredentialChannel: Send + Sync {
    /// Ask the remote side to send a fresh code. Best effort: the answer
    /// is only logged.
    async fn request_code(&self, resource: &ResourceId) -> Result<bool, CollaboratorError>;

    /// Poll up to `policy.polls_per_round` times, `policy.poll_interval`
    /// apart, for a code not contained in `excluded`.
    async fn poll_code(
        &self,
        resource: &ResourceId,
        policy: &PollPolicy,
        excluded: &HashSet<String>,
    ) -> Result<Option<String>, CollaboratorError>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait VerificationChannel: Send + Sync {
    async fn verify(&self, resource: &ResourceId, code: &str) -> Result<bool, CollaboratorError>;
}

/// Interactive challenge solving, poll based
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn create_task(&self, context: &RuntimeContext) -> Result<TaskId, CollaboratorError>;

    async fn poll_result(&self, task: &TaskId) -> Result<ChallengePoll, CollaboratorError>;
}

/// Final workflow submission.
///
/// The returned `StageResult` carries `keys::CODE_INVALID` when the remote
/// side rejected the code and `keys::SESSION_CREDENTIAL` on success.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait WorkflowSubmitter: Send + Sync {
    async fn submit(
        &self,
        resource: &ResourceId,
        code: &str,
        challenge_token: &str,
        context: &RuntimeContext,
    ) -> Result<StageResult, CollaboratorError>;
}

/// Best-effort side effect run after a successful submission
#[async_trait]
pub trait PostSuccessAction: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, session: &SessionCredential) -> ActionReport;
}

/// One-time resolution of run-scoped parameters
#[async_trait]
pub trait Bootstrapper: Send + Sync {
    async fn resolve(&self) -> Result<RuntimeContext, CollaboratorError>;
}

/// The collaborator set one worker drives
#[derive(Clone)]
pub struct Collaborators {
    pub resources: Arc<dyn ResourceProvider>,
    pub credentials: Arc<dyn CredentialChannel>,
    pub verifier: Arc<dyn VerificationChannel>,
    pub solver: Arc<dyn ChallengeSolver>,
    pub submitter: Arc<dyn WorkflowSubmitter>,
    pub post_success: Vec<Arc<dyn PostSuccessAction>>,
}

/// Builds the collaborators for each worker. A failure ends only that worker.
///
/// `proxy` is the run's resolved proxy URL; collaborators that talk to
/// remote services route through it.
pub trait CollaboratorFactory: Send + Sync {
    fn build(&self, worker_id: usize, proxy: Option<&str>) -> Result<Collaborators, CollaboratorError>;
}

/// Shared collaborators: every worker gets the same set
impl CollaboratorFactory for Collaborators {
    fn build(&self, _worker_id: usize, _proxy: Option<&str>) -> Result<Collaborators, CollaboratorError> {
        Ok(self.clone())
    }
}
