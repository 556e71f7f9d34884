// Workflow Module - per-attempt stage machine and the worker loop
//
// Collaborators are injected through the traits in `traits`, so every stage
// can be exercised against scripted fakes.

pub mod types;
pub mod traits;
pub mod policy;
pub mod engine;
pub mod worker;

#[cfg(test)]
pub mod mocks;


pub use engine::{AttemptEngine, AttemptScope, RunShared};
pub use policy::{PollPolicy, WorkflowPolicy};
pub use traits::{
    Bootstrapper, ChallengeSolver, CollaboratorFactory, Collaborators, CredentialChannel,
    PostSuccessAction, ResourceProvider, VerificationChannel, WorkflowSubmitter,
};
pub use types::{
    ActionReport, AttemptClaim, AttemptOutcome, AttemptReport, ChallengePoll, ErrorKind,
    ResourceId, RuntimeContext, SessionCredential, Stage, StageResult, StopReason, TaskId,
};
pub use worker::{Worker, WorkerStats};
