// Attempt Runner Library - concurrent multi-stage attempt orchestration
// This exposes the core components for testing and integration

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod observability;
pub mod output;
pub mod runner;
pub mod shutdown;
pub mod simulation;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use bootstrap::{resolve_asset_url, PageFetcher, PageScraper, ScrapeRules};
pub use config::{compute_effective_max_attempts, resolve_proxy_url, RunConfig, RunOverrides, RunnerSettings};
pub use errors::{CollaboratorError, RunnerError};
pub use events::{EventLevel, EventLog};
pub use ledger::{AttemptLedger, LedgerSnapshot};
pub use observability::{FailureTally, OperationTimer};
pub use output::SuccessSink;
pub use runner::{RunSummary, Runner};
pub use shutdown::ShutdownCoordinator;
pub use simulation::{SimulatedAction, SimulatedBackend, SimulatedPages};
pub use telemetry::{create_attempt_span, generate_correlation_id, init_telemetry};
pub use workflow::{
    ActionReport, AttemptEngine, AttemptOutcome, AttemptReport, Bootstrapper, ChallengePoll, ChallengeSolver,
    CollaboratorFactory, Collaborators, CredentialChannel, ErrorKind, PollPolicy, PostSuccessAction,
    ResourceId, ResourceProvider, RuntimeContext, SessionCredential, Stage, StageResult, StopReason, TaskId,
    VerificationChannel, Worker, WorkflowPolicy, WorkflowSubmitter,
};
