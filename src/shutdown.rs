use crate::events::EventLog;
use crate::ledger::AttemptLedger;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Turns Ctrl-C into an external stop on the ledger. Workers finish or
/// abandon their current attempt and exit on their own.
pub struct ShutdownCoordinator {
    ledger: Arc<AttemptLedger>,
    log: Arc<EventLog>,
}

impl ShutdownCoordinator {
    pub fn new(ledger: Arc<AttemptLedger>, log: Arc<EventLog>) -> Self {
        Self { ledger, log }
    }

    /// Install the signal handler in a background task. Abort the returned
    /// handle once the run is over.
    pub fn install_signal_handlers(self) -> JoinHandle<()> {
        info!("Installing signal handler for graceful shutdown");
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => self.trigger("interrupt received"),
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
        })
    }

    /// Stop the run; the first stop reason recorded by the ledger wins
    pub fn trigger(&self, cause: &str) {
        self.ledger.request_stop();
        self.log.warning(
            "shutdown",
            &format!("{cause}, stopping after in-flight attempts"),
            serde_json::json!({ "stop_reason": self.ledger.stop_reason() }),
        );
    }
}
