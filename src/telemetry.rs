use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize structured JSON logging on stderr.
/// `RUST_LOG` overrides the `log_level` from settings.
pub fn init_telemetry(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .try_init()?;

    tracing::debug!("attempt-runner telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking the events of one attempt
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one pass through the attempt state machine
pub fn create_attempt_span(worker_id: usize, slot_no: u64, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "attempt",
        worker.id = worker_id,
        attempt.slot = slot_no,
        correlation.id = correlation_id,
    )
}
