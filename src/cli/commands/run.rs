use super::Command;
use crate::bootstrap::{PageScraper, ScrapeRules};
use crate::config::{RunConfig, RunOverrides, RunnerSettings};
use crate::runner::{RunSummary, Runner};
use crate::shutdown::ShutdownCoordinator;
use crate::simulation::{SimulatedBackend, SimulatedPages};
use crate::telemetry::init_telemetry;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RunCommand {
    pub overrides: RunOverrides,
    pub config_path: Option<PathBuf>,
}

impl RunCommand {
    pub fn new(overrides: RunOverrides) -> Self {
        Self {
            overrides,
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self
    }

    fn load_settings(&self) -> Result<RunnerSettings> {
        match &self.config_path {
            Some(path) => RunnerSettings::load_from(path),
            None => RunnerSettings::load(),
        }
    }
}

impl Command for RunCommand {
    async fn execute(&self) -> Result<()> {
        RunnerSettings::load_env_file()?;
        let settings = self.load_settings()?;
        if let Err(e) = init_telemetry(&settings.observability.log_level) {
            eprintln!("⚠️  Telemetry not initialized: {e}");
        }

        let config = RunConfig::resolve(&settings.run, self.overrides.clone());
        let policy = settings.workflow.to_policy();
        info!(
            workers = config.worker_count,
            target = config.target_successes,
            max_attempts = config.max_attempts,
            "run configuration resolved"
        );

        let backend = Arc::new(SimulatedBackend::new(settings.simulation.clone()));
        let landing_url = settings.simulation.landing_url.clone();
        let bootstrapper = PageScraper::new(SimulatedPages::new(&landing_url), ScrapeRules::new(landing_url));

        let runner = Runner::new(config, policy, Arc::new(bootstrapper), Arc::new(backend.collaborators())).await?;
        let signal_task =
            ShutdownCoordinator::new(Arc::clone(runner.ledger()), Arc::clone(runner.event_log())).install_signal_handlers();

        let outcome = runner.run().await;
        signal_task.abort();

        let summary = outcome?;
        print_summary(&summary);
        if !summary.target_reached() {
            warn!(
                successes = summary.successes,
                target = summary.target_successes,
                "run ended below target"
            );
        }
        Ok(())
    }
}

fn print_summary(summary: &RunSummary) {
    println!("📊 Run finished in {:.1}s", summary.elapsed.as_secs_f64());
    println!(
        "   Successes: {}/{}   Attempts: {}/{}",
        summary.successes, summary.target_successes, summary.attempts, summary.max_attempts
    );
    println!(
        "   Stop reason: {}",
        summary.stop_reason.map(|r| r.as_str()).unwrap_or("workers_exhausted")
    );
    for (kind, count) in &summary.failures {
        println!("   ❌ {kind}: {count}");
    }
    println!("   Output:  {}", summary.output_path.display());
    println!("   Metrics: {}", summary.metrics_path.display());
}
