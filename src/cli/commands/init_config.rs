use super::Command;
use crate::config::RunnerSettings;
use anyhow::{anyhow, Result};
use std::path::PathBuf;

/// Writes the default settings as TOML. Refuses to overwrite without `--force`.
pub struct InitConfigCommand {
    pub path: PathBuf,
    pub force: bool,
}

impl InitConfigCommand {
    pub fn new(path: PathBuf, force: bool) -> Self {
        Self { path, force }
    }
}

impl Command for InitConfigCommand {
    async fn execute(&self) -> Result<()> {
        if self.path.exists() && !self.force {
            return Err(anyhow!(
                "{} already exists. Use --force to overwrite it.",
                self.path.display()
            ));
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        RunnerSettings::default().save_to_file(&self.path)?;
        println!("✅ Wrote default settings to {}", self.path.display());
        println!("   Environment variables (ATTEMPT_RUNNER__<SECTION>__<KEY>) override file values.");
        Ok(())
    }
}
