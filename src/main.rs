use anyhow::Result;
use attempt_runner::cli::commands::init_config::InitConfigCommand;
use attempt_runner::cli::commands::run::RunCommand;
use attempt_runner::cli::commands::Command;
use attempt_runner::cli::{Cli, Commands};
use attempt_runner::config::RunOverrides;
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workers,
            target,
            max_attempts,
            metrics_file,
            output_file,
            keep_success_resource,
            config,
        } => {
            let overrides = RunOverrides {
                workers,
                target,
                max_attempts,
                metrics_file,
                output_file,
                keep_success_resource,
            };
            tokio::runtime::Runtime::new()?.block_on(async {
                RunCommand::new(overrides)
                    .with_config_path(config)
                    .execute()
                    .await
            })
        }
        Commands::InitConfig { path, force } => tokio::runtime::Runtime::new()?.block_on(async {
            InitConfigCommand::new(path, force).execute().await
        }),
    }
}
