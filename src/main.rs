mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("issuesync=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            repos,
            dry_run,
            full,
        } => {
            let token = cli
                .github_token
                .or_else(|| std::env::var("GITHUB_TOKEN").ok())
                .context("GitHub token is required. Set GITHUB_TOKEN env var or use --github-token")?;

            commands::sync(&cli.config, &cli.store, &token, &repos, dry_run, full).await?;
        }

        Commands::Status { repo, verbose } => {
            commands::status(&cli.store, repo.as_deref(), verbose).await?;
        }

        Commands::Init { force } => {
            commands::init(&cli.config, force)?;
        }
    }

    Ok(())
}
