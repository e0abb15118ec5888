use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "issuesync")]
#[command(about = "Mirror a remote issue tracker into a local, queryable store", long_about = None)]
pub struct Cli {
    /// Path to the sync configuration file
    #[arg(short, long, default_value = "issuesync.yaml")]
    pub config: PathBuf,

    /// Path to the local issue store
    #[arg(short, long, default_value = ".issuesync/issues.yaml")]
    pub store: PathBuf,

    /// GitHub personal access token (can be set via GITHUB_TOKEN env var)
    #[arg(long)]
    pub github_token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a sync pass for each repository, concurrently
    Sync {
        /// Repositories in owner/repo format
        #[arg(required = true)]
        repos: Vec<String>,

        /// Dry run - reconcile against a copy of the store and discard it
        #[arg(long)]
        dry_run: bool,

        /// Ignore stored cursors and rescan every issue
        #[arg(long)]
        full: bool,
    },

    /// Show what the local store holds
    Status {
        /// Repository in owner/repo format (all repositories if omitted)
        repo: Option<String>,

        /// List every issue
        #[arg(short, long)]
        verbose: bool,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}
