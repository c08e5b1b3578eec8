//! mirrorsync: trigger and serialize git-svn mirror synchronization.
//!
//! # Usage
//!
//! ```text
//! mirrorsync [--config <file>] [-v...] sync <mirror>... | --all
//! mirrorsync trigger <mirror>...
//! mirrorsync serve socket|pipe [--foreground]
//! mirrorsync cgi
//! mirrorsync check
//! mirrorsync status [--json]
//! ```

mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    cgi::CgiArgs, check::CheckArgs, serve::ServeArgs, status::StatusArgs, sync::SyncArgs,
    trigger::TriggerArgs,
};
use mirrorsync_core::{config, Config};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "mirrorsync",
    version,
    about = "Keep git mirrors of Subversion repositories in sync",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file [default: ~/.mirrorsync/config.yaml].
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More log output; repeat for trace level.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl GlobalArgs {
    /// Resolve the configuration path and load it.
    pub fn load(&self) -> Result<(PathBuf, Config)> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => config::default_path().context("cannot locate default configuration")?,
        };
        let loaded = config::load_at(&path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?;
        let path = std::fs::canonicalize(&path).unwrap_or(path);
        tracing::debug!(path = %path.display(), mirrors = loaded.mirrors.len(), "configuration loaded");
        Ok((path, loaded))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synchronize mirrors now, in this process.
    Sync(SyncArgs),

    /// Start detached sync jobs, as a listener would.
    Trigger(TriggerArgs),

    /// Run a persistent trigger listener.
    Serve(ServeArgs),

    /// Answer one CGI request from PATH_INFO and REMOTE_ADDR.
    Cgi(CgiArgs),

    /// Validate the configuration and print a summary.
    Check(CheckArgs),

    /// Show working copy and lock state for every mirror.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    let global = cli.global;
    match cli.command {
        Commands::Sync(args) => args.run(&global),
        Commands::Trigger(args) => args.run(&global),
        Commands::Serve(args) => args.run(&global),
        Commands::Cgi(args) => args.run(&global),
        Commands::Check(args) => args.run(&global),
        Commands::Status(args) => args.run(&global),
    }
}
