//! `mirrorsync sync`: synchronize mirrors in this process.
//!
//! This is also the worker entry point: listeners start
//! `ssh-agent mirrorsync --config <file> sync <mirror>`.

use anyhow::{bail, Result};
use clap::Args;

use mirrorsync_sync::{
    pipeline::{self, MirrorReport, SyncScope},
    SyncOutcome, SystemRunner,
};

use crate::GlobalArgs;

/// Arguments for `mirrorsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Mirrors to synchronize (omit when using `--all`).
    pub mirrors: Vec<String>,

    /// Synchronize every configured mirror.
    #[arg(long, conflicts_with = "mirrors")]
    pub all: bool,
}

impl SyncArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let scope = if self.all {
            SyncScope::All
        } else if self.mirrors.is_empty() {
            bail!("provide at least one mirror name or use --all");
        } else {
            SyncScope::Mirrors(self.mirrors)
        };
        let (_, config) = global.load()?;

        let reports = pipeline::run(&config, scope, &SystemRunner);
        if reports.is_empty() {
            println!("No mirrors configured.");
            return Ok(());
        }
        for report in &reports {
            print_report(report);
        }

        let failed = reports.iter().filter(|r| !r.is_ok()).count();
        if failed > 0 {
            bail!("{failed} of {} mirror(s) failed", reports.len());
        }
        Ok(())
    }
}

fn print_report(report: &MirrorReport) {
    let name = &report.name;
    match &report.result {
        Ok(SyncOutcome::UpToDate) => println!("✓ '{name}' already up to date"),
        Ok(SyncOutcome::Updated { first_time, pushed }) => {
            let how = if *first_time { "cloned" } else { "updated" };
            println!("✓ '{name}' {how}, pushed to {pushed} remote(s)");
        }
        Err(err) => println!("✗ '{name}' failed: {err}"),
    }
}
