//! `mirrorsync trigger`: start detached sync jobs from the command line.

use anyhow::{bail, Context, Result};
use clap::Args;

use mirrorsync_core::MirrorName;
use mirrorsync_daemon::{spawn, SpawnOptions};

use crate::GlobalArgs;

/// Arguments for `mirrorsync trigger`.
#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// Mirrors to start a job for; one job each.
    #[arg(required = true)]
    pub mirrors: Vec<String>,
}

impl TriggerArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let (path, config) = global.load()?;

        let unknown: Vec<&str> = self
            .mirrors
            .iter()
            .filter(|m| config.mirror(m).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            bail!("unknown mirror(s): {}", unknown.join(", "));
        }

        let opts = SpawnOptions::for_current_exe(&config.global, path, global.verbose)
            .context("cannot prepare worker command")?;
        for mirror in self.mirrors {
            let name = MirrorName::from(mirror);
            let pid = spawn(&opts, std::slice::from_ref(&name))
                .with_context(|| format!("failed to start job for '{name}'"))?;
            println!("started job for '{name}' (pid {pid})");
        }
        Ok(())
    }
}
