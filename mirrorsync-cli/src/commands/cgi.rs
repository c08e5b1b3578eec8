//! `mirrorsync cgi`: one-shot trigger behind a web server.

use anyhow::{Context, Result};
use clap::Args;

use mirrorsync_daemon::{
    oneshot::{self, PATH_INFO, REMOTE_ADDR},
    Dispatcher, SpawnLauncher, SpawnOptions,
};

use crate::GlobalArgs;

/// Arguments for `mirrorsync cgi`.
#[derive(Args, Debug)]
pub struct CgiArgs {}

impl CgiArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let (path, config) = global.load()?;
        let opts = SpawnOptions::for_current_exe(&config.global, path, global.verbose)
            .context("cannot prepare worker command")?;

        let path_info = std::env::var(PATH_INFO).ok();
        let remote_addr = std::env::var(REMOTE_ADDR).ok();
        let dispatcher = Dispatcher::new(config, SpawnLauncher::new(opts));

        let response = oneshot::handle(&dispatcher, path_info.as_deref(), remote_addr.as_deref());
        print!("{response}");
        Ok(())
    }
}
