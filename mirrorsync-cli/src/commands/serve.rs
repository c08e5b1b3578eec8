//! `mirrorsync serve`: persistent socket or named-pipe listener.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use mirrorsync_daemon::{listener, ListenerKind, ServeOptions, SpawnOptions};

use crate::GlobalArgs;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Transport {
    /// TCP listener on `global.listen`.
    Socket,
    /// Named pipe at `global.fifo`.
    Pipe,
}

/// Arguments for `mirrorsync serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(value_enum)]
    pub transport: Transport,

    /// Stay attached to the terminal instead of detaching.
    #[arg(long)]
    pub foreground: bool,
}

impl ServeArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let (path, config) = global.load()?;
        let spawn = SpawnOptions::for_current_exe(&config.global, path, global.verbose)
            .context("cannot prepare worker command")?;
        let kind = match self.transport {
            Transport::Socket => ListenerKind::Socket,
            Transport::Pipe => ListenerKind::Pipe,
        };

        listener::run(
            config,
            ServeOptions {
                kind,
                foreground: self.foreground,
                spawn,
            },
        )
        .context("listener stopped with an error")
    }
}
