//! Sync pipeline entrypoint used by the worker command.
//!
//! Each mirror runs under its own lock at `<path>/.update-lock`; a second job
//! for the same mirror waits here until the first one releases it.

use std::fs;

use mirrorsync_core::{Config, MirrorConfig, MirrorName};

use crate::error::{io_err, SyncError};
use crate::lock::InstanceLock;
use crate::mirror::{MirrorSync, SyncOutcome};
use crate::runner::CommandRunner;

/// Scope for a sync pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Every configured mirror, in name order.
    All,
    /// The named mirrors, in the given order.
    Mirrors(Vec<String>),
}

/// Result for one mirror.
#[derive(Debug)]
pub struct MirrorReport {
    pub name: MirrorName,
    pub result: Result<SyncOutcome, SyncError>,
}

impl MirrorReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Synchronize every mirror in `scope`. A failing mirror is reported and
/// does not stop the remaining ones.
pub fn run<R: CommandRunner>(config: &Config, scope: SyncScope, runner: &R) -> Vec<MirrorReport> {
    let names: Vec<MirrorName> = match scope {
        SyncScope::All => config.mirrors.keys().cloned().collect(),
        SyncScope::Mirrors(names) => names.into_iter().map(MirrorName::from).collect(),
    };

    names
        .into_iter()
        .map(|name| {
            let result = match config.mirrors.get(&name) {
                Some(mirror) => sync_one(&name, mirror, runner),
                None => Err(SyncError::UnknownMirror(name.0.clone())),
            };
            if let Err(err) = &result {
                tracing::error!(mirror = %name, error = %err, "mirror sync failed");
            }
            MirrorReport { name, result }
        })
        .collect()
}

/// Take the mirror's lock (blocking) and run the synchronizer under it.
pub fn sync_one<R: CommandRunner>(
    name: &MirrorName,
    mirror: &MirrorConfig,
    runner: &R,
) -> Result<SyncOutcome, SyncError> {
    fs::create_dir_all(&mirror.path).map_err(|e| io_err(&mirror.path, e))?;

    let mut lock = InstanceLock::new(mirror.lock_path());
    let _guard = lock.guard()?;
    tracing::info!(mirror = %name, "starting sync");
    MirrorSync::new(name, mirror, runner).run()
}
