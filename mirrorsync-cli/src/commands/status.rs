//! `mirrorsync status`: working copy and lock state per mirror.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use mirrorsync_core::{Config, MirrorConfig, MirrorName};
use mirrorsync_sync::lock::{read_holder, LockHolder};

use crate::GlobalArgs;

/// Arguments for `mirrorsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let (_, config) = global.load()?;
        let rows = build_report(&config)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum LockState {
    Free,
    Held,
    Stale,
}

#[derive(Debug, Clone, Serialize)]
struct MirrorStatus {
    name: String,
    path: String,
    cloned: bool,
    lock: LockState,
    #[serde(skip_serializing_if = "Option::is_none")]
    holder_pid: Option<i32>,
    remotes: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "mirror")]
    name: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "working copy")]
    cloned: String,
    #[tabled(rename = "lock")]
    lock: String,
    #[tabled(rename = "remotes")]
    remotes: usize,
}

fn build_report(config: &Config) -> Result<Vec<MirrorStatus>> {
    config
        .mirrors
        .iter()
        .map(|(name, mirror)| mirror_status(name, mirror))
        .collect()
}

fn mirror_status(name: &MirrorName, mirror: &MirrorConfig) -> Result<MirrorStatus> {
    let holder = read_holder(&mirror.lock_path())
        .with_context(|| format!("cannot inspect lock for '{name}'"))?;
    let (lock, holder_pid) = match holder {
        None => (LockState::Free, None),
        Some(holder) => {
            let pid = match holder {
                LockHolder::Pid(pid) => Some(pid),
                LockHolder::Unreadable(_) => None,
            };
            let state = if holder.is_alive() {
                LockState::Held
            } else {
                LockState::Stale
            };
            (state, pid)
        }
    };

    Ok(MirrorStatus {
        name: name.0.clone(),
        path: mirror.path.display().to_string(),
        cloned: mirror.path.join(".git").exists(),
        lock,
        holder_pid,
        remotes: mirror.remotes.len(),
    })
}

fn print_table(rows: Vec<MirrorStatus>) {
    println!(
        "mirrorsync v{} | {} mirrors | {} syncing",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        rows.iter().filter(|r| r.lock == LockState::Held).count(),
    );
    if rows.is_empty() {
        println!("No mirrors configured.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            cloned: if row.cloned {
                "cloned".green().to_string()
            } else {
                "missing".bright_black().to_string()
            },
            lock: lock_label(row.lock, row.holder_pid),
            name: row.name,
            path: row.path,
            remotes: row.remotes,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn lock_label(state: LockState, pid: Option<i32>) -> String {
    match (state, pid) {
        (LockState::Free, _) => "free".green().to_string(),
        (LockState::Held, Some(pid)) => format!("syncing (pid {pid})").yellow().to_string(),
        (LockState::Held, None) => "syncing".yellow().to_string(),
        (LockState::Stale, Some(pid)) => format!("stale (pid {pid})").red().to_string(),
        (LockState::Stale, None) => "stale".red().to_string(),
    }
}
