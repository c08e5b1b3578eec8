//! Mirror synchronizer: clone-or-fetch, rebase, fan-out push.
//!
//! ## Protocol
//!
//! 1. Load the mirror's SSH key into the running agent (if configured).
//! 2. No `.git` in the working copy: fast clone from the first remote. Any
//!    failure there discards the partial copy and falls back to a full
//!    `git svn fetch`. Both paths mark the run as first-time.
//! 3. `git svn fetch`. No output and not first-time: already current, stop.
//!    Otherwise `git svn rebase --local`.
//! 4. Push to every remote; tag remapping and `update-server-info` are
//!    per-destination.
//!
//! The caller must hold the mirror's lock for the whole run.

use std::fs;
use std::path::Path;

use mirrorsync_core::{Destination, MirrorConfig, MirrorName, LOCK_FILE};

use crate::error::{io_err, SyncError};
use crate::runner::{CommandOutput, CommandRunner, VcsCommand};

const GIT: &str = "git";
const SSH_ADD: &str = "ssh-add";

/// Remote branches mirrored as heads on the destination.
pub const BRANCH_REFSPEC: &str = "refs/remotes/*:refs/heads/*";
/// git-svn tag branches mirrored as real tags.
pub const TAG_REFSPEC: &str = "refs/remotes/tags/*:refs/tags/*";
pub const MASTER_REFSPEC: &str = "+master:master";

const SEED_BRANCH_REFSPEC: &str = "refs/heads/*:refs/remotes/*";
const SEED_TAG_REFSPEC: &str = "refs/tags/*:refs/remotes/tags/*";

/// How a synchronization run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Upstream had nothing new; no push was attempted.
    UpToDate,
    Updated { first_time: bool, pushed: usize },
}

/// One synchronization run for one mirror.
pub struct MirrorSync<'a, R: CommandRunner> {
    name: &'a MirrorName,
    mirror: &'a MirrorConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner> MirrorSync<'a, R> {
    pub fn new(name: &'a MirrorName, mirror: &'a MirrorConfig, runner: &'a R) -> Self {
        Self {
            name,
            mirror,
            runner,
        }
    }

    pub fn run(&self) -> Result<SyncOutcome, SyncError> {
        let workdir = &self.mirror.path;
        fs::create_dir_all(workdir).map_err(|e| io_err(workdir, e))?;

        self.inject_credential()?;

        let mut first_time = false;
        if !self.is_present() {
            tracing::info!(mirror = %self.name, path = %workdir.display(), "no working copy, cloning");
            if let Err(err) = self.fast_clone() {
                tracing::warn!(mirror = %self.name, error = %err, "fast clone failed, falling back to full fetch");
                self.clone_fallback()?;
            }
            first_time = true;
        }

        let fetched = self.git(["svn", "fetch"])?;
        if fetched.output.trim().is_empty() && !first_time {
            tracing::info!(mirror = %self.name, "already up to date");
            return Ok(SyncOutcome::UpToDate);
        }
        self.git(["svn", "rebase", "--local"])?;

        let mut pushed = 0;
        for dest in self.mirror.destinations() {
            self.push(&dest)?;
            pushed += 1;
            if dest.regenerate_server_info {
                self.regenerate_server_info(&dest)?;
            }
        }

        tracing::info!(mirror = %self.name, pushed, first_time, "mirror synchronized");
        Ok(SyncOutcome::Updated { first_time, pushed })
    }

    fn is_present(&self) -> bool {
        self.mirror.path.join(".git").exists()
    }

    fn inject_credential(&self) -> Result<(), SyncError> {
        if let Some(key) = &self.mirror.key {
            let cmd = VcsCommand::new(SSH_ADD, &self.mirror.path).arg(key.to_string_lossy());
            self.checked(&cmd)?;
        }
        Ok(())
    }

    fn fast_clone(&self) -> Result<(), SyncError> {
        let seed = self
            .mirror
            .destinations()
            .next()
            .ok_or_else(|| SyncError::NoRemotes(self.name.0.clone()))?;

        self.git(["init"])?;
        let mut fetch = vec!["fetch", seed.url, SEED_BRANCH_REFSPEC];
        if seed.remap_tags {
            fetch.push(SEED_TAG_REFSPEC);
        }
        self.git(fetch)?;
        self.git_svn_init()?;
        self.git(["checkout", "-B", "master", "refs/remotes/trunk"])?;
        self.git(["svn", "rebase", "--local"])?;
        Ok(())
    }

    fn clone_fallback(&self) -> Result<(), SyncError> {
        discard_working_copy(&self.mirror.path)?;
        self.git(["init"])?;
        self.git_svn_init()?;
        let fetch = VcsCommand::new(GIT, &self.mirror.path)
            .args(["svn", "fetch"])
            .args(self.mirror.fetch_args.iter().cloned());
        self.checked(&fetch)?;
        Ok(())
    }

    fn git_svn_init(&self) -> Result<(), SyncError> {
        let init = VcsCommand::new(GIT, &self.mirror.path)
            .args(["svn", "init"])
            .args(self.mirror.init_args.iter().cloned());
        self.checked(&init).map(|_| ())
    }

    fn push(&self, dest: &Destination<'_>) -> Result<(), SyncError> {
        let cmd = push_command(&self.mirror.path, dest);
        tracing::info!(mirror = %self.name, remote = dest.url, remap_tags = dest.remap_tags, "pushing");
        self.checked(&cmd).map(|_| ())
    }

    /// Runs inside the destination repository; our own working directory is
    /// never changed.
    fn regenerate_server_info(&self, dest: &Destination<'_>) -> Result<(), SyncError> {
        let cmd = VcsCommand::new(GIT, dest.url).arg("update-server-info");
        tracing::debug!(mirror = %self.name, remote = dest.url, "regenerating server info");
        self.checked(&cmd).map(|_| ())
    }

    fn git<I, S>(&self, args: I) -> Result<CommandOutput, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checked(&VcsCommand::new(GIT, &self.mirror.path).args(args))
    }

    fn checked(&self, cmd: &VcsCommand) -> Result<CommandOutput, SyncError> {
        tracing::debug!(mirror = %self.name, command = %cmd, "running");
        let out = self.runner.run(cmd)?;
        if !out.output.trim().is_empty() {
            tracing::debug!(mirror = %self.name, command = %cmd, output = %out.output.trim_end());
        }
        if !out.success {
            return Err(SyncError::CommandFailed {
                command: cmd.to_string(),
                status: out.code,
                output: out.output,
            });
        }
        Ok(out)
    }
}

/// `git push` for one destination. Tags are only pushed where remapped.
pub fn push_command(workdir: &Path, dest: &Destination<'_>) -> VcsCommand {
    let mut cmd = VcsCommand::new(GIT, workdir).args(["push", dest.url]);
    if dest.remap_tags {
        cmd = cmd.arg(TAG_REFSPEC);
    }
    cmd.args([BRANCH_REFSPEC, MASTER_REFSPEC])
}

/// Remove everything in `workdir` except the lock artifacts.
fn discard_working_copy(workdir: &Path) -> Result<(), SyncError> {
    let sublock = format!("{LOCK_FILE}.lock");
    let entries = fs::read_dir(workdir).map_err(|e| io_err(workdir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(workdir, e))?;
        let name = entry.file_name();
        if name == LOCK_FILE || name == sublock.as_str() {
            continue;
        }
        let path = entry.path();
        let ty = entry.file_type().map_err(|e| io_err(&path, e))?;
        let removed = if ty.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| io_err(&path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn push_without_remap_has_no_tag_refspec() {
        let dest = Destination {
            url: "/srv/git/a.git",
            remap_tags: false,
            regenerate_server_info: false,
        };
        let cmd = push_command(Path::new("/srv/m"), &dest);
        assert_eq!(
            cmd.args,
            vec!["push", "/srv/git/a.git", BRANCH_REFSPEC, MASTER_REFSPEC]
        );
    }

    #[test]
    fn push_with_remap_includes_tags() {
        let dest = Destination {
            url: "git@example.org:a.git",
            remap_tags: true,
            regenerate_server_info: false,
        };
        let cmd = push_command(Path::new("/srv/m"), &dest);
        assert_eq!(
            cmd.args,
            vec![
                "push",
                "git@example.org:a.git",
                TAG_REFSPEC,
                BRANCH_REFSPEC,
                MASTER_REFSPEC
            ]
        );
    }

    #[test]
    fn discard_keeps_lock_artifacts() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join(".git/objects")).expect("mkdir");
        fs::write(root.join("README"), "x").expect("write");
        std::os::unix::fs::symlink("123", root.join(LOCK_FILE)).expect("lock");
        std::os::unix::fs::symlink("123", root.join(format!("{LOCK_FILE}.lock"))).expect("sublock");

        discard_working_copy(root).expect("discard");

        assert!(!root.join(".git").exists());
        assert!(!root.join("README").exists());
        assert!(fs::symlink_metadata(root.join(LOCK_FILE)).is_ok());
        assert!(fs::symlink_metadata(root.join(format!("{LOCK_FILE}.lock"))).is_ok());
    }
}
