//! Filesystem instance lock.
//!
//! The lock artifact is a symbolic link whose target is the owner's pid in
//! decimal. `symlink(2)` either creates it or fails with `EEXIST`, which
//! makes creation the atomic test-and-set between unrelated processes.
//!
//! A marker naming a dead process is abandoned. Declaring it abandoned and
//! deleting it happens under a secondary lock `<name>.lock`, so two waiters
//! cannot both decide the marker is stale and then delete each other's fresh
//! marker.
//!
//! Handles are re-entrant: nested `acquire`/`release` on the same handle only
//! move a counter; the artifact is removed when the counter returns to zero.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::error::{lock_io_err, LockError};

/// Delay between attempts while another live process holds the lock.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What a lock marker on disk says about its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockHolder {
    Pid(i32),
    /// Target is not a pid, or the artifact is not a symlink at all.
    Unreadable(String),
}

impl LockHolder {
    pub fn is_alive(&self) -> bool {
        match self {
            LockHolder::Pid(pid) => pid_alive(*pid),
            LockHolder::Unreadable(_) => false,
        }
    }
}

/// `kill(pid, 0)`: the process exists if the probe succeeds or is merely
/// not permitted.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

/// Read the marker at `path`. `Ok(None)` when no marker exists.
pub fn read_holder(path: &Path) -> Result<Option<LockHolder>, LockError> {
    match fs::read_link(path) {
        Ok(target) => {
            let text = target.to_string_lossy().into_owned();
            Ok(Some(match text.trim().parse::<i32>() {
                Ok(pid) => LockHolder::Pid(pid),
                Err(_) => LockHolder::Unreadable(text),
            }))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        // EINVAL: something other than a symlink sits at the lock path.
        Err(err) if err.raw_os_error() == Some(Errno::EINVAL as i32) => {
            Ok(Some(LockHolder::Unreadable("<not a symlink>".to_string())))
        }
        Err(err) => Err(lock_io_err(path, err)),
    }
}

/// A named, re-entrant, cross-process lock.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    pid: i32,
    depth: u32,
    poll: Duration,
    // The secondary `<name>.lock` is a leaf: it clears its own stale marker
    // directly instead of taking yet another lock.
    leaf: bool,
}

impl InstanceLock {
    /// Lock at `path`, owned by the current process.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_owner(path, std::process::id() as i32)
    }

    /// Lock at `path` recorded under an explicit pid.
    pub fn with_owner(path: impl Into<PathBuf>, pid: i32) -> Self {
        Self {
            path: path.into(),
            pid,
            depth: 0,
            poll: POLL_INTERVAL,
            leaf: false,
        }
    }

    pub fn poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.depth > 0
    }

    /// `<name>.lock`, serializing stale-marker removal.
    pub fn sublock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock. With `block == false` returns `Ok(false)` instead of
    /// waiting when another live process holds it.
    pub fn acquire(&mut self, block: bool) -> Result<bool, LockError> {
        if self.depth > 0 {
            self.depth += 1;
            return Ok(true);
        }

        loop {
            if !self.clear_if_abandoned(block)? {
                return Ok(false);
            }

            match std::os::unix::fs::symlink(self.pid.to_string(), &self.path) {
                Ok(()) => {
                    self.depth = 1;
                    tracing::debug!(lock = %self.path.display(), pid = self.pid, "lock acquired");
                    return Ok(true);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if !block {
                        return Ok(false);
                    }
                    tracing::trace!(lock = %self.path.display(), "lock busy, waiting");
                    thread::sleep(self.poll);
                }
                Err(err) => return Err(lock_io_err(&self.path, err)),
            }
        }
    }

    /// Undo one `acquire`. The marker is removed when the count reaches zero
    /// and only if it still names this owner.
    pub fn release(&mut self) -> Result<(), LockError> {
        if self.depth == 0 {
            return Err(LockError::InvalidNesting {
                path: self.path.clone(),
            });
        }
        self.depth -= 1;
        if self.depth > 0 {
            return Ok(());
        }

        if read_holder(&self.path)? == Some(LockHolder::Pid(self.pid)) {
            remove_marker(&self.path)?;
            tracing::debug!(lock = %self.path.display(), pid = self.pid, "lock released");
        } else {
            tracing::warn!(lock = %self.path.display(), pid = self.pid, "lock marker no longer ours; leaving it");
        }
        Ok(())
    }

    /// Blocking acquire returning a guard that releases on drop.
    pub fn guard(&mut self) -> Result<LockGuard<'_>, LockError> {
        self.acquire(true)?;
        Ok(LockGuard { lock: self })
    }

    /// Remove the marker if its owner is dead. `Ok(false)` only when
    /// `block == false` and another process is already clearing it.
    fn clear_if_abandoned(&self, block: bool) -> Result<bool, LockError> {
        let Some(holder) = read_holder(&self.path)? else {
            return Ok(true);
        };
        if holder.is_alive() {
            return Ok(true);
        }

        if self.leaf {
            self.remove_if_unchanged(&holder)?;
            return Ok(true);
        }

        let mut sub = InstanceLock {
            path: self.sublock_path(),
            pid: self.pid,
            depth: 0,
            poll: self.poll,
            leaf: true,
        };
        if !sub.acquire(block)? {
            tracing::trace!(lock = %sub.path.display(), "stale marker being cleared elsewhere");
            return Ok(false);
        }
        let result = self.remove_if_unchanged(&holder);
        sub.release()?;
        result.map(|()| true)
    }

    fn remove_if_unchanged(&self, stale: &LockHolder) -> Result<(), LockError> {
        if read_holder(&self.path)?.as_ref() != Some(stale) {
            return Ok(());
        }
        tracing::warn!(lock = %self.path.display(), holder = ?stale, "removing abandoned lock");
        remove_marker(&self.path)
    }
}

fn remove_marker(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(lock_io_err(path, err)),
    }
}

/// Releases its lock when dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a mut InstanceLock,
}

impl LockGuard<'_> {
    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            tracing::error!(error = %err, "failed to release lock");
        }
    }
}
