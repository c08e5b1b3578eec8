//! Process lifecycle for the persistent listeners.
//!
//! Startup order: [`check_single_instance`], [`daemonize`] (unless running in
//! the foreground), [`PidMarker::create`], [`set_child_reaping`]. Signals
//! arriving afterwards are mapped to a [`ServiceState`]; [`cleanup_actions`]
//! turns that state into the work to do before leaving and [`perform`] does
//! it.
//!
//! Fork must happen before any async runtime exists, while the process is
//! still single-threaded.

use std::ffi::{CString, OsString};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::libc;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{self, ForkResult};
use tokio::signal::unix::{signal as unix_signal, Signal as SignalStream, SignalKind};

use crate::error::{lifecycle_io_err, sys_err, LifecycleError};

const DEV_NULL: &str = "/dev/null";

/// Which side of the first fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The original process. It should exit without cleanup.
    Parent,
    /// The detached daemon.
    Child,
}

/// Detach from the controlling terminal with the double-fork pattern.
///
/// The log file is opened before forking so an unwritable path fails in the
/// foreground. The daemon's stdin reads `/dev/null`; stdout and stderr append
/// to the log file, or go to `/dev/null` when none is configured. The working
/// directory is left unchanged since configured paths may be relative.
#[allow(unsafe_code)]
pub fn daemonize(log_file: Option<&Path>) -> Result<Role, LifecycleError> {
    let log = open_log(log_file)?;
    let null = File::open(DEV_NULL).map_err(|e| lifecycle_io_err(DEV_NULL, e))?;

    // SAFETY: called before any runtime or helper thread is started, so the
    // process is single-threaded here.
    match unsafe { unistd::fork() }.map_err(sys_err("fork"))? {
        ForkResult::Parent { .. } => return Ok(Role::Parent),
        ForkResult::Child => {}
    }

    unistd::setsid().map_err(sys_err("setsid"))?;

    // SAFETY: still single-threaded; we are the first fork's only thread.
    match unsafe { unistd::fork() }.map_err(sys_err("fork"))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    unistd::dup2(null.as_raw_fd(), libc::STDIN_FILENO).map_err(sys_err("dup2"))?;
    unistd::dup2(log.as_raw_fd(), libc::STDOUT_FILENO).map_err(sys_err("dup2"))?;
    unistd::dup2(log.as_raw_fd(), libc::STDERR_FILENO).map_err(sys_err("dup2"))?;
    Ok(Role::Child)
}

/// Open `path` for appending, or `/dev/null` for writing when `None`.
pub fn open_log(path: Option<&Path>) -> Result<File, LifecycleError> {
    let path = path.unwrap_or(Path::new(DEV_NULL));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| lifecycle_io_err(path, e))
}

/// PID marker file holding the listener's pid in decimal.
#[derive(Debug)]
pub struct PidMarker {
    path: PathBuf,
}

impl PidMarker {
    /// Write the current pid to `path`. A failure is logged and yields
    /// `None`: the listener then runs without single-instance protection.
    pub fn create(path: &Path) -> Option<Self> {
        match fs::write(path, format!("{}\n", std::process::id())) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "pid marker written");
                Some(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot write pid marker");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Pid recorded in the marker at `path`, if it holds one.
pub fn read_pid(path: &Path) -> Result<Option<i32>, LifecycleError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text.trim().parse().ok()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(lifecycle_io_err(path, err)),
    }
}

/// Refuse to start while the marker names a live process other than us.
/// Dead or unparseable markers are ignored and overwritten later.
pub fn check_single_instance(path: &Path) -> Result<(), LifecycleError> {
    let Some(pid) = read_pid(path)? else {
        return Ok(());
    };
    let own = std::process::id() as i32;
    if pid != own && mirrorsync_sync::pid_alive(pid) {
        return Err(LifecycleError::AlreadyRunning {
            pid,
            path: path.to_path_buf(),
        });
    }
    tracing::debug!(pid, path = %path.display(), "ignoring stale pid marker");
    Ok(())
}

/// Everything signal handling needs, captured once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    pub pid_marker: Option<PathBuf>,
    pub program: PathBuf,
    /// Full argv, including argv\[0\].
    pub args: Vec<OsString>,
}

impl ProcessContext {
    pub fn capture(pid_marker: Option<PathBuf>) -> Result<Self, LifecycleError> {
        let program =
            std::env::current_exe().map_err(|e| lifecycle_io_err("/proc/self/exe", e))?;
        Ok(Self {
            pid_marker,
            program,
            args: std::env::args_os().collect(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Serving,
    ShuttingDown,
    Restarting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    RemovePidMarker(PathBuf),
    /// Replace the process image in place; no fork.
    ReExec {
        program: PathBuf,
        args: Vec<OsString>,
    },
}

pub fn cleanup_actions(state: ServiceState, ctx: &ProcessContext) -> Vec<CleanupAction> {
    let mut actions = Vec::new();
    if state == ServiceState::Serving {
        return actions;
    }
    if let Some(marker) = &ctx.pid_marker {
        actions.push(CleanupAction::RemovePidMarker(marker.clone()));
    }
    if state == ServiceState::Restarting {
        actions.push(CleanupAction::ReExec {
            program: ctx.program.clone(),
            args: ctx.args.clone(),
        });
    }
    actions
}

/// Run `actions` in order. Returns only if no re-exec was requested or the
/// re-exec failed.
pub fn perform(actions: Vec<CleanupAction>) -> Result<(), LifecycleError> {
    for action in actions {
        match action {
            CleanupAction::RemovePidMarker(path) => match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "pid marker removed"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cannot remove pid marker")
                }
            },
            CleanupAction::ReExec { program, args } => {
                tracing::info!(program = %program.display(), "restarting");
                let c_program = to_cstring(program.as_os_str())?;
                let c_args = args
                    .iter()
                    .map(|a| to_cstring(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let err = match unistd::execv(&c_program, &c_args) {
                    Ok(never) => match never {},
                    Err(err) => err,
                };
                return Err(LifecycleError::Exec {
                    program,
                    source: err,
                });
            }
        }
    }
    Ok(())
}

fn to_cstring(value: &std::ffi::OsStr) -> Result<CString, LifecycleError> {
    CString::new(value.as_bytes())
        .map_err(|_| LifecycleError::NulArgument(value.to_string_lossy().into_owned()))
}

/// `SIGCHLD` disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildReaping {
    /// Ignore `SIGCHLD`; the kernel reaps exited children.
    AutoReap,
    Default,
}

#[allow(unsafe_code)]
pub fn set_child_reaping(mode: ChildReaping) -> Result<(), LifecycleError> {
    let handler = match mode {
        ChildReaping::AutoReap => SigHandler::SigIgn,
        ChildReaping::Default => SigHandler::SigDfl,
    };
    // SAFETY: installs a disposition, not a handler function.
    unsafe { signal::signal(Signal::SIGCHLD, handler) }.map_err(sys_err("signal"))?;
    Ok(())
}

/// Terminating and restart signals, registered with the tokio reactor.
///
/// Fault signals (`SIGSEGV`, `SIGBUS`, ...) cannot be handled safely in
/// Rust and keep their default action.
pub struct Signals {
    terminate: SignalStream,
    interrupt: SignalStream,
    quit: SignalStream,
    hangup: SignalStream,
}

impl Signals {
    /// Must be called from inside a tokio runtime.
    pub fn register() -> Result<Self, LifecycleError> {
        let register = |kind: SignalKind| {
            unix_signal(kind).map_err(|e| lifecycle_io_err("signal handler", e))
        };
        Ok(Self {
            terminate: register(SignalKind::terminate())?,
            interrupt: register(SignalKind::interrupt())?,
            quit: register(SignalKind::quit())?,
            hangup: register(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal and map it to the state it requests.
    pub async fn next(&mut self) -> ServiceState {
        tokio::select! {
            _ = self.terminate.recv() => {
                tracing::info!("received SIGTERM");
                ServiceState::ShuttingDown
            }
            _ = self.interrupt.recv() => {
                tracing::info!("received SIGINT");
                ServiceState::ShuttingDown
            }
            _ = self.quit.recv() => {
                tracing::info!("received SIGQUIT");
                ServiceState::ShuttingDown
            }
            _ = self.hangup.recv() => {
                tracing::info!("received SIGHUP, restarting");
                ServiceState::Restarting
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(marker: Option<&str>) -> ProcessContext {
        ProcessContext {
            pid_marker: marker.map(PathBuf::from),
            program: PathBuf::from("/usr/bin/mirrorsync"),
            args: vec!["mirrorsync".into(), "serve".into(), "socket".into()],
        }
    }

    #[test]
    fn serving_needs_no_cleanup() {
        assert!(cleanup_actions(ServiceState::Serving, &ctx(Some("/run/m.pid"))).is_empty());
    }

    #[test]
    fn shutdown_removes_marker_only() {
        assert_eq!(
            cleanup_actions(ServiceState::ShuttingDown, &ctx(Some("/run/m.pid"))),
            vec![CleanupAction::RemovePidMarker(PathBuf::from("/run/m.pid"))]
        );
        assert!(cleanup_actions(ServiceState::ShuttingDown, &ctx(None)).is_empty());
    }

    #[test]
    fn restart_removes_marker_then_reexecs_same_argv() {
        let c = ctx(Some("/run/m.pid"));
        let actions = cleanup_actions(ServiceState::Restarting, &c);
        assert_eq!(
            actions,
            vec![
                CleanupAction::RemovePidMarker(PathBuf::from("/run/m.pid")),
                CleanupAction::ReExec {
                    program: c.program.clone(),
                    args: c.args.clone(),
                },
            ]
        );
    }

    #[test]
    fn restart_without_marker_still_reexecs() {
        let actions = cleanup_actions(ServiceState::Restarting, &ctx(None));
        assert!(matches!(actions.as_slice(), [CleanupAction::ReExec { .. }]));
    }

    #[test]
    fn perform_removes_marker_and_tolerates_missing_one() {
        let dir = TempDir::new().expect("tempdir");
        let marker = dir.path().join("m.pid");
        fs::write(&marker, "1\n").expect("write");

        perform(vec![
            CleanupAction::RemovePidMarker(marker.clone()),
            CleanupAction::RemovePidMarker(marker.clone()),
        ])
        .expect("perform");
        assert!(!marker.exists());
    }

    #[test]
    fn pid_marker_round_trips_own_pid() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("m.pid");
        let marker = PidMarker::create(&path).expect("marker");
        assert_eq!(marker.path(), path.as_path());
        assert_eq!(
            read_pid(&path).expect("read"),
            Some(std::process::id() as i32)
        );
        // Our own pid never counts as another instance.
        check_single_instance(&path).expect("own marker");
    }

    #[test]
    fn pid_marker_in_missing_directory_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        assert!(PidMarker::create(&dir.path().join("nope/m.pid")).is_none());
    }

    #[test]
    fn live_foreign_pid_blocks_startup() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("m.pid");
        let mut child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("spawn sleep");
        fs::write(&path, format!("{}\n", child.id())).expect("write");

        let err = check_single_instance(&path).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyRunning { .. }), "got: {err}");

        child.kill().expect("kill");
        child.wait().expect("wait");
    }

    #[test]
    fn dead_or_garbage_marker_is_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("m.pid");

        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let dead = child.id();
        child.wait().expect("wait");
        fs::write(&path, format!("{dead}\n")).expect("write");
        check_single_instance(&path).expect("dead pid");

        fs::write(&path, "not a pid").expect("write");
        check_single_instance(&path).expect("garbage");

        check_single_instance(&dir.path().join("absent.pid")).expect("absent");
    }

    #[test]
    fn open_log_fails_fast_on_unwritable_path() {
        let dir = TempDir::new().expect("tempdir");
        assert!(open_log(Some(&dir.path().join("missing/dir/log"))).is_err());
        assert!(open_log(Some(&dir.path().join("daemon.log"))).is_ok());
        assert!(open_log(None).is_ok());
    }
}
