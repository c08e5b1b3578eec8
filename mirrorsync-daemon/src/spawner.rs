//! Detached worker launch.
//!
//! A job is `ssh-agent <exe> --config <cfg> [-v...] sync <mirror>...`: a
//! fresh agent per job keeps each mirror's key out of every other job. The
//! worker runs in its own session with stdin on `/dev/null` and output
//! appended to the log file. Nobody waits for it.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd;

use mirrorsync_core::{GlobalConfig, MirrorName};

use crate::error::{io_err, DaemonError};
use crate::lifecycle::open_log;

pub const SSH_AGENT: &str = "ssh-agent";

/// How to re-invoke this program as a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Wrapper that runs the worker; `ssh-agent` outside tests.
    pub agent: OsString,
    pub exe: PathBuf,
    pub config_path: PathBuf,
    /// Forwarded as repeated `-v`.
    pub verbosity: u8,
    pub extra_path: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl SpawnOptions {
    /// Options for re-running the current executable with `config_path`.
    pub fn for_current_exe(
        global: &GlobalConfig,
        config_path: PathBuf,
        verbosity: u8,
    ) -> Result<Self, DaemonError> {
        let exe = std::env::current_exe().map_err(|e| io_err("/proc/self/exe", e))?;
        Ok(Self {
            agent: SSH_AGENT.into(),
            exe,
            config_path,
            verbosity,
            extra_path: global.path.clone(),
            log_file: global.log_file.clone(),
        })
    }
}

/// Pure description of one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub extra_path: Option<PathBuf>,
    pub env_remove: Vec<&'static str>,
}

impl JobCommand {
    pub fn build(opts: &SpawnOptions, mirrors: &[MirrorName]) -> Self {
        let mut args: Vec<OsString> = vec![
            opts.exe.clone().into_os_string(),
            "--config".into(),
            opts.config_path.clone().into_os_string(),
        ];
        if opts.verbosity > 0 {
            args.push(format!("-{}", "v".repeat(opts.verbosity as usize)).into());
        }
        args.push("sync".into());
        args.extend(mirrors.iter().map(|m| OsString::from(&m.0)));

        Self {
            program: opts.agent.clone(),
            args,
            extra_path: opts.extra_path.clone(),
            env_remove: vec!["DISPLAY"],
        }
    }

    /// `inherited` with the extra directory appended. `None` when there is
    /// nothing to change.
    pub fn search_path(&self, inherited: Option<&OsStr>) -> Option<OsString> {
        let extra = self.extra_path.as_ref()?;
        let mut dirs: Vec<PathBuf> = inherited
            .map(|p| std::env::split_paths(p).collect())
            .unwrap_or_default();
        dirs.push(extra.clone());
        std::env::join_paths(dirs).ok()
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for key in &self.env_remove {
            cmd.env_remove(key);
        }
        if let Some(path) = self.search_path(std::env::var_os("PATH").as_deref()) {
            cmd.env("PATH", path);
        }
        cmd
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Start a detached worker for `mirrors` and return its pid.
///
/// Only the spawn itself is reported; the worker's result ends up in the log.
#[allow(unsafe_code)]
pub fn spawn(opts: &SpawnOptions, mirrors: &[MirrorName]) -> Result<u32, DaemonError> {
    let job = JobCommand::build(opts, mirrors);
    let mut cmd = job.to_command();

    let stdout = open_log(opts.log_file.as_deref())?;
    let stderr = stdout.try_clone().map_err(|e| {
        io_err(
            opts.log_file.clone().unwrap_or_else(|| PathBuf::from("/dev/null")),
            e,
        )
    })?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    // SAFETY: setsid and sigaction are async-signal-safe.
    unsafe {
        cmd.pre_exec(|| {
            unistd::setsid()?;
            signal::signal(Signal::SIGCHLD, SigHandler::SigDfl)?;
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|source| DaemonError::Spawn {
        command: job.to_string(),
        source,
    })?;
    let pid = child.id();
    tracing::info!(pid, command = %job, "worker started");
    drop(child);
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn opts() -> SpawnOptions {
        SpawnOptions {
            agent: SSH_AGENT.into(),
            exe: PathBuf::from("/usr/bin/mirrorsync"),
            config_path: PathBuf::from("/etc/mirrorsync.yaml"),
            verbosity: 0,
            extra_path: None,
            log_file: None,
        }
    }

    fn rendered(job: &JobCommand) -> Vec<String> {
        job.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn build_wraps_worker_in_agent() {
        let job = JobCommand::build(&opts(), &[MirrorName::from("alpha")]);
        assert_eq!(job.program, OsString::from("ssh-agent"));
        assert_eq!(
            rendered(&job),
            vec![
                "/usr/bin/mirrorsync",
                "--config",
                "/etc/mirrorsync.yaml",
                "sync",
                "alpha"
            ]
        );
        assert_eq!(job.env_remove, vec!["DISPLAY"]);
        assert_eq!(
            job.to_string(),
            "ssh-agent /usr/bin/mirrorsync --config /etc/mirrorsync.yaml sync alpha"
        );
    }

    #[test]
    fn build_forwards_verbosity_and_every_mirror() {
        let o = SpawnOptions {
            verbosity: 2,
            ..opts()
        };
        let job = JobCommand::build(&o, &[MirrorName::from("a"), MirrorName::from("b")]);
        assert_eq!(
            rendered(&job)[3..],
            ["-vv".to_string(), "sync".into(), "a".into(), "b".into()]
        );
    }

    #[test]
    fn search_path_appends_extra_directory() {
        let o = SpawnOptions {
            extra_path: Some(PathBuf::from("/opt/git/bin")),
            ..opts()
        };
        let job = JobCommand::build(&o, &[]);
        assert_eq!(
            job.search_path(Some(OsStr::new("/usr/bin:/bin"))),
            Some(OsString::from("/usr/bin:/bin:/opt/git/bin"))
        );
        assert_eq!(
            job.search_path(None),
            Some(OsString::from("/opt/git/bin"))
        );
        assert_eq!(JobCommand::build(&opts(), &[]).search_path(None), None);
    }

    #[test]
    fn spawn_runs_detached_with_scrubbed_environment() {
        let dir = TempDir::new().expect("tempdir");
        let out = dir.path().join("out");
        let log = dir.path().join("worker.log");
        let script = dir.path().join("worker.sh");
        fs::write(
            &script,
            format!(
                "echo \"$@\" > {out}.tmp\n\
                 echo \"${{DISPLAY:-unset}}\" >> {out}.tmp\n\
                 echo \"$PATH\" >> {out}.tmp\n\
                 echo logged\n\
                 mv {out}.tmp {out}\n",
                out = out.display()
            ),
        )
        .expect("script");

        let o = SpawnOptions {
            agent: "sh".into(),
            exe: script,
            config_path: PathBuf::from("/etc/m.yaml"),
            verbosity: 1,
            extra_path: Some(PathBuf::from("/opt/extra")),
            log_file: Some(log.clone()),
        };
        let pid = spawn(&o, &[MirrorName::from("alpha")]).expect("spawn");
        assert!(pid > 0);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !out.exists() {
            assert!(Instant::now() < deadline, "worker never ran");
            std::thread::sleep(Duration::from_millis(20));
        }
        let text = fs::read_to_string(&out).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "--config /etc/m.yaml -v sync alpha");
        assert_eq!(lines[1], "unset");
        assert!(lines[2].ends_with(":/opt/extra") || lines[2] == "/opt/extra");
        assert!(fs::read_to_string(&log).expect("log").contains("logged"));
    }

    #[test]
    fn missing_agent_is_spawn_error() {
        let o = SpawnOptions {
            agent: "mirrorsync-no-such-agent".into(),
            ..opts()
        };
        let err = spawn(&o, &[MirrorName::from("alpha")]).unwrap_err();
        assert!(matches!(err, DaemonError::Spawn { .. }), "got: {err}");
    }
}
