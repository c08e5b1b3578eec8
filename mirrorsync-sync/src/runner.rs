//! External command seam.
//!
//! The synchronizer never spawns processes itself; it hands [`VcsCommand`]s
//! to a [`CommandRunner`]. Production uses [`SystemRunner`]; tests script the
//! responses.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::SyncError;

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory the command runs in.
    pub cwd: PathBuf,
}

impl VcsCommand {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `true` when the arguments start with `prefix`.
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a.as_str() == *p)
    }
}

impl fmt::Display for VcsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Exit status plus combined stdout/stderr text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            output: output.into(),
        }
    }

    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            output: output.into(),
        }
    }
}

pub trait CommandRunner {
    /// Run `command` to completion. `Err` only when it could not be started;
    /// a non-zero exit is reported through [`CommandOutput::success`].
    fn run(&self, command: &VcsCommand) -> Result<CommandOutput, SyncError>;
}

/// Runs commands with `std::process::Command`, stdin closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &VcsCommand) -> Result<CommandOutput, SyncError> {
        let output = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SyncError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: text,
        })
    }
}
