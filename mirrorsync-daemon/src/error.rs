use std::path::PathBuf;

use thiserror::Error;

/// Error surface for listeners, the job spawner and the trigger codec.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("configuration error: {0}")]
    Config(#[from] mirrorsync_core::ConfigError),

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no listen address configured (global.listen)")]
    NoListenAddress,

    #[error("no fifo configured (global.fifo)")]
    NoFifo,

    #[error("{path} exists and is not a named pipe")]
    NotAFifo { path: PathBuf },
}

/// Errors from process lifecycle management.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another instance is already running (pid {pid}, marker {path})")]
    AlreadyRunning { pid: i32, path: PathBuf },

    #[error("{call} failed: {source}")]
    Sys {
        call: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("cannot re-exec {program}: {source}")]
    Exec {
        program: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("argument contains an interior NUL byte: {0:?}")]
    NulArgument(String),
}

/// Errors decoding a trigger message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed trigger: expected `<mirror> <secret>`, got {tokens} token(s)")]
    Malformed { tokens: usize },

    #[error("trigger is not valid UTF-8")]
    NotUtf8,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn lifecycle_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LifecycleError {
    LifecycleError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn sys_err(call: &'static str) -> impl FnOnce(nix::Error) -> LifecycleError {
    move |source| LifecycleError::Sys { call, source }
}
