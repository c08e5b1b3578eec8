//! Error types for mirrorsync-sync.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the filesystem lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `release` called more often than `acquire`. Always a programming error.
    #[error("lock {path} released more times than it was acquired")]
    InvalidNesting { path: PathBuf },
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external program could not be started at all.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The external program ran and exited non-zero.
    #[error("`{command}` failed ({}): {output}", describe_status(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("unknown mirror '{0}'")]
    UnknownMirror(String),

    #[error("mirror '{0}' has no remotes")]
    NoRemotes(String),
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit {code}"),
        None => "killed by signal".to_string(),
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`LockError::Io`].
pub(crate) fn lock_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.into(),
        source,
    }
}
