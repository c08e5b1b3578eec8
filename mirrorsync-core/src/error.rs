//! Error types for mirrorsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading the configuration file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, including file path and line context from serde_yaml.
    /// Unknown keys and missing required fields surface here.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration file did not exist at the expected path.
    #[error("configuration not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.mirrorsync/`.
    #[error("cannot determine home directory; set $HOME or pass --config")]
    HomeNotFound,

    #[error("global.secret must not be empty")]
    EmptySecret,

    #[error("mirror '{mirror}' has no remotes")]
    NoRemotes { mirror: String },

    #[error("mirror '{mirror}': {field} has {flags} entries but only {remotes} remotes")]
    TooManyFlags {
        mirror: String,
        field: &'static str,
        flags: usize,
        remotes: usize,
    },

    #[error("mirrors '{first}' and '{second}' share the local path {path}")]
    DuplicatePath {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("invalid listen address '{value}': {reason}")]
    InvalidListen { value: String, reason: String },

    #[error("invalid network mask '{0}'")]
    InvalidNetMask(String),
}
