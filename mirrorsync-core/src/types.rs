//! Configuration types for mirrorsync.
//!
//! All path fields use `PathBuf`. Every struct denies unknown keys so a typo
//! in the configuration file is a startup fault rather than a silently
//! ignored setting.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::access::AllowList;
use crate::error::ConfigError;

/// Name of the per-mirror lock artifact inside the working copy.
pub const LOCK_FILE: &str = ".update-lock";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a configured mirror.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MirrorName(pub String);

impl fmt::Display for MirrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for MirrorName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MirrorName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Process-wide settings (`global:` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Shared secret every trigger must present.
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,
    /// `host:port` for the socket listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    /// Named pipe for the pipe listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fifo: Option<PathBuf>,
    #[serde(default = "AllowList::allow_all")]
    pub allow: AllowList,
    /// Extra directory appended to `PATH` for spawned jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl GlobalConfig {
    /// Resolve `listen` into a socket address. `Ok(None)` when unset.
    pub fn listen_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        let Some(value) = self.listen.as_deref() else {
            return Ok(None);
        };
        let invalid = |reason: String| ConfigError::InvalidListen {
            value: value.to_string(),
            reason,
        };
        let mut addrs = value.to_socket_addrs().map_err(|e| invalid(e.to_string()))?;
        addrs
            .next()
            .map(Some)
            .ok_or_else(|| invalid("address resolved to nothing".to_string()))
    }
}

/// One mirror (`mirrors.<name>:` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    /// Local working copy.
    pub path: PathBuf,
    /// Push destinations, in push order. The first one also seeds fast clones.
    pub remotes: Vec<String>,
    /// SSH private key loaded into the job's agent before syncing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub remap_tags: Vec<bool>,
    #[serde(default)]
    pub regenerate_server_info: Vec<bool>,
    /// Arguments for `git svn init`.
    #[serde(default)]
    pub init_args: Vec<String>,
    /// Arguments for the full `git svn fetch` of the clone fallback.
    #[serde(default)]
    pub fetch_args: Vec<String>,
}

/// A push destination with its per-destination flags resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination<'a> {
    pub url: &'a str,
    pub remap_tags: bool,
    pub regenerate_server_info: bool,
}

impl MirrorConfig {
    /// Destinations in configured order. Missing flag entries default to `false`.
    pub fn destinations(&self) -> impl Iterator<Item = Destination<'_>> {
        self.remotes.iter().enumerate().map(|(i, url)| Destination {
            url,
            remap_tags: flag(&self.remap_tags, i),
            regenerate_server_info: flag(&self.regenerate_server_info, i),
        })
    }

    /// `<path>/.update-lock`
    pub fn lock_path(&self) -> PathBuf {
        self.path.join(LOCK_FILE)
    }

    fn validate(&self, name: &MirrorName) -> Result<(), ConfigError> {
        if self.remotes.is_empty() {
            return Err(ConfigError::NoRemotes {
                mirror: name.0.clone(),
            });
        }
        for (field, flags) in [
            ("remap_tags", &self.remap_tags),
            ("regenerate_server_info", &self.regenerate_server_info),
        ] {
            if flags.len() > self.remotes.len() {
                return Err(ConfigError::TooManyFlags {
                    mirror: name.0.clone(),
                    field,
                    flags: flags.len(),
                    remotes: self.remotes.len(),
                });
            }
        }
        Ok(())
    }
}

fn flag(flags: &[bool], index: usize) -> bool {
    flags.get(index).copied().unwrap_or(false)
}

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub mirrors: BTreeMap<MirrorName, MirrorConfig>,
}

impl Config {
    /// Look up a mirror by name.
    pub fn mirror(&self, name: &str) -> Option<&MirrorConfig> {
        self.mirrors.get(&MirrorName::from(name))
    }

    /// Check the invariants serde cannot express. Fails on the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        self.global.listen_addr()?;

        let mut seen: BTreeMap<&Path, &MirrorName> = BTreeMap::new();
        for (name, mirror) in &self.mirrors {
            mirror.validate(name)?;
            if let Some(first) = seen.insert(mirror.path.as_path(), name) {
                return Err(ConfigError::DuplicatePath {
                    path: mirror.path.clone(),
                    first: first.0.clone(),
                    second: name.0.clone(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
