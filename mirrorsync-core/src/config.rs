//! YAML configuration loader.
//!
//! # Location
//!
//! ```text
//! ~/.mirrorsync/
//!   config.yaml     (default; override with --config)
//! ```
//!
//! # API pattern
//!
//! - `fn_at(path: &Path, …)`: explicit location; used in tests with `TempDir`
//! - `fn(…)`: derives the location from `dirs::home_dir()`, delegates to `_at`
//!
//! Every load validates before returning, so callers only ever see a
//! configuration that passed [`Config::validate`].

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::Config;

pub const CONFIG_FILE: &str = "config.yaml";

/// `<home>/.mirrorsync/config.yaml`. Pure, no I/O.
pub fn default_path_at(home: &Path) -> PathBuf {
    home.join(".mirrorsync").join(CONFIG_FILE)
}

/// `default_path_at` convenience wrapper.
pub fn default_path() -> Result<PathBuf, ConfigError> {
    Ok(default_path_at(&home()?))
}

/// Parse and validate configuration text. `origin` is only used in errors.
pub fn parse_str(contents: &str, origin: &Path) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: origin.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the configuration at `path`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML or an
/// unknown/missing key.
pub fn load_at(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_str(&contents, path)
}

/// Load from `explicit` when given, otherwise from the default location.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    match explicit {
        Some(path) => load_at(path),
        None => load_at(&default_path()?),
    }
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    const MINIMAL: &str = "\
global:
  secret: s3cret
mirrors:
  myrepo:
    path: /srv/mirrors/myrepo
    remotes: [/srv/git/myrepo.git]
";

    #[test]
    fn default_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(default_path_at(home.path()).ends_with(".mirrorsync/config.yaml"));
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_str(MINIMAL, Path::new("inline")).expect("parse");
        let mirror = cfg.mirror("myrepo").expect("mirror");
        assert!(mirror.key.is_none());
        assert!(mirror.remap_tags.is_empty());
        assert!(cfg.global.log_file.is_none());
        assert!(cfg.global.allow.permits(Some(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)))));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let text = MINIMAL.replace("secret: s3cret", "secret: s3cret\n  colour: blue");
        let err = parse_str(&text, Path::new("inline")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    }

    #[test]
    fn missing_secret_is_rejected() {
        let text = "global: {}\nmirrors: {}\n";
        assert!(matches!(
            parse_str(text, Path::new("inline")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn bad_allow_entry_is_rejected() {
        let text = "global:\n  secret: x\n  allow: [10.0.0.0/40]\n";
        assert!(matches!(
            parse_str(text, Path::new("inline")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn load_missing_file_returns_not_found() {
        let home = TempDir::new().expect("tempdir");
        let err = load_at(&default_path_at(home.path())).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }
}
