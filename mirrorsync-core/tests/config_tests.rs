//! Configuration loading: error messages, validation, and full-file parsing.

use assert_fs::prelude::*;
use mirrorsync_core::{config, ConfigError, MirrorName};
use predicates::prelude::predicate;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

const FULL: &str = "\
global:
  secret: s3cret
  log_file: /var/log/mirrorsync.log
  pid_file: /run/mirrorsync.pid
  listen: 127.0.0.1:8765
  fifo: /run/mirrorsync.fifo
  allow: [127.0.0.1, 10.0.0.0/8]
  path: /opt/git/bin
mirrors:
  myrepo:
    path: /srv/mirrors/myrepo
    remotes: [git@example.org:myrepo.git, /srv/git/myrepo.git]
    key: /etc/mirrorsync/id_ed25519
    remap_tags: [true]
    regenerate_server_info: [false, true]
    init_args: [--stdlayout, https://svn.example.org/myrepo]
    fetch_args: [--log-window-size=1000]
  other:
    path: /srv/mirrors/other
    remotes: [/srv/git/other.git]
";

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = config::default_path_at(home.path());
    let err = config::load_at(&path).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("configuration not found"));
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = home.child("config.yaml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_unknown_mirror_key_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = home.child("config.yaml");
    file.write_str(&FULL.replace("fetch_args:", "fecth_args:"))
        .expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn load_runs_validation() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = home.child("config.yaml");
    file.write_str(&FULL.replace("/srv/mirrors/other", "/srv/mirrors/myrepo"))
        .expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicatePath { .. }), "got: {err}");
    assert!(err.to_string().contains("myrepo"));
}

// ---------------------------------------------------------------------------
// 2. Full file
// ---------------------------------------------------------------------------

#[test]
fn full_config_loads_every_field() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = home.child(".mirrorsync/config.yaml");
    file.write_str(FULL).expect("write");
    file.assert(predicate::path::exists());

    let cfg = config::load_at(&config::default_path_at(home.path())).expect("load");

    assert_eq!(cfg.global.secret, "s3cret");
    assert_eq!(cfg.global.fifo, Some(PathBuf::from("/run/mirrorsync.fifo")));
    assert_eq!(cfg.global.path, Some(PathBuf::from("/opt/git/bin")));
    let listen = cfg.global.listen_addr().expect("listen").expect("set");
    assert_eq!(listen.port(), 8765);

    assert!(cfg.global.allow.permits(Some(IpAddr::V4(Ipv4Addr::new(10, 9, 8, 7)))));
    assert!(!cfg.global.allow.permits(Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)))));
    assert!(!cfg.global.allow.permits(None));

    let names: Vec<_> = cfg.mirrors.keys().cloned().collect();
    assert_eq!(names, vec![MirrorName::from("myrepo"), MirrorName::from("other")]);

    let myrepo = cfg.mirror("myrepo").expect("myrepo");
    let dests: Vec<_> = myrepo.destinations().collect();
    assert_eq!(dests.len(), 2);
    assert!(dests[0].remap_tags && !dests[0].regenerate_server_info);
    assert!(!dests[1].remap_tags && dests[1].regenerate_server_info);
    assert_eq!(myrepo.init_args[0], "--stdlayout");
}
