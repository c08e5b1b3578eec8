//! mirrorsync core library: typed configuration, loader, and the access guard.
//!
//! - [`types`]: newtypes and configuration structs
//! - [`config`]: load / validate the YAML configuration file
//! - [`access`]: shared-secret and network allow-list checks
//! - [`error`]: [`ConfigError`]

#![deny(unsafe_code)]

pub mod access;
pub mod config;
pub mod error;
pub mod types;

pub use access::{authorize, AllowList, Decision, NetMask};
pub use error::ConfigError;
pub use types::{Config, Destination, GlobalConfig, MirrorConfig, MirrorName, LOCK_FILE};
