//! # mirrorsync-sync
//!
//! Per-mirror locking and the git-svn synchronization state machine.
//!
//! Call [`pipeline::run`] to synchronize one or more configured mirrors, each
//! under its own [`InstanceLock`].

#![deny(unsafe_code)]

pub mod error;
pub mod lock;
pub mod mirror;
pub mod pipeline;
pub mod runner;

pub use error::{LockError, SyncError};
pub use lock::{pid_alive, InstanceLock, LockGuard, LockHolder};
pub use mirror::{MirrorSync, SyncOutcome};
pub use runner::{CommandOutput, CommandRunner, SystemRunner, VcsCommand};
