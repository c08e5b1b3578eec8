//! Trigger listeners, detached job spawning and listener process lifecycle.

#![deny(unsafe_code)]

mod error;
pub mod lifecycle;
pub mod listener;
pub mod protocol;
pub mod spawner;

pub use error::{DaemonError, LifecycleError, ProtocolError};
pub use lifecycle::{
    check_single_instance, cleanup_actions, daemonize, perform, set_child_reaping, ChildReaping,
    CleanupAction, PidMarker, ProcessContext, Role, ServiceState,
};
pub use listener::{
    oneshot, Dispatcher, JobLauncher, ListenerKind, Outcome, ServeOptions, SpawnLauncher,
};
pub use protocol::Trigger;
pub use spawner::{spawn, JobCommand, SpawnOptions};
