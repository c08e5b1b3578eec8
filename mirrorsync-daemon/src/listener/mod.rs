//! Trigger front-ends and the dispatch they share.
//!
//! Every listener decodes a [`Trigger`](crate::protocol::Trigger) and hands
//! it to [`Dispatcher::on_trigger`], which authorizes it and launches a
//! worker through a [`JobLauncher`]. Listeners never wait for the job.

pub mod oneshot;
pub mod pipe;
pub mod socket;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use mirrorsync_core::{access, Config, Decision, MirrorName};

use crate::error::DaemonError;
use crate::lifecycle::{self, ChildReaping, PidMarker, ProcessContext, Role, ServiceState};
use crate::spawner::{self, SpawnOptions};

/// Starts a job for one mirror.
pub trait JobLauncher {
    fn launch(&self, mirror: &MirrorName) -> Result<(), DaemonError>;
}

/// Launches detached `ssh-agent`-wrapped workers.
#[derive(Debug, Clone)]
pub struct SpawnLauncher {
    opts: SpawnOptions,
}

impl SpawnLauncher {
    pub fn new(opts: SpawnOptions) -> Self {
        Self { opts }
    }
}

impl JobLauncher for SpawnLauncher {
    fn launch(&self, mirror: &MirrorName) -> Result<(), DaemonError> {
        spawner::spawn(&self.opts, std::slice::from_ref(mirror)).map(|_| ())
    }
}

/// What became of one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Spawned,
    /// Source address not on the allow-list.
    Denied,
    /// Unknown mirror or wrong secret. Callers must not tell them apart.
    Unknown,
    /// Authorized, but the worker could not be started.
    Failed,
}

pub struct Dispatcher<L> {
    config: Config,
    launcher: L,
}

impl<L: JobLauncher> Dispatcher<L> {
    pub fn new(config: Config, launcher: L) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn on_trigger(&self, mirror: &str, secret: &str, addr: Option<IpAddr>) -> Outcome {
        let source = addr.map_or_else(|| "-".to_string(), |a| a.to_string());
        match access::authorize(&self.config.global, secret, addr) {
            Decision::Allow => {}
            Decision::DenyAddress => {
                tracing::warn!(mirror, source = %source, "trigger from disallowed address");
                return Outcome::Denied;
            }
            Decision::DenySecret => {
                tracing::warn!(mirror, source = %source, "trigger with wrong secret");
                return Outcome::Unknown;
            }
        }

        let name = MirrorName::from(mirror);
        if !self.config.mirrors.contains_key(&name) {
            tracing::warn!(mirror, source = %source, "trigger for unknown mirror");
            return Outcome::Unknown;
        }

        match self.launcher.launch(&name) {
            Ok(()) => {
                tracing::info!(mirror, source = %source, "sync job started");
                Outcome::Spawned
            }
            Err(err) => {
                tracing::error!(mirror, error = %err, "cannot start sync job");
                Outcome::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Persistent listener service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Socket,
    Pipe,
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub kind: ListenerKind,
    pub foreground: bool,
    pub spawn: SpawnOptions,
}

enum Endpoint {
    Socket(std::net::TcpListener),
    Pipe(PathBuf),
}

/// Run a persistent listener until a terminating signal.
///
/// Returns `Ok(())` in the original process after a successful detach, and
/// in the daemon after shutdown. A restart signal re-executes the process
/// and does not return.
pub fn run(config: Config, opts: ServeOptions) -> Result<(), DaemonError> {
    let global = &config.global;
    if let Some(marker) = &global.pid_file {
        lifecycle::check_single_instance(marker)?;
    }

    // Set up the endpoint while still attached so mistakes reach the terminal.
    let endpoint = match opts.kind {
        ListenerKind::Socket => {
            let addr: SocketAddr = global.listen_addr()?.ok_or(DaemonError::NoListenAddress)?;
            Endpoint::Socket(socket::bind(addr)?)
        }
        ListenerKind::Pipe => {
            let path = global.fifo.clone().ok_or(DaemonError::NoFifo)?;
            pipe::ensure_fifo(&path)?;
            Endpoint::Pipe(path)
        }
    };

    if !opts.foreground && lifecycle::daemonize(global.log_file.as_deref())? == Role::Parent {
        return Ok(());
    }

    let marker = global.pid_file.as_deref().and_then(PidMarker::create);
    let ctx = ProcessContext::capture(marker.map(|m| m.path().to_path_buf()))?;
    lifecycle::set_child_reaping(ChildReaping::AutoReap)?;

    let dispatcher = Dispatcher::new(config, SpawnLauncher::new(opts.spawn));
    let served = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| crate::error::io_err("tokio-runtime", e))
        .and_then(|runtime| runtime.block_on(serve_until_signal(endpoint, &dispatcher)));

    let state = match served {
        Ok(state) => state,
        Err(err) => {
            lifecycle::perform(lifecycle::cleanup_actions(ServiceState::ShuttingDown, &ctx))?;
            return Err(err);
        }
    };
    lifecycle::perform(lifecycle::cleanup_actions(state, &ctx))?;
    Ok(())
}

async fn serve_until_signal<L: JobLauncher>(
    endpoint: Endpoint,
    dispatcher: &Dispatcher<L>,
) -> Result<ServiceState, DaemonError> {
    let mut signals = lifecycle::Signals::register()?;
    let serve = async move {
        match endpoint {
            Endpoint::Socket(listener) => {
                socket::serve(socket::into_async(listener)?, dispatcher).await
            }
            Endpoint::Pipe(path) => pipe::serve(&path, dispatcher).await,
        }
    };
    tokio::select! {
        result = serve => result.map(|()| ServiceState::ShuttingDown),
        state = signals.next() => Ok(state),
    }
}


#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::testing::*;
    use super::*;

    fn local() -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[test]
    fn authorized_trigger_launches_once() {
        let d = dispatcher(&["127.0.0.0/8"]);
        assert_eq!(d.on_trigger("alpha", SECRET, local()), Outcome::Spawned);
        assert_eq!(
            d.launcher().launched.borrow().as_slice(),
            &[MirrorName::from("alpha")]
        );
    }

    #[test]
    fn denied_address_launches_nothing() {
        let d = dispatcher(&["10.0.0.0/8"]);
        assert_eq!(d.on_trigger("alpha", SECRET, local()), Outcome::Denied);
        assert_eq!(d.launcher().count(), 0);
    }

    #[test]
    fn wrong_secret_and_unknown_mirror_look_the_same() {
        let d = dispatcher(&["0.0.0.0/0"]);
        assert_eq!(d.on_trigger("alpha", "guess", local()), Outcome::Unknown);
        assert_eq!(d.on_trigger("ghost", SECRET, local()), Outcome::Unknown);
        assert_eq!(d.launcher().count(), 0);
    }

    #[test]
    fn missing_address_only_passes_allow_all() {
        assert_eq!(
            dispatcher(&["127.0.0.1"]).on_trigger("alpha", SECRET, None),
            Outcome::Denied
        );
        assert_eq!(
            dispatcher(&["0.0.0.0/0"]).on_trigger("alpha", SECRET, None),
            Outcome::Spawned
        );
    }

    #[test]
    fn launch_failure_is_reported() {
        let d = Dispatcher::new(
            config(&["0.0.0.0/0"]),
            RecordingLauncher {
                fail: true,
                ..RecordingLauncher::default()
            },
        );
        assert_eq!(d.on_trigger("alpha", SECRET, local()), Outcome::Failed);
    }
}
