//! TCP trigger listener.
//!
//! Connections are handled one at a time: read until the message is
//! complete, the peer closes, or [`MAX_MESSAGE`] bytes arrive; dispatch;
//! close from this side. [`READ_TIMEOUT`] bounds each idle wait. The client
//! never gets a reply.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use crate::error::{io_err, DaemonError};
use crate::protocol::{is_complete, Trigger, MAX_MESSAGE};

use super::{Dispatcher, JobLauncher};

pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind with the standard library so it can happen before detaching.
pub fn bind(addr: SocketAddr) -> Result<std::net::TcpListener, DaemonError> {
    let listener =
        std::net::TcpListener::bind(addr).map_err(|e| io_err(addr.to_string(), e))?;
    tracing::info!(%addr, "listening for triggers");
    Ok(listener)
}

/// Hand a bound listener to the running tokio reactor.
pub fn into_async(listener: std::net::TcpListener) -> Result<TcpListener, DaemonError> {
    listener
        .set_nonblocking(true)
        .map_err(|e| io_err("tcp listener", e))?;
    TcpListener::from_std(listener).map_err(|e| io_err("tcp listener", e))
}

/// Accept loop. Only returns on error.
pub async fn serve<L: JobLauncher>(
    listener: TcpListener,
    dispatcher: &Dispatcher<L>,
) -> Result<(), DaemonError> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                continue;
            }
        };
        handle_connection(stream, peer, dispatcher).await;
    }
}

async fn handle_connection<L: JobLauncher>(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: &Dispatcher<L>,
) {
    let message = match read_message(stream).await {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(%peer, error = %err, "dropping connection");
            return;
        }
    };

    match Trigger::from_bytes(&message) {
        Ok(trigger) => {
            dispatcher.on_trigger(&trigger.mirror, &trigger.secret, Some(peer.ip()));
        }
        Err(err) => tracing::warn!(%peer, error = %err, "ignoring trigger"),
    }
}

async fn read_message(mut stream: TcpStream) -> std::io::Result<Vec<u8>> {
    let mut message = Vec::with_capacity(64);
    let mut chunk = [0u8; 256];
    while message.len() < MAX_MESSAGE && !is_complete(&message) {
        let want = chunk.len().min(MAX_MESSAGE - message.len());
        match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut chunk[..want])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(read)) => message.extend_from_slice(&chunk[..read]),
            Ok(Err(err)) => return Err(err),
            // Idle client: use whatever arrived.
            Err(_) if !message.is_empty() => break,
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "client sent nothing",
                ))
            }
        }
    }
    Ok(message)
}
