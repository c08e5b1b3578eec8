//! Named-pipe trigger listener.
//!
//! The FIFO is opened read-write so the listener always counts as a writer
//! and never sees end-of-file between clients. Each wake-up reads one
//! message and discards whatever else is buffered. Messages carry no source
//! address, so they are authorized as coming from `0.0.0.0`: the allow-list
//! must contain an entry covering it or every FIFO trigger is denied.

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use nix::sys::stat::Mode;
use nix::unistd;
use tokio::net::unix::pipe;

use crate::error::{io_err, DaemonError};
use crate::protocol::{Trigger, MAX_MESSAGE};

use super::{Dispatcher, JobLauncher};

/// Create the FIFO with mode 0600 unless it already exists.
pub fn ensure_fifo(path: &Path) -> Result<(), DaemonError> {
    match fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => {
            return Err(DaemonError::NotAFifo {
                path: path.to_path_buf(),
            })
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(path, err)),
    }
    unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)
        .map_err(|errno| io_err(path, io::Error::from(errno)))?;
    tracing::debug!(path = %path.display(), "created fifo");
    Ok(())
}

/// Read loop. Only returns on error.
pub async fn serve<L: JobLauncher>(
    path: &Path,
    dispatcher: &Dispatcher<L>,
) -> Result<(), DaemonError> {
    ensure_fifo(path)?;
    let receiver = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(path)
        .map_err(|e| io_err(path, e))?;
    tracing::info!(path = %path.display(), "listening for triggers");

    let mut buf = [0u8; MAX_MESSAGE];
    loop {
        receiver.readable().await.map_err(|e| io_err(path, e))?;
        let n = match receiver.try_read(&mut buf) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(io_err(path, err)),
        };
        drain(&receiver, path)?;

        match Trigger::from_bytes(&buf[..n]) {
            Ok(trigger) => {
                dispatcher.on_trigger(&trigger.mirror, &trigger.secret, None);
            }
            Err(err) => tracing::warn!(error = %err, "ignoring trigger"),
        }
    }
}

fn drain(receiver: &pipe::Receiver, path: &Path) -> Result<(), DaemonError> {
    let mut scratch = [0u8; MAX_MESSAGE];
    loop {
        match receiver.try_read(&mut scratch) {
            Ok(0) => return Ok(()),
            Ok(n) => tracing::debug!(bytes = n, "discarding trailing fifo data"),
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(io_err(path, err)),
        }
    }
}
