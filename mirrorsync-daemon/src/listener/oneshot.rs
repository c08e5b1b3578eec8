//! One-shot (CGI-style) trigger.
//!
//! The request path is `/<mirror>/<secret>`. The response is a plain-text
//! document: `DENY` for a disallowed address, `OK` when a job was started,
//! `NOP` for everything else.

use std::fmt;
use std::net::IpAddr;

use super::{Dispatcher, JobLauncher, Outcome};

pub const PATH_INFO: &str = "PATH_INFO";
pub const REMOTE_ADDR: &str = "REMOTE_ADDR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Deny,
    Nop,
    Ok,
}

impl Response {
    pub fn body(self) -> &'static str {
        match self {
            Response::Deny => "DENY",
            Response::Nop => "NOP",
            Response::Ok => "OK",
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Content-Type: text/plain\r\n\r\n{}\n", self.body())
    }
}

/// Answer one request. The address is checked before the path is looked at.
pub fn handle<L: JobLauncher>(
    dispatcher: &Dispatcher<L>,
    path_info: Option<&str>,
    remote_addr: Option<&str>,
) -> Response {
    let addr = remote_addr.and_then(|a| a.trim().parse::<IpAddr>().ok());
    if !dispatcher.config().global.allow.permits(addr) {
        tracing::warn!(remote_addr = remote_addr.unwrap_or("-"), "request from disallowed address");
        return Response::Deny;
    }

    let Some((mirror, secret)) = path_info.and_then(split_path) else {
        tracing::debug!(path_info = path_info.unwrap_or("-"), "malformed request path");
        return Response::Nop;
    };

    match dispatcher.on_trigger(mirror, secret, addr) {
        Outcome::Spawned => Response::Ok,
        Outcome::Denied => Response::Deny,
        Outcome::Unknown | Outcome::Failed => Response::Nop,
    }
}

/// `/mirror/secret` → `(mirror, secret)`; exactly two non-empty segments.
fn split_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('/')?;
    let mut parts = rest.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(mirror), Some(secret), None) if !mirror.is_empty() && !secret.is_empty() => {
            Some((mirror, secret))
        }
        _ => None,
    }
}
