//! Trigger message codec shared by the socket and pipe listeners.
//!
//! Wire format: `<mirror> <secret>`, separated and optionally surrounded by
//! whitespace. Nothing is ever sent back.

use std::fmt;

use crate::error::ProtocolError;

/// Longest message a listener will read.
pub const MAX_MESSAGE: usize = 1024;

/// A decoded trigger. Discarded once dispatched.
#[derive(Clone, PartialEq, Eq)]
pub struct Trigger {
    pub mirror: String,
    pub secret: String,
}

impl Trigger {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            [mirror, secret] => Ok(Self {
                mirror: (*mirror).to_string(),
                secret: (*secret).to_string(),
            }),
            other => Err(ProtocolError::Malformed {
                tokens: other.len(),
            }),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::parse(text)
    }
}

/// True once `buf` holds at least two tokens and ends in whitespace, so a
/// reader can stop without waiting for the peer to close.
pub fn is_complete(buf: &[u8]) -> bool {
    buf.last().is_some_and(u8::is_ascii_whitespace)
        && buf
            .split(u8::is_ascii_whitespace)
            .filter(|token| !token.is_empty())
            .count()
            >= 2
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("mirror", &self.mirror)
            .field("secret", &"<redacted>")
            .finish()
    }
}
