//! Access guard: shared-secret and source-address checks for triggers.
//!
//! An allow-list entry is either a bare IPv4 address (exact match) or
//! `addr/bits`. Matching shifts both addresses right by `32 - bits` and
//! compares what is left. A trigger without source address metadata is
//! checked as `0.0.0.0`, so it only passes an explicit allow-all entry.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::ConfigError;
use crate::types::GlobalConfig;

/// One allow-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetMask {
    addr: u32,
    prefix: Option<u8>,
}

impl NetMask {
    pub fn new(addr: Ipv4Addr, prefix: Option<u8>) -> Result<Self, ConfigError> {
        match prefix {
            Some(bits) if bits > 32 => Err(ConfigError::InvalidNetMask(format!("{addr}/{bits}"))),
            _ => Ok(Self {
                addr: u32::from(addr),
                prefix,
            }),
        }
    }

    /// `0.0.0.0/0`
    pub fn any() -> Self {
        Self {
            addr: 0,
            prefix: Some(0),
        }
    }

    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        let shift = self.prefix.map_or(0, |bits| 32 - u32::from(bits));
        if shift >= 32 {
            return true;
        }
        (u32::from(addr) >> shift) == (self.addr >> shift)
    }
}

impl FromStr for NetMask {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidNetMask(s.to_string());
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, bits)) => (addr, Some(bits.trim().parse::<u8>().map_err(|_| invalid())?)),
            None => (s, None),
        };
        let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
        Self::new(addr, prefix).map_err(|_| invalid())
    }
}

impl fmt::Display for NetMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = Ipv4Addr::from(self.addr);
        match self.prefix {
            Some(bits) => write!(f, "{addr}/{bits}"),
            None => write!(f, "{addr}"),
        }
    }
}

impl TryFrom<String> for NetMask {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NetMask> for String {
    fn from(mask: NetMask) -> Self {
        mask.to_string()
    }
}

/// The configured `allow:` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(pub Vec<NetMask>);

impl AllowList {
    pub fn allow_all() -> Self {
        Self(vec![NetMask::any()])
    }

    /// `None` is checked as `0.0.0.0`. IPv6 peers are accepted only through
    /// their IPv4-mapped form.
    pub fn permits(&self, addr: Option<IpAddr>) -> bool {
        let v4 = match addr {
            None => Ipv4Addr::UNSPECIFIED,
            Some(IpAddr::V4(v4)) => v4,
            Some(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
                Some(v4) => v4,
                None => return false,
            },
        };
        self.0.iter().any(|mask| mask.matches(v4))
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::allow_all()
    }
}

/// Result of checking a trigger against the global configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    DenyAddress,
    DenySecret,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// Exact secret comparison, in constant time for equal-length inputs.
pub fn secret_matches(presented: &str, configured: &str) -> bool {
    bool::from(presented.as_bytes().ct_eq(configured.as_bytes()))
}

/// Check the source address first, then the secret.
pub fn authorize(global: &GlobalConfig, presented: &str, addr: Option<IpAddr>) -> Decision {
    if !global.allow.permits(addr) {
        return Decision::DenyAddress;
    }
    if !secret_matches(presented, &global.secret) {
        return Decision::DenySecret;
    }
    Decision::Allow
}
