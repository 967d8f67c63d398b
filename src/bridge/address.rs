//! Channel address resolution
//!
//! Coordinator and agent never exchange ports. Both sides derive the
//! request/reply port of a channel independently from the channel identifier:
//!
//! ```text
//! port = 10000 + (hex(last 4 chars of channel id) mod 10000)
//! ```
//!
//! ## Collisions
//!
//! This is a weak hash. Two channel identifiers that share the same last four
//! characters always land on the same port, and so do suffixes whose values are
//! congruent modulo 10000. Colliding channels talk to the same agent. Callers
//! have to live with that cross-talk; it is a known limitation of the
//! addressing scheme and not reported as an error.
//!
//! The pub/sub pair does not use this function at all: commands go out on a
//! single configured base port and replies come back on `base + 1`, and the
//! channel identifier is carried as the topic instead.

use std::fmt;

/// Offset added to every derived port (keeps clear of well-known ports)
pub const PORT_BASE: u16 = 10_000;

/// Size of the derived port range
pub const PORT_RANGE: u32 = 10_000;

/// Number of trailing characters of the channel id that feed the hash
pub const SUFFIX_LEN: usize = 4;

/// Derive the request/reply port for a channel.
///
/// Total and deterministic: the trailing characters are read as base-16 up to
/// the first character that is not a hex digit (so `"..12zz"` reads as `0x12`),
/// and a suffix without any leading hex digit counts as zero. The result is
/// always within `[10000, 19999]`.
pub fn resolve(channel_id: &str) -> u16 {
    let mut suffix: Vec<char> = channel_id.chars().rev().take(SUFFIX_LEN).collect();
    suffix.reverse();

    let value = suffix
        .iter()
        .map_while(|c| c.to_digit(16))
        .fold(0u32, |acc, digit| acc * 16 + digit);

    PORT_BASE + (value % PORT_RANGE) as u16
}

/// Host and port an agent for a channel is reachable on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedAddress {
    pub host: String,
    pub port: u16,
}

impl ResolvedAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address of the channel's responder on `host`, using the derived port
    pub fn for_channel(host: impl Into<String>, channel_id: &str) -> Self {
        Self::new(host, resolve(channel_id))
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Fixed port pair shared by all channels in the pub/sub variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubSubPorts {
    /// Coordinator publishes commands here
    pub commands: u16,

    /// Agents push replies here
    pub replies: u16,
}

impl PubSubPorts {
    /// Commands on `base`, replies on `base + 1`.
    ///
    /// Returns `None` if `base + 1` does not fit into a port number.
    pub fn from_base(base: u16) -> Option<Self> {
        Some(Self {
            commands: base,
            replies: base.checked_add(1)?,
        })
    }
}
