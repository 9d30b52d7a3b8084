//! IPv4 prefix type used for networks, loopbacks and address pools.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network prefix such as `10.100.0.0/24`.
///
/// Host bits are always cleared on construction, so two prefixes compare
/// equal whenever they describe the same block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Prefix {
    network: Ipv4Addr,
    len: u8,
}

impl Ipv4Prefix {
    pub fn new(addr: Ipv4Addr, len: u8) -> Result<Self, String> {
        if len > 32 {
            return Err(format!("prefix length {} exceeds 32", len));
        }
        let network = Ipv4Addr::from(u32::from(addr) & Self::mask(len));
        Ok(Self { network, len })
    }

    fn mask(len: u8) -> u32 {
        if len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(len))
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    /// Number of addresses in the block, network and broadcast included.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.len))
    }

    /// Highest offset usable for a host (one below broadcast).
    pub fn last_host_offset(&self) -> u32 {
        match self.size() {
            0..=2 => 0,
            size => (size - 2) as u32,
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask(self.len) == u32::from(self.network)
    }

    pub fn overlaps(&self, other: &Ipv4Prefix) -> bool {
        self.contains(other.network) || other.contains(self.network)
    }

    /// Address at `offset` inside the block, if it is a usable host address.
    pub fn host(&self, offset: u32) -> Option<Ipv4Addr> {
        if offset == 0 || offset > self.last_host_offset() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network) + offset))
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.len)
    }
}

impl FromStr for Ipv4Prefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("'{}' is not in address/length form", s))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("invalid prefix address '{}': {}", addr, e))?;
        let len: u8 = len
            .parse()
            .map_err(|e| format!("invalid prefix length '{}': {}", len, e))?;
        Self::new(addr, len)
    }
}

impl Serialize for Ipv4Prefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Prefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
