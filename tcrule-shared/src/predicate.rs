//! Semantic packet-match predicates: what a u32 classifier actually selects.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::TcValidationError;

/// An IPv4 address with a prefix length. Displays without a suffix for /32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpMatch {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl IpMatch {
    pub fn host(addr: Ipv4Addr) -> Self {
        Self {
            addr,
            prefix_len: 32,
        }
    }

    /// Build from a raw classifier key. The prefix length is the number of
    /// set bits in the mask; the value is kept as reported.
    pub fn from_key(value: u32, mask: u32) -> Self {
        Self {
            addr: Ipv4Addr::from(value),
            prefix_len: mask.count_ones() as u8,
        }
    }

    /// Contiguous network mask for this prefix length.
    pub fn mask(&self) -> u32 {
        prefix_mask(self.prefix_len)
    }

    /// The (value, mask) pair a u32 classifier stores for this match.
    pub fn to_key(&self) -> (u32, u32) {
        let mask = self.mask();
        (u32::from(self.addr) & mask, mask)
    }

    /// Clear host bits, which the classifier drops anyway.
    pub fn normalized(self) -> Self {
        Self {
            addr: Ipv4Addr::from(u32::from(self.addr) & self.mask()),
            prefix_len: self.prefix_len,
        }
    }
}

pub fn prefix_mask(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        n if n >= 32 => u32::MAX,
        n => u32::MAX << (32 - n),
    }
}

impl fmt::Display for IpMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix_len == 32 {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{}/{}", self.addr, self.prefix_len)
        }
    }
}

impl FromStr for IpMatch {
    type Err = TcValidationError;

    /// Parses `a.b.c.d` or `a.b.c.d/len`, clearing host bits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| TcValidationError::new("ip", format!("'{}' is not an IPv4 address", s)))?;
        let prefix_len = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|len| *len <= 32)
                .ok_or_else(|| {
                    TcValidationError::new("ip", format!("'{}' has an invalid prefix length", s))
                })?,
            None => 32,
        };
        Ok(IpMatch { addr, prefix_len }.normalized())
    }
}

impl Serialize for IpMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpMatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Source/destination IP and port selectors of one classifier.
///
/// Equality is field-wise over `Option`s: absent matches only absent. Rule
/// reuse and deletion depend on exactly that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPredicates {
    pub src_ip: Option<IpMatch>,
    pub dst_ip: Option<IpMatch>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl MatchPredicates {
    pub fn is_empty(&self) -> bool {
        self.src_ip.is_none()
            && self.dst_ip.is_none()
            && self.src_port.is_none()
            && self.dst_port.is_none()
    }
}

impl fmt::Display for MatchPredicates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "all traffic");
        }
        let mut parts = Vec::new();
        if let Some(ip) = &self.src_ip {
            parts.push(format!("src {}", ip));
        }
        if let Some(ip) = &self.dst_ip {
            parts.push(format!("dst {}", ip));
        }
        if let Some(port) = self.src_port {
            parts.push(format!("sport {}", port));
        }
        if let Some(port) = self.dst_port {
            parts.push(format!("dport {}", port));
        }
        write!(f, "{}", parts.join(" "))
    }
}
