// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;
use std::net::IpAddr;
use thiserror::Error;

pub const IPV4_WIDTH: u8 = 32;
pub const IPV6_WIDTH: u8 = 128;

/// Errors building or parsing a [`TableAddr`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum AddrError {
    #[error("bad IP: {0}")]
    BadIp(String),

    #[error("bad prefix length: {0}")]
    BadPrefix(String),

    #[error("bad {family} prefix length: {len}")]
    PrefixTooLong { family: &'static str, len: u8 },
}

/// One entry of an address table.
///
/// An entry is either a host or a network (an address plus a prefix
/// length), and may be negated. A prefix as long as the address itself
/// names a single host, so it is stored as a host entry; this is also
/// how the kernel stores it.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct TableAddr {
    ip: IpAddr,
    prefix_len: Option<u8>,
    negated: bool,
}

fn family_name(ip: &IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "IPv4",
        IpAddr::V6(_) => "IPv6",
    }
}

impl TableAddr {
    /// A single host.
    pub fn host(ip: impl Into<IpAddr>) -> Self {
        Self { ip: ip.into(), prefix_len: None, negated: false }
    }

    /// A network of `prefix_len` leading bits.
    ///
    /// The address is kept as given; host bits are not masked off.
    pub fn network(
        ip: impl Into<IpAddr>,
        prefix_len: u8,
    ) -> Result<Self, AddrError> {
        let ip = ip.into();
        let width = Self::width_of(&ip);
        if prefix_len > width {
            return Err(AddrError::PrefixTooLong {
                family: family_name(&ip),
                len: prefix_len,
            });
        }

        let prefix_len = (prefix_len != width).then_some(prefix_len);
        Ok(Self { ip, prefix_len, negated: false })
    }

    /// Return this entry with its negation flag set.
    pub fn negated(self) -> Self {
        Self { negated: true, ..self }
    }

    /// Return this entry with its negation flag set to `negated`.
    pub fn with_negation(self, negated: bool) -> Self {
        Self { negated, ..self }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The prefix length, or `None` for a host entry.
    pub fn prefix_len(&self) -> Option<u8> {
        self.prefix_len
    }

    /// The number of significant bits: the prefix length of a
    /// network, or the full address width of a host.
    pub fn effective_prefix_len(&self) -> u8 {
        self.prefix_len.unwrap_or_else(|| self.width())
    }

    pub fn is_host(&self) -> bool {
        self.prefix_len.is_none()
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn is_ipv4(&self) -> bool {
        self.ip.is_ipv4()
    }

    /// The width in bits of this entry's address family.
    pub fn width(&self) -> u8 {
        Self::width_of(&self.ip)
    }

    fn width_of(ip: &IpAddr) -> u8 {
        match ip {
            IpAddr::V4(_) => IPV4_WIDTH,
            IpAddr::V6(_) => IPV6_WIDTH,
        }
    }
}

impl From<IpAddr> for TableAddr {
    fn from(ip: IpAddr) -> Self {
        Self::host(ip)
    }
}

impl FromStr for TableAddr {
    type Err = AddrError;

    /// Parse pf's table entry syntax: `[!]address[/prefix]`.
    fn from_str(val: &str) -> Result<Self, Self::Err> {
        let (negated, rest) = match val.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, val),
        };

        let (ip_s, prefix_s) = match rest.split_once('/') {
            Some((ip_s, prefix_s)) => (ip_s, Some(prefix_s)),
            None => (rest, None),
        };

        let ip: IpAddr =
            ip_s.parse().map_err(|e| AddrError::BadIp(format!("{e}")))?;

        let addr = match prefix_s {
            Some(p) => {
                let len = p
                    .parse::<u8>()
                    .map_err(|e| AddrError::BadPrefix(format!("{e}")))?;
                Self::network(ip, len)?
            }

            None => Self::host(ip),
        };

        Ok(addr.with_negation(negated))
    }
}

impl TryFrom<String> for TableAddr {
    type Error = AddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TableAddr> for String {
    fn from(addr: TableAddr) -> Self {
        addr.to_string()
    }
}

impl Display for TableAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.negated {
            write!(f, "!")?;
        }

        match self.prefix_len {
            Some(len) => write!(f, "{}/{len}", self.ip),
            None => write!(f, "{}", self.ip),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;
    use std::net::Ipv6Addr;

    #[test]
    fn parse_host() {
        let addr: TableAddr = "192.168.2.9".parse().unwrap();
        assert_eq!(addr, TableAddr::host(Ipv4Addr::new(192, 168, 2, 9)));
        assert!(addr.is_host());
        assert_eq!(addr.effective_prefix_len(), 32);
    }

    #[test]
    fn parse_network_and_negation() {
        let addr: TableAddr = "!fd00:1122::/48".parse().unwrap();
        assert!(addr.is_negated());
        assert_eq!(addr.prefix_len(), Some(48));
        assert_eq!(addr.ip(), "fd00:1122::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(addr.to_string(), "!fd00:1122::/48");
    }

    #[test]
    fn full_prefix_is_host() {
        let a: TableAddr = "10.0.0.1/32".parse().unwrap();
        assert_eq!(a, "10.0.0.1".parse().unwrap());
        assert_eq!(a.to_string(), "10.0.0.1");

        let b = TableAddr::network(Ipv6Addr::LOCALHOST, 128).unwrap();
        assert!(b.is_host());
    }

    #[test]
    fn host_bits_are_kept() {
        let a: TableAddr = "192.168.2.9/24".parse().unwrap();
        assert_eq!(a.to_string(), "192.168.2.9/24");
    }

    #[test]
    fn bad_prefix_len() {
        assert_eq!(
            "192.168.2.9/33".parse::<TableAddr>(),
            Err(AddrError::PrefixTooLong { family: "IPv4", len: 33 })
        );
        assert_eq!(
            "fd01:dead:beef::1/129".parse::<TableAddr>(),
            Err(AddrError::PrefixTooLong { family: "IPv6", len: 129 })
        );
        assert!(matches!(
            "10.0.0.0/x".parse::<TableAddr>(),
            Err(AddrError::BadPrefix(_))
        ));
    }

    #[test]
    fn bad_ip() {
        assert!(matches!(
            "192.168.33.256".parse::<TableAddr>(),
            Err(AddrError::BadIp(_))
        ));
        assert!(matches!("".parse::<TableAddr>(), Err(AddrError::BadIp(_))));
    }
}
