use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use rama_error::{ErrorContext, OpaqueError};

use super::parse_utils;

/// An [`IpAddr`] together with a port, distinct from [`std::net::SocketAddr`]
/// so it can be converted to and from an [`Authority`] without dragging in
/// flow-info / scope-id concerns.
///
/// [`Authority`]: super::Authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketAddress {
    ip: IpAddr,
    port: u16,
}

impl SocketAddress {
    #[must_use]
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    #[must_use]
    pub const fn ip_addr(&self) -> IpAddr {
        self.ip
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub const fn into_parts(self) -> (IpAddr, u16) {
        (self.ip, self.port)
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<SocketAddress> for SocketAddr {
    fn from(addr: SocketAddress) -> Self {
        SocketAddr::new(addr.ip, addr.port)
    }
}

impl From<(IpAddr, u16)> for SocketAddress {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Self { ip, port }
    }
}

impl From<(Ipv4Addr, u16)> for SocketAddress {
    fn from((ip, port): (Ipv4Addr, u16)) -> Self {
        Self {
            ip: IpAddr::V4(ip),
            port,
        }
    }
}

impl From<(Ipv6Addr, u16)> for SocketAddress {
    fn from((ip, port): (Ipv6Addr, u16)) -> Self {
        Self {
            ip: IpAddr::V6(ip),
            port,
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

impl std::str::FromStr for SocketAddress {
    type Err = OpaqueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = parse_utils::split_port_from_str(s)?;
        let ip = parse_utils::try_to_parse_str_to_ip(host)
            .ok_or_else(|| OpaqueError::from_display("host is not an ip address"))
            .context("parse socket address")?;
        Ok(Self { ip, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for s in ["127.0.0.1:80", "[::1]:443"] {
            let addr: SocketAddress = s.parse().unwrap();
            assert_eq!(addr.to_string(), s);
        }
    }
}
