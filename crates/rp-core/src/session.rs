//! Dial metadata and the SOCKS-style address codec shared by every
//! outbound protocol (Shadowsocks, SSR, VMess and Trojan all carry the
//! same type-byte + host + big-endian-port atom, VMess with its own
//! type values handled by the connector itself).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{ProbeError, Result};

/// SOCKS address type bytes on the wire.
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Transport selector for a dial request. The probe path is TCP-only;
/// the variant exists so metadata stays honest about what it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Tcp,
}

/// Destination address: exactly one of IP or domain, by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Addr {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Domain(String),
}

impl Addr {
    /// Parses IP-looking strings into the IP variants so connectors
    /// never send a dotted quad as a domain atom.
    #[must_use]
    pub fn from_host(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => Addr::V4(v4),
            Ok(IpAddr::V6(v6)) => Addr::V6(v6),
            Err(_) => Addr::Domain(host.to_string()),
        }
    }

    #[must_use]
    pub fn is_domain(&self) -> bool {
        matches!(self, Addr::Domain(_))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::V4(ip) => write!(f, "{ip}"),
            Addr::V6(ip) => write!(f, "{ip}"),
            Addr::Domain(d) => write!(f, "{d}"),
        }
    }
}

/// One dial request: where a tunnel should terminate.
#[derive(Clone, Debug)]
pub struct Metadata {
    pub network: NetworkKind,
    pub addr: Addr,
    pub port: u16,
    pub src_port: Option<u16>,
}

impl Metadata {
    /// TCP metadata for `host:port`. Port zero is rejected at the call
    /// sites that build metadata from parsed links.
    #[must_use]
    pub fn tcp(host: &str, port: u16) -> Self {
        Self {
            network: NetworkKind::Tcp,
            addr: Addr::from_host(host),
            port,
            src_port: None,
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Encodes `(addr, port)` in the shared atom format:
/// `0x01 ipv4(4) port(2)` / `0x03 len domain port(2)` / `0x04 ipv6(16) port(2)`,
/// port in network byte order.
pub fn encode_addr(addr: &Addr, port: u16, buf: &mut Vec<u8>) {
    match addr {
        Addr::V4(ip) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&ip.octets());
        }
        Addr::V6(ip) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&ip.octets());
        }
        Addr::Domain(domain) => {
            buf.push(ATYP_DOMAIN);
            let bytes = domain.as_bytes();
            debug_assert!(!bytes.is_empty() && bytes.len() <= 255);
            buf.push(bytes.len() as u8);
            buf.extend_from_slice(bytes);
        }
    }
    buf.extend_from_slice(&port.to_be_bytes());
}

/// Decodes one address atom, returning the address, port and the number
/// of bytes consumed.
pub fn decode_addr(buf: &[u8]) -> Result<(Addr, u16, usize)> {
    let atyp = *buf
        .first()
        .ok_or_else(|| ProbeError::internal("empty address atom"))?;
    match atyp {
        ATYP_IPV4 => {
            if buf.len() < 7 {
                return Err(ProbeError::internal("short ipv4 atom"));
            }
            let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
            let port = u16::from_be_bytes([buf[5], buf[6]]);
            Ok((Addr::V4(ip), port, 7))
        }
        ATYP_IPV6 => {
            if buf.len() < 19 {
                return Err(ProbeError::internal("short ipv6 atom"));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[1..17]);
            let port = u16::from_be_bytes([buf[17], buf[18]]);
            Ok((Addr::V6(Ipv6Addr::from(octets)), port, 19))
        }
        ATYP_DOMAIN => {
            let len = *buf
                .get(1)
                .ok_or_else(|| ProbeError::internal("missing domain length"))?
                as usize;
            if len == 0 {
                return Err(ProbeError::internal("empty domain atom"));
            }
            if buf.len() < 2 + len + 2 {
                return Err(ProbeError::internal("short domain atom"));
            }
            let domain = std::str::from_utf8(&buf[2..2 + len])
                .map_err(|_| ProbeError::internal("non-ascii domain atom"))?
                .to_string();
            let port = u16::from_be_bytes([buf[2 + len], buf[3 + len]]);
            Ok((Addr::Domain(domain), port, 2 + len + 2))
        }
        other => Err(ProbeError::internal(format!("unknown atyp {other:#04x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_ipv4() {
        let mut buf = Vec::new();
        encode_addr(&Addr::V4(Ipv4Addr::new(192, 168, 1, 1)), 8080, &mut buf);
        assert_eq!(buf.len(), 1 + 4 + 2);
        assert_eq!(buf[0], ATYP_IPV4);
        assert_eq!(&buf[1..5], &[192, 168, 1, 1]);
        assert_eq!(&buf[5..7], &[0x1f, 0x90]);
    }

    #[test]
    fn encode_ipv6() {
        let mut buf = Vec::new();
        let ip = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        encode_addr(&Addr::V6(ip), 443, &mut buf);
        assert_eq!(buf.len(), 1 + 16 + 2);
        assert_eq!(buf[0], ATYP_IPV6);
        assert_eq!(&buf[17..19], &[0x01, 0xbb]);
    }

    #[test]
    fn encode_domain() {
        let mut buf = Vec::new();
        encode_addr(&Addr::Domain("example.com".into()), 80, &mut buf);
        assert_eq!(buf.len(), 1 + 1 + 11 + 2);
        assert_eq!(buf[0], ATYP_DOMAIN);
        assert_eq!(buf[1], 11);
        assert_eq!(&buf[2..13], b"example.com");
        assert_eq!(&buf[13..15], &[0x00, 0x50]);
    }

    #[test]
    fn roundtrip_all_variants() {
        let cases = [
            (Addr::V4(Ipv4Addr::new(10, 0, 0, 1)), 22),
            (Addr::V6(Ipv6Addr::LOCALHOST), 8443),
            (Addr::Domain("clients3.google.com".into()), 80),
        ];
        for (addr, port) in cases {
            let mut buf = Vec::new();
            encode_addr(&addr, port, &mut buf);
            let (got_addr, got_port, used) = decode_addr(&buf).unwrap();
            assert_eq!(got_addr, addr);
            assert_eq!(got_port, port);
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn decode_rejects_truncation() {
        let mut buf = Vec::new();
        encode_addr(&Addr::Domain("example.com".into()), 80, &mut buf);
        assert!(decode_addr(&buf[..buf.len() - 1]).is_err());
        assert!(decode_addr(&[]).is_err());
        assert!(decode_addr(&[0x05, 1, 2]).is_err());
    }

    #[test]
    fn host_parsing_prefers_ip() {
        assert!(matches!(Addr::from_host("127.0.0.1"), Addr::V4(_)));
        assert!(matches!(Addr::from_host("::1"), Addr::V6(_)));
        assert!(matches!(Addr::from_host("example.com"), Addr::Domain(_)));
    }
}
