//! SOCKS5 address encoding (RFC 1928 §5, "Addressing").
//!
//! [`Dst`] represents the `ATYP` + address + port triple that appears in
//! requests, replies, and UDP datagram headers. IPv4 and IPv6 are fixed
//! width; domain names are length-prefixed (`1..=255` bytes, never `0`).
//!
//! ```
//! use simple_socks5::addr::Dst;
//!
//! let buf = [0x01, 127, 0, 0, 1, 0x1F, 0x90]; // ATYP=IPv4, 127.0.0.1:8080
//! let (dst, used) = Dst::parse_from_slice(&buf).unwrap();
//! assert_eq!(dst.to_string(), "127.0.0.1:8080");
//! assert_eq!(used, 7);
//! ```

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::SocksError;

/// Address type tag (`ATYP`), RFC 1928 §5.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Atyp {
    /// IPv4 address (4 bytes).
    V4 = 0x01,
    /// Domain name (length-prefixed, 1-255 bytes).
    Domain = 0x03,
    /// IPv6 address (16 bytes).
    V6 = 0x04,
}

impl fmt::Display for Atyp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atyp::V4 => write!(f, "IPv4"),
            Atyp::V6 => write!(f, "IPv6"),
            Atyp::Domain => write!(f, "Domain"),
        }
    }
}

impl Atyp {
    fn from_u8(byte: u8) -> Result<Self, SocksError> {
        match byte {
            0x01 => Ok(Atyp::V4),
            0x03 => Ok(Atyp::Domain),
            0x04 => Ok(Atyp::V6),
            other => Err(SocksError::UnsupportedAtyp(other)),
        }
    }
}

/// A destination (or bound) address and port, as carried by requests,
/// replies, and UDP datagram headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dst {
    /// An IPv4 address and port.
    V4(Ipv4Addr, u16),
    /// An IPv6 address and port.
    V6(Ipv6Addr, u16),
    /// A domain name and port. Never empty.
    Domain(String, u16),
}

impl Dst {
    /// The `ATYP` byte this address would be encoded with.
    pub fn atyp(&self) -> Atyp {
        match self {
            Dst::V4(..) => Atyp::V4,
            Dst::V6(..) => Atyp::V6,
            Dst::Domain(..) => Atyp::Domain,
        }
    }

    /// Builds a [`Dst`] from a [`SocketAddr`], choosing ATYP from the IP version.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(a) => Dst::V4(*a.ip(), a.port()),
            SocketAddr::V6(a) => Dst::V6(*a.ip(), a.port()),
        }
    }

    /// The unspecified `0.0.0.0:0` address, used as the bound address in
    /// replies that carry no meaningful endpoint (error replies).
    pub fn unspecified_v4() -> Self {
        Dst::V4(Ipv4Addr::UNSPECIFIED, 0)
    }

    /// Reads `ATYP` + address + port from an async byte stream, consuming
    /// exactly the bytes the address declares (RFC 1928 §5). Short reads or
    /// EOF before the frame completes surface as [`SocksError::Io`].
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, SocksError> {
        let atyp = Atyp::from_u8(reader.read_u8().await?)?;
        Self::read_body(reader, atyp).await
    }

    async fn read_body<R: AsyncRead + Unpin>(
        reader: &mut R,
        atyp: Atyp,
    ) -> Result<Self, SocksError> {
        match atyp {
            Atyp::V4 => {
                let mut octets = [0u8; 4];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Ok(Dst::V4(Ipv4Addr::from(octets), port))
            }
            Atyp::V6 => {
                let mut octets = [0u8; 16];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Ok(Dst::V6(Ipv6Addr::from(octets), port))
            }
            Atyp::Domain => {
                let len = reader.read_u8().await? as usize;
                if len == 0 {
                    return Err(SocksError::Malformed("domain length is zero"));
                }
                let mut name = vec![0u8; len];
                reader.read_exact(&mut name).await?;
                let domain = String::from_utf8(name)
                    .map_err(|_| SocksError::Malformed("domain name is not valid UTF-8"))?;
                let port = reader.read_u16().await?;
                Ok(Dst::Domain(domain, port))
            }
        }
    }

    /// Parses `ATYP` + address + port from an in-memory buffer (used for UDP
    /// datagram headers, which arrive whole). Returns the address and the
    /// number of bytes consumed from `buf`.
    pub fn parse_from_slice(buf: &[u8]) -> Result<(Self, usize), SocksError> {
        let atyp = *buf.first().ok_or(SocksError::MessageTooShort)?;
        let atyp = Atyp::from_u8(atyp)?;
        let rest = &buf[1..];
        let (dst, body_len) = Self::parse_body_from_slice(rest, atyp)?;
        Ok((dst, 1 + body_len))
    }

    fn parse_body_from_slice(buf: &[u8], atyp: Atyp) -> Result<(Self, usize), SocksError> {
        match atyp {
            Atyp::V4 => {
                if buf.len() < 6 {
                    return Err(SocksError::MessageTooShort);
                }
                let octets = [buf[0], buf[1], buf[2], buf[3]];
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok((Dst::V4(Ipv4Addr::from(octets), port), 6))
            }
            Atyp::V6 => {
                if buf.len() < 18 {
                    return Err(SocksError::MessageTooShort);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok((Dst::V6(Ipv6Addr::from(octets), port), 18))
            }
            Atyp::Domain => {
                let len = *buf.first().ok_or(SocksError::MessageTooShort)? as usize;
                if len == 0 {
                    return Err(SocksError::Malformed("domain length is zero"));
                }
                if buf.len() < 1 + len + 2 {
                    return Err(SocksError::MessageTooShort);
                }
                let domain = String::from_utf8(buf[1..1 + len].to_vec())
                    .map_err(|_| SocksError::Malformed("domain name is not valid UTF-8"))?;
                let port = u16::from_be_bytes([buf[1 + len], buf[1 + len + 1]]);
                Ok((Dst::Domain(domain, port), 1 + len + 2))
            }
        }
    }

    /// Serializes `ATYP` + address + port into SOCKS5 wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![self.atyp() as u8];
        match self {
            Dst::V4(ip, port) => {
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Dst::V6(ip, port) => {
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Dst::Domain(name, port) => {
                buf.push(name.len() as u8);
                buf.extend_from_slice(name.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
        }
        buf
    }

    /// The port component, regardless of address kind.
    pub fn port(&self) -> u16 {
        match self {
            Dst::V4(_, port) | Dst::V6(_, port) | Dst::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for Dst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dst::V4(ip, port) => write!(f, "{}:{}", ip, port),
            Dst::V6(ip, port) => write!(f, "[{}]:{}", ip, port),
            Dst::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}
