//! SOCKS5 UDP request header (RFC 1928 §7).
//!
//! Every UDP packet exchanged over the relay — in either direction — is
//! wrapped with this header:
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```
//!
//! Fragmentation (`FRAG != 0`) is not supported (§1 Non-goals) and is
//! rejected during parsing.

use crate::addr::Dst;
use crate::error::SocksError;

/// A parsed (or about-to-be-serialized) SOCKS5 UDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    /// Must be `0x0000`.
    pub rsv: u16,
    /// Fragment number; must be `0` (fragmentation unsupported).
    pub frag: u8,
    /// The datagram's destination (outbound) or origin (inbound) address.
    pub dst: Dst,
    /// The opaque application payload.
    pub data: Vec<u8>,
}

impl UdpDatagram {
    /// Wraps `data` addressed to `dst` with a fresh header (`RSV=0`,
    /// `FRAG=0`).
    pub fn new(dst: Dst, data: Vec<u8>) -> Self {
        Self {
            rsv: 0x0000,
            frag: 0x00,
            dst,
            data,
        }
    }

    /// Parses a datagram from a raw UDP payload. Rejects `RSV != 0x0000`
    /// and `FRAG != 0` (§8 invariant 6), and any unsupported or malformed
    /// address (§8 invariant 5).
    pub fn parse_from_slice(buf: &[u8]) -> Result<Self, SocksError> {
        if buf.len() < 4 {
            return Err(SocksError::MessageTooShort);
        }

        let rsv = u16::from_be_bytes([buf[0], buf[1]]);
        if rsv != 0x0000 {
            return Err(SocksError::Malformed("RSV must be 0x0000"));
        }

        let frag = buf[2];
        if frag != 0x00 {
            return Err(SocksError::Malformed("fragmentation is not supported"));
        }

        let (dst, used) = Dst::parse_from_slice(&buf[3..])?;
        let data = buf[3 + used..].to_vec();

        Ok(Self {
            rsv,
            frag,
            dst,
            data,
        })
    }

    /// Serializes `[RSV, FRAG, ATYP, DST.ADDR, DST.PORT, DATA]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len() + 16);
        buf.extend_from_slice(&self.rsv.to_be_bytes());
        buf.push(self.frag);
        buf.extend_from_slice(&self.dst.to_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}
