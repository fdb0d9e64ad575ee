//! SOCKS5 client request (RFC 1928 §4).
//!
//! ```text
//! +----+-----+-------+------+----------+----------+
//! |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//! +----+-----+-------+------+----------+----------+
//! | 1  |  1  | X'00' |  1   | Variable |    2     |
//! +----+-----+-------+------+----------+----------+
//! ```
//!
//! Validation follows §4.2's documented order: `CMD` is checked right after
//! it is read, before `RSV` or `ATYP` are even looked at. An unsupported
//! `CMD` (`BIND` included) fails parsing immediately with
//! [`SocksError::UnsupportedCommand`] so the connection machine can reply
//! `CmdNotSupported` without caring whether the rest of the frame would
//! otherwise have been malformed.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::addr::Dst;
use crate::error::SocksError;

/// The command requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    /// `CONNECT` (`0x01`): establish a TCP connection to `DST`.
    Connect,
    /// `UDP ASSOCIATE` (`0x03`): reserve a UDP relay association.
    UdpAssociate,
    /// Any other command byte, including `BIND` (`0x02`). `Request::read_from`
    /// never returns a `Request` carrying this variant — it fails the parse
    /// with [`SocksError::UnsupportedCommand`] as soon as the byte is read.
    Other(u8),
}

impl Cmd {
    fn from_u8(byte: u8) -> Self {
        match byte {
            0x01 => Cmd::Connect,
            0x03 => Cmd::UdpAssociate,
            other => Cmd::Other(other),
        }
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cmd::Connect => write!(f, "CONNECT"),
            Cmd::UdpAssociate => write!(f, "UDP_ASSOCIATE"),
            Cmd::Other(b) => write!(f, "UNSUPPORTED(0x{:02X})", b),
        }
    }
}

/// A SOCKS5 request (RFC 1928 §4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Must be `0x05`.
    pub ver: u8,
    /// The requested command.
    pub cmd: Cmd,
    /// Must be `0x00`.
    pub rsv: u8,
    /// The destination address and port.
    pub dst: Dst,
}

impl Request {
    /// Reads a request field-by-field, validating in §4.2's order: `VER`,
    /// then `CMD`, then `RSV`, then `ATYP`. `VER != 5` or `RSV != 0` are
    /// protocol violations with no possible reply. An unsupported `CMD`
    /// fails with [`SocksError::UnsupportedCommand`] before `RSV`/`ATYP` are
    /// read at all, so the caller can reply `CmdNotSupported` regardless of
    /// what the rest of the frame contains. An unsupported `ATYP` fails with
    /// [`SocksError::UnsupportedAtyp`] so the caller can reply
    /// `AddrNotSupported`.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, SocksError> {
        let ver = reader.read_u8().await?;
        if ver != 0x05 {
            return Err(SocksError::UnsupportedVersion(ver));
        }

        let cmd = Cmd::from_u8(reader.read_u8().await?);
        if let Cmd::Other(byte) = cmd {
            return Err(SocksError::UnsupportedCommand(byte));
        }

        let rsv = reader.read_u8().await?;
        if rsv != 0x00 {
            return Err(SocksError::Malformed("RSV must be 0x00"));
        }

        let dst = Dst::read_from(reader).await?;

        Ok(Self { ver, cmd, rsv, dst })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request {{ cmd: {}, dst: {} }}", self.cmd, self.dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_connect_ipv4() {
        let mut buf: &[u8] = &[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50];
        let req = Request::read_from(&mut buf).await.unwrap();
        assert_eq!(req.cmd, Cmd::Connect);
        assert_eq!(req.dst.to_string(), "127.0.0.1:80");
    }

    #[tokio::test]
    async fn bind_is_rejected_as_unsupported_command() {
        let mut buf: &[u8] = &[0x05, 0x02, 0x00, 0x01, 1, 2, 3, 4, 0x00, 0x50];
        let err = Request::read_from(&mut buf).await.unwrap_err();
        assert!(matches!(err, SocksError::UnsupportedCommand(0x02)));
    }

    #[tokio::test]
    async fn unsupported_atyp_fails() {
        let mut buf: &[u8] = &[0x05, 0x01, 0x00, 0x05];
        let err = Request::read_from(&mut buf).await.unwrap_err();
        assert!(matches!(err, SocksError::UnsupportedAtyp(0x05)));
    }

    #[tokio::test]
    async fn unsupported_command_takes_priority_over_bad_rsv_and_atyp() {
        // BIND, with a nonzero RSV and an unsupported ATYP — §4.2 checks
        // CMD first, so neither of those should matter.
        let mut buf: &[u8] = &[0x05, 0x02, 0xFF, 0x05];
        let err = Request::read_from(&mut buf).await.unwrap_err();
        assert!(matches!(err, SocksError::UnsupportedCommand(0x02)));
    }
}
