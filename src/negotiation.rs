//! SOCKS5 method negotiation (RFC 1928 §3).
//!
//! The client opens with a [`NegotiationRequest`] listing the authentication
//! methods it supports; the server answers with a [`NegotiationReply`]
//! naming the one method it selected, or `0xFF` if none are acceptable.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SocksError;
use crate::method::{FixedMethod, Method};

/// Client's version/methods message (RFC 1928 §3).
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    /// Must be `0x05`.
    pub ver: u8,
    /// Methods offered by the client, in the order sent.
    pub methods: Vec<Method>,
}

impl NegotiationRequest {
    /// Reads a negotiation request field-by-field. `VER != 5` is a protocol
    /// violation with no possible reply. `NMETHODS == 0` is malformed.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, SocksError> {
        let ver = reader.read_u8().await?;
        if ver != 0x05 {
            return Err(SocksError::UnsupportedVersion(ver));
        }

        let nmethods = reader.read_u8().await?;
        if nmethods == 0 {
            return Err(SocksError::IncompleteVersionMessage);
        }

        let mut buf = vec![0u8; nmethods as usize];
        reader.read_exact(&mut buf).await?;
        let methods = buf.into_iter().map(Method::from_u8).collect();

        Ok(Self { ver, methods })
    }

    /// Does the client's method list contain `method`?
    pub fn offers(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }
}

/// Server's method selection message (RFC 1928 §3).
///
/// ```text
/// +----+--------+
/// |VER | METHOD |
/// +----+--------+
/// | 1  |   1    |
/// +----+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationReply {
    /// Always `0x05`.
    pub ver: u8,
    /// The method selected by the server, or `0xFF` (no acceptable method).
    pub method: Method,
}

impl NegotiationReply {
    /// Builds a reply selecting `method`.
    pub fn new(method: Method) -> Self {
        Self { ver: 0x05, method }
    }

    /// Convenience constructor for the "no acceptable method" reply.
    pub fn no_acceptable() -> Self {
        Self::new(Method::Fixed(FixedMethod::NoAcceptable))
    }

    /// Serializes this reply to its 2-byte wire form.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.ver, self.method.to_u8()]
    }

    /// Writes this reply to `writer`.
    pub async fn write_to<W: AsyncWrite + Unpin>(self, writer: &mut W) -> Result<(), SocksError> {
        writer.write_all(&self.to_bytes()).await?;
        Ok(())
    }
}
