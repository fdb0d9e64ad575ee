//! Username/password authentication reply (RFC 1929 §2).
//!
//! ```text
//! +----+--------+
//! |VER | STATUS |
//! +----+--------+
//! |  1 |   1    |
//! +----+--------+
//! ```
//!
//! If `STATUS` is non-zero the client must close the connection; this
//! server always closes its side too (§4.2).

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::SocksError;

/// Outcome of username/password authentication.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// Authentication succeeded (`STATUS = 0x00`).
    Success = 0x00,
    /// Authentication failed (any non-zero `STATUS`; this server always
    /// emits `0x01`).
    Failure = 0x01,
}

/// The authentication reply sent by the server (RFC 1929 §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthReply {
    /// Always `0x01`.
    pub ver: u8,
    /// The authentication outcome.
    pub status: AuthStatus,
}

impl AuthReply {
    /// Builds a reply with the given status.
    pub fn new(status: AuthStatus) -> Self {
        Self { ver: 0x01, status }
    }

    /// Serializes this reply to its 2-byte wire form.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.ver, self.status as u8]
    }

    /// Writes this reply to `writer`.
    pub async fn write_to<W: AsyncWrite + Unpin>(self, writer: &mut W) -> Result<(), SocksError> {
        writer.write_all(&self.to_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_round_trips() {
        assert_eq!(AuthReply::new(AuthStatus::Success).to_bytes(), [0x01, 0x00]);
    }

    #[test]
    fn failure_round_trips() {
        assert_eq!(AuthReply::new(AuthStatus::Failure).to_bytes(), [0x01, 0x01]);
    }
}
