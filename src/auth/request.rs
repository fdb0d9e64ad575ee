//! Username/password authentication request (RFC 1929 §2).
//!
//! ```text
//! +----+------+----------+------+----------+
//! |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
//! +----+------+----------+------+----------+
//! |  1 |  1   | 1-255    |  1   | 1-255    |
//! +----+------+----------+------+----------+
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::SocksError;

/// An authentication request from a client (RFC 1929 §2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Always `0x01`.
    pub ver: u8,
    /// The username (`UNAME`), 1-255 bytes.
    pub uname: String,
    /// The password (`PASSWD`), 1-255 bytes.
    pub passwd: String,
}

impl AuthRequest {
    /// Reads an authentication request field-by-field. `VER != 1` fails
    /// with [`SocksError::UnsupportedAuthVersion`].
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, SocksError> {
        let ver = reader.read_u8().await?;
        if ver != 0x01 {
            return Err(SocksError::UnsupportedAuthVersion(ver));
        }

        let ulen = reader.read_u8().await?;
        if ulen == 0 {
            return Err(SocksError::AuthMessageTooShort);
        }
        let mut uname = vec![0u8; ulen as usize];
        reader.read_exact(&mut uname).await?;
        let uname = String::from_utf8(uname)
            .map_err(|_| SocksError::Malformed("username is not valid UTF-8"))?;

        let plen = reader.read_u8().await?;
        if plen == 0 {
            return Err(SocksError::AuthMessageTooShort);
        }
        let mut passwd = vec![0u8; plen as usize];
        reader.read_exact(&mut passwd).await?;
        let passwd = String::from_utf8(passwd)
            .map_err(|_| SocksError::Malformed("password is not valid UTF-8"))?;

        Ok(Self { ver, uname, passwd })
    }
}
