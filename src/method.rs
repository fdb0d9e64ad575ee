//! SOCKS5 authentication methods (RFC 1928 §3).
//!
//! - [`FixedMethod`] → reserved values defined in the specification.
//! - [`Method`] → general representation, including fixed, IANA-assigned,
//!   and private-use methods.

use crate::error::SocksError;

/// Fixed authentication methods defined in the SOCKS5 specification.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FixedMethod {
    /// No authentication required (`0x00`).
    NoAuth = 0x00,
    /// GSS-API authentication (`0x01`). Never selected by this server.
    GssApi = 0x01,
    /// Username/password authentication (`0x02`).
    UsePass = 0x02,
    /// No acceptable methods (`0xFF`).
    NoAcceptable = 0xFF,
}

/// Any SOCKS5 authentication method byte: a [`FixedMethod`], an
/// IANA-assigned method (`0x03`-`0x7F`), or a private-use method
/// (`0x80`-`0xFE`).
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Method {
    /// A fixed, reserved method.
    Fixed(FixedMethod),
    /// An IANA-assigned method.
    IanaAssigned(u8),
    /// A private-use method.
    Private(u8),
}

impl Method {
    /// Converts this method into its wire byte.
    pub fn to_u8(self) -> u8 {
        match self {
            Method::Fixed(f) => f as u8,
            Method::IanaAssigned(b) => b,
            Method::Private(b) => b,
        }
    }

    /// Parses a method byte. This never fails: every byte value has a
    /// defined meaning under RFC 1928 §3 (fixed, IANA-assigned, or
    /// private-use).
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x00 => Method::Fixed(FixedMethod::NoAuth),
            0x01 => Method::Fixed(FixedMethod::GssApi),
            0x02 => Method::Fixed(FixedMethod::UsePass),
            0xFF => Method::Fixed(FixedMethod::NoAcceptable),
            0x03..=0x7F => Method::IanaAssigned(byte),
            _ => Method::Private(byte),
        }
    }
}

impl TryFrom<u8> for Method {
    type Error = SocksError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(Method::from_u8(byte))
    }
}
