//! SOCKS5 error definitions.
//!
//! This module defines [`SocksError`], the unified error type used across the
//! SOCKS5 implementation. Errors are grouped by protocol phase:
//! - **Version / Method Selection** (RFC 1928 §3).
//! - **Authentication** (RFC 1929).
//! - **Requests, replies and UDP datagrams** (RFC 1928 §4–5, §7).
//! - **General I/O errors** from the underlying transport.
//!
//! Each variant carries enough context to help diagnose protocol violations
//! or unexpected input during parsing. None of these ever reach the wire:
//! the connection machine maps them to a SOCKS reply or a silent close
//! (see [`crate::conn_machine`]).

use thiserror::Error;

/// Represents all possible errors that can occur while using the SOCKS5 server.
#[derive(Debug, Error)]
pub enum SocksError {
    // ===== Version / Method Selection =====
    /// The client requested an unsupported SOCKS protocol version.
    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// The client's version message was missing mandatory fields.
    #[error("version message too short")]
    VersionMessageTooShort,

    /// `NMETHODS` was zero.
    #[error("incomplete version message")]
    IncompleteVersionMessage,

    /// No method offered by the client is acceptable to this server.
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    // ===== Authentication =====
    /// The client used an unsupported authentication sub-negotiation version.
    #[error("authentication version not supported: {0}")]
    UnsupportedAuthVersion(u8),

    /// The authentication message from the client was too short.
    #[error("authentication message too short")]
    AuthMessageTooShort,

    /// The client's authentication attempt failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    // ===== Request / Reply / Addressing =====
    /// The client specified an unsupported address type.
    #[error("unsupported address type: {0}")]
    UnsupportedAtyp(u8),

    /// A domain name's length prefix was zero, or another address field was malformed.
    #[error("malformed protocol field: {0}")]
    Malformed(&'static str),

    /// The request/reply message was too short to contain mandatory fields.
    #[error("message too short")]
    MessageTooShort,

    /// The client requested a command other than CONNECT or UDP ASSOCIATE.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    // ===== Dispatch =====
    /// The outbound CONNECT dial failed.
    #[error("destination unreachable: {0}")]
    Unreachable(#[source] std::io::Error),

    // ===== General =====
    /// A general I/O error occurred in the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The owning [`crate::registry::ConnectionRegistry`] signaled shutdown
    /// while this connection was blocked on a read (§4.5 `closeAll`). Not a
    /// protocol violation: the connection is closed without a reply.
    #[error("connection closed by server shutdown")]
    Shutdown,
}
