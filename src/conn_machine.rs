//! The per-connection state machine (§4.2): Negotiation → [Auth] → Request
//! → Dispatch → relay/hold → close.
//!
//! Replaces the teacher's free-floating `Socks5::authenticate` /
//! `read_conn_request` / `send_conn_reply` associated functions with a
//! single object sequencing the whole exchange over one accepted
//! `TcpStream`, and owning the connection's registry entry and (if
//! requested) its `UdpAssociation` for the lifetime of the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::addr::Dst;
use crate::auth::reply::{AuthReply, AuthStatus};
use crate::auth::request::AuthRequest;
use crate::config::Config;
use crate::error::SocksError;
use crate::method::{FixedMethod, Method};
use crate::negotiation::{NegotiationReply, NegotiationRequest};
use crate::registry::ConnectionRegistry;
use crate::relay::relay;
use crate::reply::{Rep, Reply};
use crate::request::{Cmd, Request};
use crate::udp_association::UdpAssociation;

/// Drives one accepted connection through the full SOCKS5 exchange.
pub struct ConnectionMachine {
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<Config>,
    registry: Arc<ConnectionRegistry>,
    shared_udp: Arc<UdpSocket>,
}

impl ConnectionMachine {
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        config: Arc<Config>,
        registry: Arc<ConnectionRegistry>,
        shared_udp: Arc<UdpSocket>,
    ) -> Self {
        Self {
            stream,
            peer_addr,
            config,
            registry,
            shared_udp,
        }
    }

    /// Runs the connection to completion. Registers this connection's
    /// handle on entry and deregisters it on every exit path, successful or
    /// not.
    pub async fn run(self) {
        let peer_addr = self.peer_addr;
        let registry = self.registry.clone();
        let (handle, shutdown_rx) = crate::registry::ConnectionHandle::new(peer_addr.ip());
        registry.add(handle.clone()).await;

        match self.serve(handle.clone(), shutdown_rx).await {
            Ok(()) => debug!(peer = %peer_addr, "connection closed"),
            Err(SocksError::Shutdown) => {
                debug!(peer = %peer_addr, "connection closed by server shutdown")
            }
            Err(err) => warn!(peer = %peer_addr, error = %err, "connection terminated"),
        }

        handle.close();
        registry.remove(&handle).await;
    }

    /// Drives Negotiation → [Auth] → Request → Dispatch. Every blocking read
    /// in this sequence — and the `UDP ASSOCIATE` hold loop it may dispatch
    /// into — races `shutdown_rx.changed()` so that
    /// [`ConnectionRegistry::close_all`](crate::registry::ConnectionRegistry::close_all)
    /// actually terminates a connection idling here, not just one already in
    /// the TCP relay or a UDP association's upstream reader (§4.5).
    async fn serve(
        mut self,
        handle: Arc<crate::registry::ConnectionHandle>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), SocksError> {
        let negotiation = tokio::select! {
            res = NegotiationRequest::read_from(&mut self.stream) => res?,
            _ = shutdown_rx.changed() => return Err(SocksError::Shutdown),
        };
        let method = self.select_method(&negotiation);

        NegotiationReply::new(method)
            .write_to(&mut self.stream)
            .await?;

        if method == Method::Fixed(FixedMethod::NoAcceptable) {
            return Err(SocksError::NoAcceptableMethod);
        }

        if method == Method::Fixed(FixedMethod::UsePass) {
            self.authenticate(&mut shutdown_rx).await?;
        }

        let request = tokio::select! {
            res = Request::read_from(&mut self.stream) => res,
            _ = shutdown_rx.changed() => return Err(SocksError::Shutdown),
        };
        let request = match request {
            Ok(request) => request,
            Err(SocksError::UnsupportedCommand(byte)) => {
                Reply::error(Rep::CmdNotSupported)
                    .write_to(&mut self.stream)
                    .await?;
                return Err(SocksError::UnsupportedCommand(byte));
            }
            Err(SocksError::UnsupportedAtyp(byte)) => {
                Reply::error(Rep::AddrNotSupported)
                    .write_to(&mut self.stream)
                    .await?;
                return Err(SocksError::UnsupportedAtyp(byte));
            }
            Err(err) => return Err(err),
        };
        let peer_addr = self.peer_addr;
        info!(peer = %peer_addr, cmd = %request.cmd, dst = %request.dst, "request");

        match request.cmd {
            Cmd::Connect => self.handle_connect(request.dst, shutdown_rx).await,
            Cmd::UdpAssociate => {
                self.handle_udp_associate(request.dst, handle, shutdown_rx).await
            }
            Cmd::Other(_) => unreachable!(
                "Request::read_from rejects unsupported commands before returning Ok"
            ),
        }
    }

    fn select_method(&self, negotiation: &NegotiationRequest) -> Method {
        let wants_userpass = Method::Fixed(FixedMethod::UsePass);
        let wants_no_auth = Method::Fixed(FixedMethod::NoAuth);

        if self.config.credentials().is_some() && negotiation.offers(wants_userpass) {
            wants_userpass
        } else if self.config.credentials().is_none() && negotiation.offers(wants_no_auth) {
            wants_no_auth
        } else {
            Method::Fixed(FixedMethod::NoAcceptable)
        }
    }

    async fn authenticate(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<(), SocksError> {
        let request = tokio::select! {
            res = AuthRequest::read_from(&mut self.stream) => res?,
            _ = shutdown_rx.changed() => return Err(SocksError::Shutdown),
        };
        let (expected_user, expected_pass) = self
            .config
            .credentials()
            .expect("UsePass only selected when credentials are configured");

        if request.uname == expected_user && request.passwd == expected_pass {
            AuthReply::new(AuthStatus::Success)
                .write_to(&mut self.stream)
                .await?;
            Ok(())
        } else {
            AuthReply::new(AuthStatus::Failure)
                .write_to(&mut self.stream)
                .await?;
            Err(SocksError::AuthFailed("invalid username or password".into()))
        }
    }

    async fn handle_connect(
        mut self,
        dst: Dst,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), SocksError> {
        let upstream = match TcpStream::connect(dst.to_string()).await {
            Ok(stream) => stream,
            Err(err) => {
                Reply::error(Rep::HostUnreach)
                    .write_to(&mut self.stream)
                    .await?;
                return Err(SocksError::Unreachable(err));
            }
        };

        let bnd = Dst::from_socket_addr(upstream.local_addr()?);
        Reply::new(Rep::Succeeded, bnd)
            .write_to(&mut self.stream)
            .await?;

        relay(self.stream, upstream, shutdown_rx).await;
        Ok(())
    }

    async fn handle_udp_associate(
        mut self,
        requested: Dst,
        handle: Arc<crate::registry::ConnectionHandle>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), SocksError> {
        let client_addr_for_access_limit = if requested.port() == 0 {
            self.peer_addr
        } else {
            SocketAddr::new(self.peer_addr.ip(), requested.port())
        };

        let association = UdpAssociation::new(
            client_addr_for_access_limit,
            self.shared_udp.clone(),
            shutdown_rx.clone(),
        );
        handle.set_udp_association(association).await;

        let bnd = Dst::Domain(
            self.config.hostname.clone(),
            self.shared_udp.local_addr()?.port(),
        );
        Reply::new(Rep::Succeeded, bnd)
            .write_to(&mut self.stream)
            .await?;

        // The association lives as long as this TCP connection does (§4.4);
        // holding the read here blocks until the client disconnects or the
        // registry signals shutdown (§4.5 `closeAll`).
        let mut buf = [0u8; 1];
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return Err(SocksError::Shutdown),
                res = tokio::io::AsyncReadExt::read(&mut self.stream, &mut buf) => {
                    match res {
                        Ok(0) => return Ok(()),
                        Ok(_) => continue,
                        Err(err) => return Err(SocksError::Io(err)),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, UdpSocket as TokioUdp};

    fn config_no_auth() -> Arc<Config> {
        Arc::new(Config::default())
    }

    #[tokio::test]
    async fn negotiates_no_auth_and_connects() {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = upstream_listener.accept().await;
        });

        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_listener.local_addr().unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let shared_udp = Arc::new(TokioUdp::bind("127.0.0.1:0").await.unwrap());
        let config = config_no_auth();

        let registry_clone = registry.clone();
        let shared_udp_clone = shared_udp.clone();
        tokio::spawn(async move {
            let (stream, peer) = server_listener.accept().await.unwrap();
            let machine = ConnectionMachine::new(
                stream,
                peer,
                config,
                registry_clone,
                shared_udp_clone,
            );
            machine.run().await;
        });

        let mut client = TcpStream::connect(server_addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);

        let mut req = vec![0x05, 0x01, 0x00, 0x01];
        req.extend_from_slice(&match upstream_addr.ip() {
            std::net::IpAddr::V4(ip) => ip.octets(),
            _ => unreachable!(),
        });
        req.extend_from_slice(&upstream_addr.port().to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut header = [0u8; 4];
        client.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], 0x05);
        assert_eq!(header[1], 0x00); // succeeded
        assert_eq!(header[3], 0x01); // ATYP=IPv4
        let mut rest = [0u8; 6];
        client.read_exact(&mut rest).await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_command_gets_cmd_not_supported() {
        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_listener.local_addr().unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let shared_udp = Arc::new(TokioUdp::bind("127.0.0.1:0").await.unwrap());
        let config = config_no_auth();

        tokio::spawn(async move {
            let (stream, peer) = server_listener.accept().await.unwrap();
            let machine = ConnectionMachine::new(stream, peer, config, registry, shared_udp);
            machine.run().await;
        });

        let mut client = TcpStream::connect(server_addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        // BIND (0x02)
        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut header = [0u8; 4];
        client.read_exact(&mut header).await.unwrap();
        assert_eq!(header[1], Rep::CmdNotSupported as u8);
    }

    #[tokio::test]
    async fn malformed_atyp_gets_addr_not_supported() {
        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_listener.local_addr().unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let shared_udp = Arc::new(TokioUdp::bind("127.0.0.1:0").await.unwrap());
        let config = config_no_auth();

        tokio::spawn(async move {
            let (stream, peer) = server_listener.accept().await.unwrap();
            let machine = ConnectionMachine::new(stream, peer, config, registry, shared_udp);
            machine.run().await;
        });

        let mut client = TcpStream::connect(server_addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        // CONNECT with ATYP=0x05 (unsupported)
        client
            .write_all(&[0x05, 0x01, 0x00, 0x05])
            .await
            .unwrap();

        let mut header = [0u8; 10];
        client.read_exact(&mut header).await.unwrap();
        assert_eq!(
            header,
            [0x05, Rep::AddrNotSupported as u8, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn username_password_failure_closes_connection() {
        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_listener.local_addr().unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let shared_udp = Arc::new(TokioUdp::bind("127.0.0.1:0").await.unwrap());
        let config = Arc::new(Config {
            username: Some("alice".into()),
            password: Some("s3cret".into()),
            ..Config::default()
        });

        tokio::spawn(async move {
            let (stream, peer) = server_listener.accept().await.unwrap();
            let machine = ConnectionMachine::new(stream, peer, config, registry, shared_udp);
            machine.run().await;
        });

        let mut client = TcpStream::connect(server_addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x02]);

        client
            .write_all(&[0x01, 0x05, b'a', b'l', b'i', b'c', b'e', 0x05, b'w', b'r', b'o', b'n', b'g'])
            .await
            .unwrap();

        let mut auth_reply = [0u8; 2];
        client.read_exact(&mut auth_reply).await.unwrap();
        assert_eq!(auth_reply, [0x01, 0x01]);
    }
}
