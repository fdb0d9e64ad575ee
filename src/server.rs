//! The server (§4.6): binds one TCP listener and one UDP socket on the
//! same port, accepts TCP connections into [`ConnectionMachine`] tasks, and
//! dispatches incoming UDP datagrams to the association owned by the
//! connection matching their source IP.
//!
//! Grounded in the original implementation's `server.go` (`Start`, a
//! `Ready` channel signaling both sockets are bound, `Close` tearing down
//! every live connection) — the `Ready` channel becomes a `tokio::sync`
//! `oneshot`, and `Close` becomes [`ConnectionRegistry::close_all`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::conn_machine::ConnectionMachine;
use crate::error::SocksError;
use crate::registry::ConnectionRegistry;
use crate::udp_datagram::UdpDatagram;

/// The running SOCKS5 server.
pub struct Server {
    listener: TcpListener,
    udp_socket: Arc<UdpSocket>,
    config: Arc<Config>,
    registry: Arc<ConnectionRegistry>,
}

impl Server {
    /// Binds the TCP listener and UDP socket on `config.port`.
    pub async fn bind(config: Config) -> Result<Self, SocksError> {
        let addr = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&addr).await?;
        let udp_socket = UdpSocket::bind(&addr).await?;

        info!(%addr, "socks5 server bound");

        Ok(Self {
            listener,
            udp_socket: Arc::new(udp_socket),
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    /// The address the TCP listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that can signal every live connection to tear down, for use
    /// from outside `run` (e.g. a `SIGINT` handler in `main`).
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Runs the TCP accept loop and UDP read loop concurrently until one of
    /// them hits a fatal error. `ready` fires (if provided) once both
    /// sockets are confirmed bound, letting tests avoid a race against
    /// `run`'s first `.await`.
    pub async fn run(self, ready: Option<oneshot::Sender<()>>) -> Result<(), SocksError> {
        if let Some(ready) = ready {
            let _ = ready.send(());
        }

        let tcp_loop = self.run_tcp_loop();
        let udp_loop = self.run_udp_loop();

        tokio::select! {
            res = tcp_loop => res,
            res = udp_loop => res,
        }
    }

    async fn run_tcp_loop(&self) -> Result<(), SocksError> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            info!(peer = %peer_addr, "accepted connection");

            let machine = ConnectionMachine::new(
                stream,
                peer_addr,
                self.config.clone(),
                self.registry.clone(),
                self.udp_socket.clone(),
            );
            tokio::spawn(machine.run());
        }
    }

    async fn run_udp_loop(&self) -> Result<(), SocksError> {
        let mut buf = vec![0u8; 65535];
        loop {
            let (n, source) = self.udp_socket.recv_from(&mut buf).await?;
            let payload = buf[..n].to_vec();
            let registry = self.registry.clone();
            let socket = self.udp_socket.clone();

            tokio::spawn(async move {
                if let Err(err) = dispatch_udp_datagram(&registry, &socket, source, payload).await
                {
                    warn!(%source, error = %err, "dropping malformed UDP datagram");
                }
            });
        }
    }
}

async fn dispatch_udp_datagram(
    registry: &ConnectionRegistry,
    _socket: &UdpSocket,
    source: SocketAddr,
    payload: Vec<u8>,
) -> Result<(), SocksError> {
    let datagram = UdpDatagram::parse_from_slice(&payload)?;

    let handle = match registry.get(source.ip()).await {
        Some(handle) => handle,
        None => {
            warn!(%source, "UDP datagram from a source with no associated connection");
            return Ok(());
        }
    };

    let association = match handle.udp_association().await {
        Some(assoc) => assoc,
        None => {
            warn!(%source, "UDP datagram before UDP ASSOCIATE completed");
            return Ok(());
        }
    };

    association.note_client_addr(source).await;
    association
        .relay_to_destination(datagram)
        .await
        .map_err(SocksError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::addr::Dst;
    use crate::udp_datagram::UdpDatagram;

    #[tokio::test]
    async fn accepts_and_completes_no_auth_connect() {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = upstream_listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(b"pong").await.unwrap();
        });

        let mut config = Config::default();
        config.port = 0;
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        tokio::spawn(server.run(Some(tx)));
        rx.await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);

        let mut req = vec![0x05, 0x01, 0x00, 0x01];
        if let std::net::IpAddr::V4(ip) = upstream_addr.ip() {
            req.extend_from_slice(&ip.octets());
        }
        req.extend_from_slice(&upstream_addr.port().to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut header = [0u8; 10];
        client.read_exact(&mut header).await.unwrap();
        assert_eq!(header[1], 0x00);

        client.write_all(b"ping").await.unwrap();
        let mut reply_payload = [0u8; 4];
        client.read_exact(&mut reply_payload).await.unwrap();
        assert_eq!(&reply_payload, b"pong");
    }

    #[tokio::test]
    async fn udp_associate_end_to_end() {
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                let (n, from) = match echo.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(_) => return,
                };
                let _ = echo.send_to(&buf[..n], from).await;
            }
        });

        let mut config = Config::default();
        config.port = 0;
        config.hostname = "proxy.example".to_string();
        let server = Server::bind(config).await.unwrap();
        let tcp_addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        tokio::spawn(server.run(Some(tx)));
        rx.await.unwrap();

        // Negotiate NO AUTHENTICATION REQUIRED, then UDP ASSOCIATE with
        // DST = 0.0.0.0:0 (client doesn't yet know its own UDP source).
        let mut client = TcpStream::connect(tcp_addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [0x05, 0x00]);

        client
            .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        let mut head = [0u8; 3];
        client.read_exact(&mut head).await.unwrap();
        assert_eq!(head, [0x05, 0x00, 0x00]);
        let bnd = Dst::read_from(&mut client).await.unwrap();
        let udp_port = match &bnd {
            Dst::Domain(host, port) => {
                assert_eq!(host, "proxy.example");
                *port
            }
            other => panic!("expected a domain BND.ADDR, got {other:?}"),
        };

        // A fake client UDP socket, distinct from the TCP connection, but on
        // the same loopback IP the registry dispatches UDP datagrams by.
        let client_udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_udp_addr = SocketAddr::new(tcp_addr.ip(), udp_port);

        let outbound = UdpDatagram::new(Dst::from_socket_addr(echo_addr), b"hello".to_vec());
        client_udp
            .send_to(&outbound.to_bytes(), server_udp_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let (n, from) = client_udp.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, server_udp_addr);
        let inbound = UdpDatagram::parse_from_slice(&buf[..n]).unwrap();
        assert_eq!(inbound.dst, Dst::from_socket_addr(echo_addr));
        assert_eq!(inbound.data, b"hello");

        // Keep the TCP connection (and with it the association) alive until
        // the relay has been exercised.
        drop(client);
    }
}
