//! Per-client UDP relay state (§4.4).
//!
//! A [`UdpAssociation`] is created when a client issues `UDP ASSOCIATE`. It
//! binds a single destination: the first client-to-destination datagram
//! dials the upstream UDP socket, and every later datagram through this
//! association reuses it — its own `DST` field is ignored on egress after
//! that point (§9, a preserved known limitation, not a bug to fix here).
//! On ingress, the most recently observed `DST` is used to tag the header
//! wrapping the destination's reply (§8 invariant 4).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};

use crate::addr::Dst;
use crate::udp_datagram::UdpDatagram;

const UDP_DEADLINE: Duration = Duration::from_secs(60);
const MAX_DATAGRAM: usize = 65507;

/// Per-client UDP relay state, one per `UDP ASSOCIATE`.
pub struct UdpAssociation {
    /// The UDP source the client claimed in its request, or the client's
    /// TCP peer IP+port if it claimed `0.0.0.0:0` (§3).
    client_addr_for_access_limit: SocketAddr,
    /// The actual UDP source observed on the first datagram.
    client_addr: Mutex<Option<SocketAddr>>,
    /// Lazily dialed upstream socket; one association handles exactly one
    /// destination (§4.4, §9).
    upstream: Mutex<Option<Arc<UdpSocket>>>,
    /// The `DST` of the most recent client-to-destination datagram, used to
    /// tag the header on the next destination-to-client datagram.
    last_dst: Mutex<Option<Dst>>,
    /// The server's single shared UDP socket, used to send replies back to
    /// the client's observed source.
    shared_socket: Arc<UdpSocket>,
    /// Fires when the owning TCP connection closes.
    closed: watch::Receiver<bool>,
}

impl UdpAssociation {
    /// Creates a new association. `closed` transitions to `true` when the
    /// owning TCP connection ends; the background upstream reader observes
    /// it between reads and exits.
    pub fn new(
        client_addr_for_access_limit: SocketAddr,
        shared_socket: Arc<UdpSocket>,
        closed: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client_addr_for_access_limit,
            client_addr: Mutex::new(None),
            upstream: Mutex::new(None),
            last_dst: Mutex::new(None),
            shared_socket,
            closed,
        })
    }

    /// The address used to gate which client source is allowed to send
    /// through this association (currently informational: the server
    /// routes by source IP via the registry, §4.6).
    pub fn client_addr_for_access_limit(&self) -> SocketAddr {
        self.client_addr_for_access_limit
    }

    /// Records the UDP source observed on an incoming client datagram.
    pub async fn note_client_addr(&self, addr: SocketAddr) {
        let mut guard = self.client_addr.lock().await;
        if guard.is_none() {
            *guard = Some(addr);
        } else {
            *guard = Some(addr);
        }
    }

    /// Forwards a client-to-destination datagram's payload to the upstream
    /// socket, dialing it on first use. Subsequent calls reuse the same
    /// upstream socket regardless of `datagram.dst` (§9).
    pub async fn relay_to_destination(
        self: &Arc<Self>,
        datagram: UdpDatagram,
    ) -> std::io::Result<()> {
        *self.last_dst.lock().await = Some(datagram.dst.clone());
        let upstream = self.ensure_upstream(&datagram.dst).await?;
        upstream.send(&datagram.data).await?;
        Ok(())
    }

    async fn ensure_upstream(self: &Arc<Self>, dst: &Dst) -> std::io::Result<Arc<UdpSocket>> {
        let mut guard = self.upstream.lock().await;
        if let Some(sock) = guard.as_ref() {
            return Ok(sock.clone());
        }

        let sock = UdpSocket::bind("0.0.0.0:0").await?;
        sock.connect(dst.to_string()).await?;
        let sock = Arc::new(sock);
        *guard = Some(sock.clone());
        drop(guard);

        let this = Arc::clone(self);
        let upstream_for_task = sock.clone();
        tokio::spawn(async move { this.run_upstream_reader(upstream_for_task).await });

        Ok(sock)
    }

    async fn run_upstream_reader(self: Arc<Self>, upstream: Arc<UdpSocket>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut closed = self.closed.clone();

        loop {
            if *closed.borrow() {
                break;
            }

            let n = tokio::select! {
                _ = closed.changed() => break,
                res = tokio::time::timeout(UDP_DEADLINE, upstream.recv(&mut buf)) => {
                    match res {
                        Ok(Ok(n)) => n,
                        Ok(Err(_)) | Err(_) => break,
                    }
                }
            };

            let dst = match self.last_dst.lock().await.clone() {
                Some(dst) => dst,
                None => continue,
            };
            let client_addr = *self.client_addr.lock().await;
            let Some(client_addr) = client_addr else {
                continue;
            };

            let datagram = UdpDatagram::new(dst, buf[..n].to_vec());
            let _ = self
                .shared_socket
                .send_to(&datagram.to_bytes(), client_addr)
                .await;
        }
    }
}
