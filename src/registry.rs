//! Live connection registry (§4.5).
//!
//! Tracks one [`ConnectionHandle`] per connected client IP, keyed by
//! [`IpAddr`] only (port is not part of the key — a preserved open
//! question, see DESIGN.md). Grounded in the original implementation's
//! `socks_connections.go`, which keeps the same add/remove/get/closeAll
//! shape over a `map[string]*SocksConnection` guarded by a mutex.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::udp_association::UdpAssociation;

/// Shared state for one client connection, reachable by IP from anywhere
/// else in the server (e.g. the UDP read loop looking up which
/// association owns an incoming datagram's source IP).
pub struct ConnectionHandle {
    peer_ip: IpAddr,
    udp_association: Mutex<Option<Arc<UdpAssociation>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionHandle {
    /// Creates a handle for `peer_ip`. `shutdown_rx` is handed to the TCP
    /// relay (and any UDP association) so both observe teardown.
    pub fn new(peer_ip: IpAddr) -> (Arc<Self>, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::new(Self {
            peer_ip,
            udp_association: Mutex::new(None),
            shutdown_tx,
        });
        (handle, shutdown_rx)
    }

    pub fn peer_ip(&self) -> IpAddr {
        self.peer_ip
    }

    /// Attaches a UDP association created in response to this connection's
    /// `UDP ASSOCIATE` request.
    pub async fn set_udp_association(&self, assoc: Arc<UdpAssociation>) {
        *self.udp_association.lock().await = Some(assoc);
    }

    /// The association this connection holds, if any.
    pub async fn udp_association(&self) -> Option<Arc<UdpAssociation>> {
        self.udp_association.lock().await.clone()
    }

    /// Signals teardown to the TCP relay and any UDP association reader
    /// spawned on this connection's behalf.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Tracks every currently-connected client by IP (§4.5).
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<IpAddr, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle`, overwriting any existing entry for the same IP.
    /// The displaced connection (if any) is not closed here; its own
    /// cleanup path removes itself via [`Self::remove`], which is guarded
    /// against clobbering the newer entry.
    pub async fn add(&self, handle: Arc<ConnectionHandle>) {
        self.connections
            .lock()
            .await
            .insert(handle.peer_ip(), handle);
    }

    /// Removes `handle`'s entry, but only if it is still the entry
    /// currently mapped for that IP — prevents a displaced connection's
    /// deferred cleanup from evicting a newer connection sharing the same
    /// IP.
    pub async fn remove(&self, handle: &Arc<ConnectionHandle>) {
        let mut connections = self.connections.lock().await;
        if let Some(current) = connections.get(&handle.peer_ip()) {
            if Arc::ptr_eq(current, handle) {
                connections.remove(&handle.peer_ip());
            }
        }
    }

    /// Looks up the live connection for `ip`, if any.
    pub async fn get(&self, ip: IpAddr) -> Option<Arc<ConnectionHandle>> {
        self.connections.lock().await.get(&ip).cloned()
    }

    /// Signals every live connection to tear down. Used on server
    /// shutdown.
    pub async fn close_all(&self) {
        for handle in self.connections.lock().await.values() {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new(ip());
        registry.add(handle.clone()).await;

        let found = registry.get(ip()).await.unwrap();
        assert!(Arc::ptr_eq(&found, &handle));
    }

    #[tokio::test]
    async fn remove_is_noop_if_displaced() {
        let registry = ConnectionRegistry::new();
        let (old_handle, _rx1) = ConnectionHandle::new(ip());
        let (new_handle, _rx2) = ConnectionHandle::new(ip());

        registry.add(old_handle.clone()).await;
        registry.add(new_handle.clone()).await;

        registry.remove(&old_handle).await;

        let found = registry.get(ip()).await.unwrap();
        assert!(Arc::ptr_eq(&found, &new_handle));
    }

    #[tokio::test]
    async fn remove_current_clears_entry() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new(ip());
        registry.add(handle.clone()).await;
        registry.remove(&handle).await;
        assert!(registry.get(ip()).await.is_none());
    }

    #[tokio::test]
    async fn close_all_signals_every_connection() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = ConnectionHandle::new(ip());
        registry.add(handle).await;

        registry.close_all().await;
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
