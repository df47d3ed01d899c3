//! Peer registry.
//!
//! Peers are reachable by remote address (datagram dispatch) and by numeric
//! ID (embedder API). Both views are kept consistent under a single mutex:
//! the address map owns the peer, the ID map is an inverse index. The lock
//! is only ever held for map access; dispatch works on cloned snapshots.

use super::peer::Peer;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

#[derive(Default)]
struct Inner {
    by_addr: HashMap<SocketAddr, Peer>,
    by_id: HashMap<u32, SocketAddr>,
}

/// Thread-safe dual-index peer map.
pub(crate) struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("peer registry lock poisoned")
    }

    /// Insert a peer, evicting any stale entry under either index so that
    /// the address and ID views stay a bijection.
    pub fn insert(&self, peer: Peer) {
        let mut inner = self.lock();

        if let Some(prev_addr) = inner.by_id.get(&peer.id).copied() {
            if prev_addr != peer.addr {
                inner.by_addr.remove(&prev_addr);
            }
        }
        let prev_id = inner.by_addr.get(&peer.addr).map(|p| p.id);
        if let Some(prev_id) = prev_id {
            if prev_id != peer.id {
                inner.by_id.remove(&prev_id);
            }
        }

        inner.by_id.insert(peer.id, peer.addr);
        inner.by_addr.insert(peer.addr, peer);
    }

    /// Remove a peer by ID, returning it if present.
    pub fn remove(&self, id: u32) -> Option<Peer> {
        let mut inner = self.lock();
        let addr = inner.by_id.remove(&id)?;
        inner.by_addr.remove(&addr)
    }

    /// Copy out a peer by ID.
    pub fn get(&self, id: u32) -> Option<Peer> {
        let inner = self.lock();
        let addr = inner.by_id.get(&id)?;
        inner.by_addr.get(addr).cloned()
    }

    /// Copy out a peer by remote address.
    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<Peer> {
        self.lock().by_addr.get(addr).cloned()
    }

    /// Copy out every peer. Callers iterate without holding the lock.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.lock().by_addr.values().cloned().collect()
    }

    /// Run a mutation against the peer at `addr`, if registered.
    pub fn with_peer_mut<R>(&self, addr: &SocketAddr, f: impl FnOnce(&mut Peer) -> R) -> Option<R> {
        self.lock().by_addr.get_mut(addr).map(f)
    }

    /// Stamp the packet-sent time without cloning the peer.
    pub fn stamp_packet_sent(&self, addr: &SocketAddr, now: Instant) {
        self.with_peer_mut(addr, |p| p.last.packet_sent = Some(now));
    }

    pub fn len(&self) -> usize {
        self.lock().by_addr.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homebrew::AuthStatus;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().expect("valid addr")
    }

    fn peer(id: u32, port: u16) -> Peer {
        Peer::outgoing(id, addr(port), b"key".to_vec())
    }

    /// A peer is in the address index iff it is in the ID index.
    fn assert_bijection(reg: &Registry) {
        let inner = reg.lock();
        assert_eq!(inner.by_addr.len(), inner.by_id.len());
        for (id, a) in &inner.by_id {
            let p = inner.by_addr.get(a).expect("id index points at a peer");
            assert_eq!(p.id, *id);
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let reg = Registry::new();
        reg.insert(peer(1, 62001));
        reg.insert(peer(2, 62002));

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get(1).expect("registered").addr, addr(62001));
        assert_eq!(reg.get_by_addr(&addr(62002)).expect("registered").id, 2);
        assert!(reg.get(3).is_none());
        assert_bijection(&reg);
    }

    #[test]
    fn test_remove_clears_both_indexes() {
        let reg = Registry::new();
        reg.insert(peer(1, 62001));
        assert!(reg.remove(1).is_some());
        assert!(reg.get(1).is_none());
        assert!(reg.get_by_addr(&addr(62001)).is_none());
        assert!(reg.remove(1).is_none());
        assert_bijection(&reg);
    }

    #[test]
    fn test_reinsert_same_id_new_addr_evicts_old_addr() {
        let reg = Registry::new();
        reg.insert(peer(1, 62001));
        reg.insert(peer(1, 62002));

        assert_eq!(reg.len(), 1);
        assert!(reg.get_by_addr(&addr(62001)).is_none());
        assert_eq!(reg.get(1).expect("registered").addr, addr(62002));
        assert_bijection(&reg);
    }

    #[test]
    fn test_reinsert_same_addr_new_id_evicts_old_id() {
        let reg = Registry::new();
        reg.insert(peer(1, 62001));
        reg.insert(peer(2, 62001));

        assert_eq!(reg.len(), 1);
        assert!(reg.get(1).is_none());
        assert_eq!(reg.get(2).expect("registered").addr, addr(62001));
        assert_bijection(&reg);
    }

    #[test]
    fn test_with_peer_mut() {
        let reg = Registry::new();
        reg.insert(peer(1, 62001));
        let changed = reg.with_peer_mut(&addr(62001), |p| {
            p.status = AuthStatus::Done;
            p.id
        });
        assert_eq!(changed, Some(1));
        assert_eq!(reg.get(1).expect("registered").status, AuthStatus::Done);
        assert!(reg.with_peer_mut(&addr(62009), |_| ()).is_none());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let reg = Registry::new();
        reg.insert(peer(1, 62001));
        let snap = reg.snapshot();
        reg.remove(1);
        assert_eq!(snap.len(), 1);
        assert_eq!(reg.len(), 0);
    }
}
