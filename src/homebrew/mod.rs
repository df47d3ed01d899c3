//! Homebrew IPSC protocol endpoint.
//!
//! An [`Endpoint`] owns one UDP socket and a set of [`Peer`] links. Three
//! long-lived activities share it: the listener (datagram receive and
//! dispatch), the keepalive sweep (one-second timeout/ping evaluation), and
//! caller tasks invoking the send paths. Two locks guard the shared state:
//! the peer registry mutex, held only for map access, and the rx/tx mutex,
//! held across packet dispatch and full broadcasts so frames leave in call
//! order.

mod handler;
mod keepalive;
mod peer;
mod registry;
#[cfg(test)]
mod tests;

pub mod config;
pub mod wire;

pub use config::{RepeaterConfiguration, Timing};
pub use peer::{AuthStatus, LastHeard, Peer, DEFAULT_TALK_GROUP};

use crate::dmr::Packet;
use registry::Registry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{info, warn};

/// Receive callback for DMR data frames.
///
/// Runs on the listener task while inbound processing is serialized, so
/// implementations must not block; offload anything slow.
pub type PacketFunc = Arc<dyn Fn(&Endpoint, &Packet) -> Result<(), ProtocolError> + Send + Sync>;

/// Errors raised by the endpoint and its codecs.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("homebrew: expected {expected} byte frame, got {got}")]
    FrameLength { expected: usize, got: usize },

    #[error("homebrew: unexpected frame kind 0b11")]
    ReservedFrameKind,

    #[error("homebrew: invalid voice burst offset {0}")]
    InvalidVoiceBurst(u8),

    #[error("homebrew: invalid data type {0:#04x}")]
    InvalidDataType(u8),

    #[error("homebrew: invalid repeater id {0:?}")]
    InvalidRepeaterId(String),

    #[error("homebrew: peer {0} not linked")]
    PeerNotLinked(u32),

    #[error("homebrew: peer auth key can't be empty")]
    EmptyAuthKey,

    #[error("homebrew: i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A Homebrew IPSC protocol endpoint.
pub struct Endpoint {
    /// Configuration advertised to masters after login.
    config: RepeaterConfiguration,
    /// Protocol timing tunables.
    timing: Timing,
    /// Our repeater ID in wire form.
    id: [u8; 4],
    /// The bound socket, shared by listener and senders.
    socket: UdpSocket,
    /// Linked peers.
    registry: Registry,
    /// Serializes packet dispatch against broadcasts.
    rxtx: Mutex<()>,
    /// Endpoint-wide receive callback.
    pf: RwLock<Option<PacketFunc>>,
    /// Set by `close`; the listener treats socket errors after this as a
    /// normal shutdown.
    closed: AtomicBool,
    /// Stop signal for the listener and keepalive tasks.
    stop: watch::Sender<bool>,
    /// When the last DMR data frame was dispatched.
    last_frame: StdMutex<Option<Instant>>,
}

impl Endpoint {
    /// Bind a UDP socket and create an endpoint with default timing.
    pub async fn new(
        config: RepeaterConfiguration,
        bind_addr: SocketAddr,
    ) -> Result<Self, ProtocolError> {
        Self::with_timing(config, Timing::default(), bind_addr).await
    }

    /// Bind a UDP socket and create an endpoint with explicit timing.
    pub async fn with_timing(
        config: RepeaterConfiguration,
        timing: Timing,
        bind_addr: SocketAddr,
    ) -> Result<Self, ProtocolError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let (stop, _) = watch::channel(false);

        Ok(Self {
            id: wire::pack_repeater_id(config.id),
            config,
            timing,
            socket,
            registry: Registry::new(),
            rxtx: Mutex::new(()),
            pf: RwLock::new(None),
            closed: AtomicBool::new(false),
            stop,
            last_frame: StdMutex::new(None),
        })
    }

    /// The configuration this endpoint advertises.
    pub fn config(&self) -> &RepeaterConfiguration {
        &self.config
    }

    /// The timing tunables in effect.
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// The locally bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        Ok(self.socket.local_addr()?)
    }

    /// Whether the endpoint has not been closed.
    pub fn active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// When the last DMR data frame was dispatched, if any.
    pub fn last_received(&self) -> Option<Instant> {
        *self.last_frame.lock().expect("last_frame lock poisoned")
    }

    /// Copy out a linked peer by ID.
    pub fn peer(&self, id: u32) -> Option<Peer> {
        self.registry.get(id)
    }

    /// Copy out every linked peer.
    pub fn peers(&self) -> Vec<Peer> {
        self.registry.snapshot()
    }

    /// Number of linked peers.
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// The endpoint-wide receive callback, if set.
    pub fn packet_func(&self) -> Option<PacketFunc> {
        self.pf.read().expect("packet func lock poisoned").clone()
    }

    /// Install or clear the endpoint-wide receive callback.
    ///
    /// When set, received DMR data frames are handed to the callback instead
    /// of the built-in talk-group fan-out. A per-peer
    /// [`Peer::packet_received`] callback takes precedence over this one.
    pub fn set_packet_func(&self, f: Option<PacketFunc>) {
        *self.pf.write().expect("packet func lock poisoned") = f;
    }

    /// Register a peer and, for outgoing peers, start authenticating.
    ///
    /// Resets the peer's liveness timestamps. Incoming peers wait for the
    /// remote to log in; outgoing peers get an `RPTL` sent immediately.
    pub async fn link(&self, mut peer: Peer) -> Result<(), ProtocolError> {
        if peer.auth_key.is_empty() {
            return Err(ProtocolError::EmptyAuthKey);
        }

        peer.last.clear();
        let incoming = peer.incoming;
        let addr = peer.addr;
        self.registry.insert(peer);

        if incoming {
            return Ok(());
        }
        self.handle_auth(addr).await
    }

    /// Remove a peer from the registry.
    pub fn unlink(&self, id: u32) -> Result<(), ProtocolError> {
        self.registry
            .remove(id)
            .map(drop)
            .ok_or(ProtocolError::PeerNotLinked(id))
    }

    /// Serve the socket until [`close`](Self::close) is called.
    ///
    /// Spawns the keepalive task, then reads and dispatches datagrams.
    /// Per-datagram protocol errors are logged and skipped; socket errors
    /// are fatal unless the endpoint was closed first. Returns immediately
    /// when the endpoint is already closed.
    pub async fn listen_and_serve(self: Arc<Self>) -> Result<(), ProtocolError> {
        let mut stop_rx = self.stop.subscribe();
        if !self.active() || *stop_rx.borrow() {
            return Ok(());
        }

        let keepalive = tokio::spawn({
            let endpoint = Arc::clone(&self);
            async move { endpoint.run_keepalive().await }
        });

        let mut buf = [0u8; wire::MAX_FRAME_SIZE];
        let result = loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, remote)) => {
                        if let Err(e) = self.handle_frame(remote, &buf[..n]).await {
                            match e {
                                ProtocolError::Io(_) if self.active() => break Err(e),
                                ProtocolError::Io(_) => break Ok(()),
                                _ => warn!(addr = %remote, error = %e, "dropping frame"),
                            }
                        }
                    }
                    Err(e) => {
                        if !self.active() {
                            break Ok(());
                        }
                        break Err(ProtocolError::Io(e));
                    }
                },
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break Ok(());
                    }
                }
            }
        };

        // Wind the keepalive task down with the listener.
        self.stop.send_replace(true);
        let _ = keepalive.await;

        info!("listener closed");
        result
    }

    /// Close the endpoint.
    ///
    /// Notifies every authenticated peer with `RPTCL` best-effort, then
    /// stops the listener and keepalive tasks. Idempotent.
    pub async fn close(&self) -> Result<(), ProtocolError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("closing");

        for peer in self.registry.snapshot() {
            if peer.status == AuthStatus::Done {
                let frame = wire::tagged(wire::REPEATER_CLOSING, &self.id);
                if let Err(e) = self.write_to_peer(&frame, &peer).await {
                    warn!(peer_id = peer.id, addr = %peer.addr, error = %e, "close notification failed");
                    break;
                }
            }
        }

        self.stop.send_replace(true);
        Ok(())
    }

    /// Broadcast a packet to every linked peer.
    ///
    /// Marshals once and writes to each peer in turn, serialized against
    /// receive dispatch so ordering is preserved end-to-end. Stops at the
    /// first failing peer.
    pub async fn send(&self, p: &Packet) -> Result<(), ProtocolError> {
        let _rxtx = self.rxtx.lock().await;

        let data = wire::build_data(p, self.config.id);
        for peer in self.registry.snapshot() {
            self.write_to_peer(&data, &peer).await?;
        }
        Ok(())
    }

    /// Relay a packet to every peer subscribed to its destination talk
    /// group, skipping the originating peer.
    pub async fn send_tg(&self, p: &Packet, origin: &Peer) -> Result<(), ProtocolError> {
        let data = wire::build_data(p, self.config.id);
        let now = Instant::now();
        let tg_timeout = self.timing.tg_timeout();

        for peer in self.registry.snapshot() {
            if peer.id == origin.id {
                continue;
            }
            if peer.tg_id != p.dst_id {
                continue;
            }
            if !tg_timeout.is_zero() {
                if let Some(subscribed) = peer.last.tg_subscribed {
                    if now.saturating_duration_since(subscribed) > tg_timeout {
                        tracing::debug!(peer_id = peer.id, tg_id = peer.tg_id, "talk-group subscription expired");
                        continue;
                    }
                }
            }

            tracing::debug!(peer_id = peer.id, addr = %peer.addr, "relaying to peer");
            self.write_to_peer(&data, &peer).await?;
        }
        Ok(())
    }

    /// Marshal a packet and write it to one peer.
    pub async fn write_packet_to_peer(&self, p: &Packet, peer: &Peer) -> Result<(), ProtocolError> {
        self.write_to_peer(&wire::build_data(p, self.config.id), peer)
            .await
    }

    /// Write raw bytes to one peer, stamping its packet-sent time.
    pub async fn write_to_peer(&self, data: &[u8], peer: &Peer) -> Result<(), ProtocolError> {
        self.write_to_addr(data, peer.addr).await
    }

    /// Write raw bytes to the peer with the given ID.
    pub async fn write_to_peer_with_id(&self, data: &[u8], id: u32) -> Result<(), ProtocolError> {
        let peer = self
            .registry
            .get(id)
            .ok_or(ProtocolError::PeerNotLinked(id))?;
        self.write_to_peer(data, &peer).await
    }

    pub(crate) async fn write_to_addr(
        &self,
        data: &[u8],
        addr: SocketAddr,
    ) -> Result<(), ProtocolError> {
        self.registry.stamp_packet_sent(&addr, Instant::now());
        self.socket.send_to(data, addr).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.config.id)
            .field("peers", &self.registry.len())
            .field("active", &self.active())
            .finish()
    }
}
