//! Per-datagram protocol state machine.
//!
//! Every datagram is looked up by remote address, run through the
//! role-appropriate transition table under the registry lock, and the
//! resulting action (a reply frame, a config upload, an auth step, a packet
//! dispatch) is carried out after the lock is released. Frames that don't
//! fit the current state are logged and dropped, never NAKed, so a
//! misbehaving peer cannot induce reply storms.

use super::config;
use super::peer::{AuthStatus, Peer};
use super::wire;
use super::{Endpoint, ProtocolError};
use crate::dmr::{CallType, Packet};
use rand::rngs::OsRng;
use rand::RngCore;
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Auth key given to repeaters that log in without a pre-linked peer entry.
/// A deployment that knows its repeaters should `link` them up front with
/// real credentials; this placeholder only keeps unknown stations moving
/// through the handshake.
const DEFAULT_AUTH_KEY: &[u8] = b"passw0rd";

/// What a transition decided to do once the registry lock is released.
enum Action {
    None,
    /// Write a frame back to the sender.
    Reply(Vec<u8>),
    /// Upload our configuration record to the sender.
    SendConfig,
    /// Run the outgoing authentication step for the sender.
    Auth,
    /// Drop the peer from the registry.
    Unlink(u32),
    /// Dispatch a decoded DMR data frame.
    Packet(Packet),
}

impl Endpoint {
    /// Dispatch one received datagram.
    pub(crate) async fn handle_frame(
        &self,
        remote: SocketAddr,
        data: &[u8],
    ) -> Result<(), ProtocolError> {
        if self.registry.get_by_addr(&remote).is_none() {
            if data.len() >= wire::MIN_FRAME_SIZE && data.starts_with(wire::REPEATER_LOGIN) {
                let repeater_id = wire::unpack_repeater_id(&data[4..8]);
                debug!(addr = %remote, repeater_id, "login from unknown peer");
                self.link(Peer::incoming(repeater_id, remote, DEFAULT_AUTH_KEY.to_vec()))
                    .await?;
            } else {
                debug!(addr = %remote, len = data.len(), "frame from unknown peer");
                return Ok(());
            }
        }

        // Anything shorter cannot be a Homebrew frame.
        if data.len() < wire::MIN_FRAME_SIZE {
            return Ok(());
        }

        let now = Instant::now();
        let our_id = self.id;
        let action = self
            .registry
            .with_peer_mut(&remote, |peer| {
                peer.last.packet_received = Some(now);
                if peer.status == AuthStatus::Done {
                    decide_authenticated(peer, data, &our_id, now)
                } else {
                    decide_unauthenticated(peer, data, &our_id, now)
                }
            })
            .unwrap_or(Action::None);

        self.apply(action, remote).await
    }

    async fn apply(&self, action: Action, remote: SocketAddr) -> Result<(), ProtocolError> {
        match action {
            Action::None => Ok(()),
            Action::Reply(frame) => self.write_to_addr(&frame, remote).await,
            Action::SendConfig => {
                let data = config::build_config_data(&self.config);
                self.write_to_addr(&data, remote).await
            }
            Action::Auth => self.handle_auth(remote).await,
            Action::Unlink(id) => {
                let _ = self.unlink(id);
                Ok(())
            }
            Action::Packet(p) => match self.registry.get_by_addr(&remote) {
                Some(origin) => self.handle_packet(p, origin).await,
                None => Ok(()),
            },
        }
    }

    /// Advance the outgoing authentication exchange for the peer at `addr`:
    /// send `RPTL` from the None state, the `RPTK` key proof from Begin.
    pub(crate) async fn handle_auth(&self, addr: SocketAddr) -> Result<(), ProtocolError> {
        let frame = self
            .registry
            .with_peer_mut(&addr, |peer| {
                if peer.incoming {
                    return None;
                }
                peer.last.packet_received = Some(Instant::now());

                match peer.status {
                    AuthStatus::None => {
                        peer.last.auth_sent = Some(Instant::now());
                        Some(wire::tagged(wire::REPEATER_LOGIN, &self.id))
                    }
                    AuthStatus::Begin => peer.token.map(|token| {
                        let mut frame = wire::tagged(wire::REPEATER_KEY, &self.id);
                        frame.extend_from_slice(&token);
                        frame
                    }),
                    _ => None,
                }
            })
            .flatten();

        match frame {
            Some(frame) => self.write_to_addr(&frame, addr).await,
            None => Ok(()),
        }
    }

    /// Dispatch a decoded DMR data frame, serialized against sends.
    ///
    /// Dispatch order: the origin peer's own callback, then the
    /// endpoint-wide callback, then the built-in talk-group fan-out (which
    /// also moves the origin's subscription to the call's destination).
    async fn handle_packet(&self, p: Packet, origin: Peer) -> Result<(), ProtocolError> {
        let _rxtx = self.rxtx.lock().await;

        *self.last_frame.lock().expect("last_frame lock poisoned") = Some(Instant::now());

        if let Some(cb) = &origin.packet_received {
            return cb(self, &p);
        }

        match self.packet_func() {
            Some(pf) => pf(self, &p),
            None => match p.call_type {
                CallType::Private => Ok(()),
                CallType::Group => {
                    debug!(peer_id = origin.id, packet = %p, "group call");
                    self.registry.with_peer_mut(&origin.addr, |peer| {
                        peer.tg_id = p.dst_id;
                        peer.last.tg_subscribed = Some(Instant::now());
                    });
                    self.send_tg(&p, &origin).await
                }
            },
        }
    }
}

fn decide_unauthenticated(peer: &mut Peer, data: &[u8], our_id: &[u8; 4], now: Instant) -> Action {
    // DMR data is ignored until the handshake completes.
    if data.starts_with(wire::DMR_DATA) {
        return Action::None;
    }

    if peer.incoming {
        decide_incoming_auth(peer, data, our_id, now)
    } else {
        decide_outgoing_auth(peer, data, our_id, now)
    }
}

fn decide_incoming_auth(peer: &mut Peer, data: &[u8], our_id: &[u8; 4], now: Instant) -> Action {
    match peer.status {
        AuthStatus::None if data.starts_with(wire::REPEATER_LOGIN) => {
            if !peer.check_repeater_id(&data[4..8]) {
                warn!(peer_id = peer.id, addr = %peer.addr, id = ?&data[4..8], "peer sent invalid repeater id (ignored)");
            }

            // Peer is verified, issue a challenge nonce.
            let mut nonce = [0u8; 4];
            if let Err(e) = OsRng.try_fill_bytes(&mut nonce) {
                error!(peer_id = peer.id, addr = %peer.addr, error = %e, "nonce generation failed");
                return Action::Reply(wire::tagged(wire::MASTER_NAK, our_id));
            }

            peer.update_token(&nonce);
            peer.status = AuthStatus::Begin;
            Action::Reply(wire::tagged(wire::REPEATER_ACK, &nonce))
        }
        AuthStatus::Begin if data.starts_with(wire::REPEATER_KEY) => {
            if !peer.check_repeater_id(&data[4..8]) {
                warn!(peer_id = peer.id, addr = %peer.addr, id = ?&data[4..8], "peer sent invalid repeater id (ignored)");
            }

            if data.len() != wire::KEY_FRAME_SIZE {
                error!(peer_id = peer.id, addr = %peer.addr, len = data.len(), "wrong key exchange frame length");
                peer.status = AuthStatus::None;
                return Action::Reply(wire::tagged(wire::MASTER_NAK, our_id));
            }
            if peer.token.as_ref().map(|t| &t[..]) != Some(&data[8..]) {
                error!(peer_id = peer.id, addr = %peer.addr, "invalid key challenge token");
                peer.status = AuthStatus::None;
                return Action::Reply(wire::tagged(wire::MASTER_NAK, our_id));
            }

            debug!(peer_id = peer.id, addr = %peer.addr, "auth done");
            peer.status = AuthStatus::Done;
            peer.last.ping_received = Some(now);
            peer.last.pong_received = Some(now);
            Action::Reply(wire::tagged(wire::REPEATER_ACK, our_id))
        }
        // Don't reply to unauthenticated chatter. If this was a real
        // repeater and we missed something, it will retry the login.
        _ => Action::None,
    }
}

fn decide_outgoing_auth(peer: &mut Peer, data: &[u8], our_id: &[u8; 4], now: Instant) -> Action {
    // Control replies echo our repeater id at bytes 6..10.
    if data.len() >= wire::ACK_FRAME_SIZE && !wire::id_matches(our_id, &data[6..10]) {
        warn!(peer_id = peer.id, addr = %peer.addr, id = ?&data[6..10], "peer sent mismatched repeater id (ignored)");
    }

    match peer.status {
        AuthStatus::None => {
            // Some deployments answer the login with MSTACK, others RPTACK.
            if data.len() >= wire::ACK_FRAME_SIZE
                && (data.starts_with(wire::REPEATER_ACK) || data.starts_with(wire::MASTER_ACK))
            {
                debug!(peer_id = peer.id, addr = %peer.addr, "received login nonce");
                peer.status = AuthStatus::Begin;
                let nonce = [data[6], data[7], data[8], data[9]];
                peer.update_token(&nonce);
                Action::Auth
            } else if data.starts_with(wire::MASTER_NAK) {
                error!(peer_id = peer.id, addr = %peer.addr, "master refused login");
                peer.status = AuthStatus::Failed;
                if peer.unlink_on_auth_failure {
                    Action::Unlink(peer.id)
                } else {
                    Action::None
                }
            } else {
                warn!(peer_id = peer.id, addr = %peer.addr, status = %peer.status, "unexpected login reply (ignored)");
                Action::None
            }
        }
        AuthStatus::Begin => {
            if data.starts_with(wire::MASTER_ACK) || data.starts_with(wire::REPEATER_ACK) {
                info!(peer_id = peer.id, addr = %peer.addr, "master accepted login");
                peer.status = AuthStatus::Done;
                peer.last.ping_sent = Some(now);
                peer.last.pong_received = Some(now);
                Action::SendConfig
            } else if data.starts_with(wire::MASTER_NAK) {
                error!(peer_id = peer.id, addr = %peer.addr, "master refused login");
                peer.status = AuthStatus::Failed;
                if peer.unlink_on_auth_failure {
                    Action::Unlink(peer.id)
                } else {
                    Action::None
                }
            } else {
                warn!(peer_id = peer.id, addr = %peer.addr, status = %peer.status, "unexpected login reply (ignored)");
                Action::None
            }
        }
        _ => Action::None,
    }
}

fn decide_authenticated(peer: &mut Peer, data: &[u8], our_id: &[u8; 4], now: Instant) -> Action {
    if data.starts_with(wire::DMR_DATA) {
        return match wire::parse_data(data) {
            Ok(p) => Action::Packet(p),
            Err(e) => {
                warn!(peer_id = peer.id, addr = %peer.addr, error = %e, "bad DMR data frame");
                Action::None
            }
        };
    }

    if peer.incoming {
        decide_incoming_live(peer, data, our_id, now)
    } else {
        decide_outgoing_live(peer, data, our_id, now)
    }
}

fn decide_incoming_live(peer: &mut Peer, data: &[u8], our_id: &[u8; 4], now: Instant) -> Action {
    if data.len() == wire::ACK_FRAME_SIZE && data.starts_with(wire::MASTER_ACK) {
        return Action::None;
    }

    if data.len() == wire::PING_FRAME_SIZE && data.starts_with(wire::MASTER_PING) {
        debug!(peer_id = peer.id, addr = %peer.addr, "received master ping");
        peer.last.ping_received = Some(now);
        return Action::Reply(wire::tagged(wire::REPEATER_PONG, &data[7..]));
    }

    if data.len() == wire::PING_FRAME_SIZE && data.starts_with(wire::REPEATER_PING) {
        debug!(peer_id = peer.id, addr = %peer.addr, "received repeater ping");
        peer.last.ping_received = Some(now);
        return Action::Reply(wire::tagged(wire::MASTER_PONG, &data[7..]));
    }

    if data.len() == wire::CONFIG_FRAME_SIZE && data.starts_with(wire::REPEATER_CONFIG) {
        return match config::parse_config_data(data) {
            Ok(c) => {
                debug!(peer_id = peer.id, addr = %peer.addr, config = %c, "peer sent config");
                peer.config = Some(c);
                Action::Reply(wire::tagged(wire::REPEATER_ACK, our_id))
            }
            Err(e) => {
                warn!(peer_id = peer.id, addr = %peer.addr, error = %e, "bad config frame");
                Action::None
            }
        };
    }

    warn!(peer_id = peer.id, addr = %peer.addr, status = %peer.status, len = data.len(), "unexpected frame from incoming peer");
    Action::None
}

fn decide_outgoing_live(peer: &mut Peer, data: &[u8], our_id: &[u8; 4], now: Instant) -> Action {
    if data.len() == wire::ACK_FRAME_SIZE
        && (data.starts_with(wire::MASTER_ACK) || data.starts_with(wire::REPEATER_ACK))
    {
        if !wire::id_matches(our_id, &data[6..10]) {
            warn!(peer_id = peer.id, addr = %peer.addr, id = ?&data[6..10], "peer sent mismatched repeater id (ignored)");
            return Action::None;
        }
        peer.last.ping_sent = Some(now);
        return Action::Reply(wire::tagged(wire::MASTER_PING, our_id));
    }

    if data.len() == wire::ACK_FRAME_SIZE && data.starts_with(wire::MASTER_NAK) {
        if !wire::id_matches(our_id, &data[6..10]) {
            warn!(peer_id = peer.id, addr = %peer.addr, id = ?&data[6..10], "peer sent mismatched repeater id (ignored)");
            return Action::None;
        }
        error!(peer_id = peer.id, addr = %peer.addr, "master deauthenticated us; re-authenticating");
        peer.status = AuthStatus::Failed;
        return Action::Auth;
    }

    if data.len() == wire::PING_FRAME_SIZE
        && (data.starts_with(wire::MASTER_PONG) || data.starts_with(wire::REPEATER_PONG))
    {
        if !wire::id_matches(our_id, &data[7..11]) {
            warn!(peer_id = peer.id, addr = %peer.addr, id = ?&data[7..11], "peer sent mismatched repeater id (ignored)");
            return Action::None;
        }
        peer.last.pong_received = Some(now);
        return Action::None;
    }

    warn!(peer_id = peer.id, addr = %peer.addr, status = %peer.status, len = data.len(), "unexpected frame from master");
    Action::None
}
