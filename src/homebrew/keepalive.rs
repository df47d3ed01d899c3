//! Keepalive sweep.
//!
//! Once a second every peer is evaluated against the timing tunables:
//! failed outgoing logins are retried, stalled handshakes marked failed,
//! live links pinged, and links that stopped answering pings are torn down
//! and re-established. The ping protocol only applies to outgoing links;
//! for incoming peers the auth retries are entirely up to the remote.

use super::peer::AuthStatus;
use super::wire;
use super::Endpoint;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::warn;

/// Sweep period.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(1);

/// True if `stamp` is unset or further than `timeout` in the past.
fn stale(stamp: Option<Instant>, now: Instant, timeout: Duration) -> bool {
    match stamp {
        Some(t) => now.saturating_duration_since(t) > timeout,
        None => true,
    }
}

impl Endpoint {
    /// Run the keepalive sweep until the stop signal fires.
    pub(crate) async fn run_keepalive(&self) {
        let mut stop_rx = self.stop.subscribe();
        let mut tick = interval_at(Instant::now() + KEEPALIVE_PERIOD, KEEPALIVE_PERIOD);

        loop {
            tokio::select! {
                _ = tick.tick() => self.keepalive_tick(Instant::now()).await,
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Evaluate every peer once against `now`.
    pub(crate) async fn keepalive_tick(&self, now: Instant) {
        for peer in self.registry.snapshot() {
            if peer.incoming {
                // Reserved: drop the peer when `now - ping_received`
                // exceeds the ping timeout, should symmetric enforcement
                // ever be wanted. For now the repeater re-pings.
                continue;
            }

            match peer.status {
                AuthStatus::Failed => {
                    if stale(peer.last.auth_sent, now, self.timing.auth_timeout()) {
                        self.registry
                            .with_peer_mut(&peer.addr, |p| p.status = AuthStatus::None);
                        warn!(peer_id = peer.id, addr = %peer.addr, "login retrying");
                        if let Err(e) = self.handle_auth(peer.addr).await {
                            warn!(peer_id = peer.id, addr = %peer.addr, error = %e, "login retry failed");
                        }
                    }
                }
                AuthStatus::None | AuthStatus::Begin => {
                    if stale(peer.last.packet_received, now, self.timing.auth_timeout()) {
                        self.registry
                            .with_peer_mut(&peer.addr, |p| p.status = AuthStatus::Failed);
                        warn!(peer_id = peer.id, addr = %peer.addr, "not responding to login; waiting retry");
                    }
                }
                AuthStatus::Done => {
                    if stale(peer.last.pong_received, now, self.timing.ping_timeout()) {
                        self.registry
                            .with_peer_mut(&peer.addr, |p| p.status = AuthStatus::None);
                        warn!(peer_id = peer.id, addr = %peer.addr, "not responding to ping; re-establishing link");
                        let frame = wire::tagged(wire::REPEATER_CLOSING, &self.id);
                        if let Err(e) = self.write_to_peer(&frame, &peer).await {
                            warn!(peer_id = peer.id, addr = %peer.addr, error = %e, "close notice failed");
                        }
                        if let Err(e) = self.handle_auth(peer.addr).await {
                            warn!(peer_id = peer.id, addr = %peer.addr, error = %e, "login retry failed");
                        }
                    } else if stale(peer.last.ping_sent, now, self.timing.ping_interval()) {
                        self.registry
                            .with_peer_mut(&peer.addr, |p| p.last.ping_sent = Some(now));
                        let frame = wire::tagged(wire::REPEATER_PING, &self.id);
                        if let Err(e) = self.write_to_peer(&frame, &peer).await {
                            warn!(peer_id = peer.id, addr = %peer.addr, error = %e, "ping failed");
                        }
                    }
                }
            }
        }
    }
}
