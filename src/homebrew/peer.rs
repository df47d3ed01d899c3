//! Peer state.
//!
//! A [`Peer`] is one remote Homebrew endpoint: either a repeater that logged
//! in to us (incoming) or a master we authenticate against (outgoing). The
//! authentication and liveness state machine in the handler and keepalive
//! modules drives `status` and the `last` timestamps; everything else is
//! identity and policy set by the embedder.

use super::config::RepeaterConfiguration;
use super::wire::pack_repeater_id;
use super::PacketFunc;
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;
use tokio::time::Instant;

/// Talk group assigned to repeaters that log in without a pre-linked entry.
pub const DEFAULT_TALK_GROUP: u32 = 446;

/// Authentication state of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    /// No exchange in progress.
    None,
    /// Nonce issued (incoming) or received (outgoing); key proof pending.
    Begin,
    /// Handshake complete, link live.
    Done,
    /// Login refused or timed out; waiting for the retry window.
    Failed,
}

impl AuthStatus {
    /// Check if the link carries traffic.
    pub fn is_done(&self) -> bool {
        matches!(self, AuthStatus::Done)
    }

    /// Check if an exchange is still in flight.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, AuthStatus::Begin)
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthStatus::None => "none",
            AuthStatus::Begin => "begin",
            AuthStatus::Done => "done",
            AuthStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Liveness timestamps, all unset until the corresponding event happens.
#[derive(Clone, Copy, Debug, Default)]
pub struct LastHeard {
    /// Last frame written to this peer.
    pub packet_sent: Option<Instant>,
    /// Last frame received from this peer.
    pub packet_received: Option<Instant>,
    /// Last keepalive ping sent.
    pub ping_sent: Option<Instant>,
    /// Last keepalive ping received.
    pub ping_received: Option<Instant>,
    /// Last keepalive pong received.
    pub pong_received: Option<Instant>,
    /// Last login frame sent.
    pub auth_sent: Option<Instant>,
    /// Last talk-group subscription update.
    pub tg_subscribed: Option<Instant>,
}

impl LastHeard {
    /// Reset every timestamp, as when a link is (re-)established.
    pub fn clear(&mut self) {
        *self = LastHeard::default();
    }
}

/// Derive the 32-byte key-exchange token from a server nonce and the shared
/// secret: `SHA-256(nonce ‖ auth_key)`.
pub(crate) fn derive_token(auth_key: &[u8], nonce: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(auth_key);
    hasher.finalize().into()
}

/// One remote Homebrew endpoint.
#[derive(Clone)]
pub struct Peer {
    /// Numeric repeater ID.
    pub id: u32,
    /// Remote socket address.
    pub addr: SocketAddr,
    /// True if the remote initiated the link and we act as its master.
    pub incoming: bool,
    /// Shared secret for the key exchange.
    pub auth_key: Vec<u8>,
    /// Authentication state.
    pub status: AuthStatus,
    /// Challenge material for the current exchange; for incoming peers the
    /// value we expect in `RPTK`, for outgoing the value we send.
    pub token: Option<[u8; 32]>,
    /// Configuration record uploaded by an incoming repeater.
    pub config: Option<RepeaterConfiguration>,
    /// Talk group this peer currently receives.
    pub tg_id: u32,
    /// Liveness timestamps.
    pub last: LastHeard,
    /// Drop the registry entry instead of retrying when login is refused.
    pub unlink_on_auth_failure: bool,
    /// Per-peer receive callback, overriding the endpoint-wide one.
    pub packet_received: Option<PacketFunc>,
}

impl Peer {
    /// A peer we authenticate against (we are the repeater, it is a master).
    pub fn outgoing(id: u32, addr: SocketAddr, auth_key: Vec<u8>) -> Self {
        Self {
            id,
            addr,
            incoming: false,
            auth_key,
            status: AuthStatus::None,
            token: None,
            config: None,
            tg_id: 0,
            last: LastHeard::default(),
            unlink_on_auth_failure: false,
            packet_received: None,
        }
    }

    /// A peer that authenticates against us (it is a repeater, we master).
    pub fn incoming(id: u32, addr: SocketAddr, auth_key: Vec<u8>) -> Self {
        Self {
            id,
            addr,
            incoming: true,
            auth_key,
            status: AuthStatus::None,
            token: None,
            config: None,
            tg_id: DEFAULT_TALK_GROUP,
            last: LastHeard::default(),
            unlink_on_auth_failure: false,
            packet_received: None,
        }
    }

    /// The peer's ID in its 4-byte wire form.
    pub fn packed_id(&self) -> [u8; 4] {
        pack_repeater_id(self.id)
    }

    /// Refresh the challenge token from a server nonce.
    pub fn update_token(&mut self, nonce: &[u8]) {
        self.token = Some(derive_token(&self.auth_key, nonce));
    }

    /// Check received repeater ID bytes against this peer's.
    pub fn check_repeater_id(&self, data: &[u8]) -> bool {
        data.len() == 4 && data.eq_ignore_ascii_case(&self.packed_id())
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("incoming", &self.incoming)
            .field("status", &self.status)
            .field("tg_id", &self.tg_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer() -> Peer {
        Peer::outgoing(2042, "127.0.0.1:62030".parse().expect("valid addr"), b"s3cr3t".to_vec())
    }

    #[test]
    fn test_token_derivation_deterministic() {
        let a = derive_token(b"s3cr3t", &[0xde, 0xad, 0xbe, 0xef]);
        let b = derive_token(b"s3cr3t", &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(a, b);
        assert_ne!(a, derive_token(b"s3cr3t", &[0xde, 0xad, 0xbe, 0xee]));
        assert_ne!(a, derive_token(b"other", &[0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_update_token() {
        let mut peer = test_peer();
        assert!(peer.token.is_none());
        peer.update_token(&[1, 2, 3, 4]);
        assert_eq!(peer.token, Some(derive_token(b"s3cr3t", &[1, 2, 3, 4])));
    }

    #[test]
    fn test_check_repeater_id() {
        let peer = test_peer();
        assert!(peer.check_repeater_id(&2042u32.to_be_bytes()));
        assert!(!peer.check_repeater_id(&2043u32.to_be_bytes()));
        assert!(!peer.check_repeater_id(&[0x00, 0x00]));
    }

    #[test]
    fn test_roles() {
        assert!(!test_peer().incoming);
        let p = Peer::incoming(1, "127.0.0.1:62031".parse().expect("valid addr"), b"k".to_vec());
        assert!(p.incoming);
        assert_eq!(p.tg_id, DEFAULT_TALK_GROUP);
        assert_eq!(p.status, AuthStatus::None);
    }

    #[test]
    fn test_auth_status_display() {
        assert_eq!(AuthStatus::None.to_string(), "none");
        assert_eq!(AuthStatus::Begin.to_string(), "begin");
        assert_eq!(AuthStatus::Done.to_string(), "done");
        assert_eq!(AuthStatus::Failed.to_string(), "failed");
        assert!(AuthStatus::Done.is_done());
        assert!(AuthStatus::Begin.is_in_progress());
    }

    #[test]
    fn test_last_heard_clear() {
        let mut last = LastHeard::default();
        last.ping_sent = Some(Instant::now());
        last.clear();
        assert!(last.ping_sent.is_none());
    }
}
