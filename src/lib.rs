//! Homebrew DMR IPSC protocol endpoint.
//!
//! Implements the UDP framing convention used between amateur-radio DMR
//! repeaters and master reflectors ("Homebrew" / MMDVM protocol, as
//! documented by DL5DI, G4KLX and DG1HT). An [`Endpoint`] can hold both
//! roles at once: it authenticates outgoing links against remote masters
//! with the nonce/shared-secret key exchange, accepts incoming repeater
//! logins, keeps every link alive with ping/pong, and fans received voice
//! bursts out to peers subscribed to the same talk group.
//!
//! The crate is transport-complete but policy-free: it decodes and relays
//! Homebrew frames, and hands every received DMR burst to the embedding
//! application through a packet callback. Vocoding, routing policy beyond
//! talk-group equality, and repeater databases live outside.

pub mod dmr;
pub mod homebrew;
pub mod lc;

// Re-export packet types
pub use dmr::{CallType, DataType, Packet};

// Re-export endpoint types
pub use homebrew::{
    AuthStatus, Endpoint, LastHeard, PacketFunc, Peer, ProtocolError, RepeaterConfiguration,
    Timing,
};

// Re-export talker alias types
pub use lc::{DataFormat, PduError, TalkerAliasBlockPdu, TalkerAliasHeaderPdu};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
