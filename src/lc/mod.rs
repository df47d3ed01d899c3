//! Link Control PDUs
//!
//! Full Link Control payloads that ride inside DMR bursts. Currently the
//! Talker Alias header and continuation blocks (ETSI TS 102 361-2
//! §7.1.1.4-5), which carry an optional textual identifier of the
//! transmitting station across up to four 7-byte PDUs.

mod talker_alias;

pub use talker_alias::{
    parse_block, parse_header, DataFormat, TalkerAliasBlockPdu, TalkerAliasHeaderPdu,
    BLOCK_DATA_SIZE, PDU_SIZE,
};

use thiserror::Error;

/// Errors raised by LC PDU parsers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PduError {
    #[error("talker alias: expected 7 bytes, got {0}")]
    Length(usize),
}
