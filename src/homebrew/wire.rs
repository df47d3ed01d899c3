//! Homebrew Wire Format
//!
//! Frame verbs and the DMR data frame codec for the Homebrew IPSC protocol
//! ("DMRplus IPSC Protocol for HB repeater", DL5DI/G4KLX/DG1HT). Every frame
//! opens with a 4-7 byte ASCII verb; sizes are rigid and deviations are
//! protocol errors.
//!
//! ## DMR data frame (55 bytes)
//!
//! ```text
//! [DMRD:4][seq:1][src:3 BE][dst:3 BE][repeater:4 BE][packed:1][stream:4 BE]
//! [payload:33][ber:1][rssi:1]
//! ```
//!
//! The packed byte encodes timeslot (bit 7), call type (bit 6), frame kind
//! (bits 5..4: `00`/`01` voice, `10` data sync, `11` reserved) and either
//! the voice burst offset from burst A or the data-sync slot type in the
//! low nibble.

use super::ProtocolError;
use crate::dmr::{CallType, DataType, Packet, PAYLOAD_SIZE};

// Frame verbs.
pub const DMR_DATA: &[u8] = b"DMRD";
pub const MASTER_NAK: &[u8] = b"MSTNAK";
pub const MASTER_ACK: &[u8] = b"MSTACK";
pub const REPEATER_ACK: &[u8] = b"RPTACK";
pub const REPEATER_LOGIN: &[u8] = b"RPTL";
pub const REPEATER_KEY: &[u8] = b"RPTK";
pub const REPEATER_CONFIG: &[u8] = b"RPTC";
pub const MASTER_PING: &[u8] = b"MSTPING";
pub const MASTER_PONG: &[u8] = b"MSTPONG";
pub const REPEATER_PING: &[u8] = b"RPTPING";
pub const REPEATER_PONG: &[u8] = b"RPTPONG";
pub const MASTER_CLOSING: &[u8] = b"MSTCL";
pub const REPEATER_CLOSING: &[u8] = b"RPTCL";

/// Size of a DMR data frame.
pub const DMR_FRAME_SIZE: usize = 55;

/// Size of a repeater configuration frame.
pub const CONFIG_FRAME_SIZE: usize = 302;

/// Size of a ping or pong frame (7-byte verb + repeater id).
pub const PING_FRAME_SIZE: usize = 11;

/// Size of an ACK/NAK frame (6-byte verb + repeater id or nonce).
pub const ACK_FRAME_SIZE: usize = 10;

/// Minimum length of any Homebrew frame worth inspecting.
pub const MIN_FRAME_SIZE: usize = 8;

/// Largest frame the protocol defines (the configuration record).
pub const MAX_FRAME_SIZE: usize = CONFIG_FRAME_SIZE;

/// Size of an `RPTK` key exchange frame (verb + id + 32-byte token).
pub const KEY_FRAME_SIZE: usize = 40;

/// Concatenate a frame verb with its payload.
pub fn tagged(verb: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(verb.len() + payload.len());
    frame.extend_from_slice(verb);
    frame.extend_from_slice(payload);
    frame
}

/// Pack a repeater ID into its 4-byte big-endian wire form.
pub fn pack_repeater_id(id: u32) -> [u8; 4] {
    id.to_be_bytes()
}

/// Unpack a big-endian repeater ID. The slice must hold at least 4 bytes.
pub fn unpack_repeater_id(data: &[u8]) -> u32 {
    (u32::from(data[0]) << 24)
        | (u32::from(data[1]) << 16)
        | (u32::from(data[2]) << 8)
        | u32::from(data[3])
}

/// Compare received repeater ID bytes against a packed local ID.
///
/// Case-insensitive: BrandMeister release 20190421-185653 switched from
/// upper case to lower case hex digits.
pub fn id_matches(id: &[u8; 4], data: &[u8]) -> bool {
    data.len() == 4 && data.eq_ignore_ascii_case(id)
}

/// Parse an ASCII-hex repeater ID as carried by some deployments.
pub fn parse_repeater_id(data: &[u8]) -> Result<u32, ProtocolError> {
    let invalid = || ProtocolError::InvalidRepeaterId(String::from_utf8_lossy(data).into_owned());
    let s = std::str::from_utf8(data).map_err(|_| invalid())?;
    u32::from_str_radix(s, 16).map_err(|_| invalid())
}

/// Build a 55-byte Homebrew DMR data frame from a packet.
///
/// The frame carries `repeater_id` in place of the packet's own, so a relay
/// stamps its identity on every forwarded burst.
pub fn build_data(p: &Packet, repeater_id: u32) -> [u8; DMR_FRAME_SIZE] {
    let mut data = [0u8; DMR_FRAME_SIZE];
    data[..4].copy_from_slice(DMR_DATA);
    data[4] = p.sequence;
    data[5..8].copy_from_slice(&p.src_id.to_be_bytes()[1..]);
    data[8..11].copy_from_slice(&p.dst_id.to_be_bytes()[1..]);
    data[11..15].copy_from_slice(&repeater_id.to_be_bytes());
    data[15] = ((p.timeslot & 0x01) << 7) | (p.call_type.as_bit() << 6);
    data[16..20].copy_from_slice(&p.stream_id.to_be_bytes());
    data[20..53].copy_from_slice(&p.data);
    data[53] = p.ber;
    data[54] = p.rssi;

    match p.data_type {
        DataType::VoiceBurstA => {
            data[15] |= 0x01 << 4;
        }
        DataType::VoiceBurstB
        | DataType::VoiceBurstC
        | DataType::VoiceBurstD
        | DataType::VoiceBurstE
        | DataType::VoiceBurstF => {
            data[15] |= p.data_type.as_u8() - DataType::VoiceBurstA.as_u8();
        }
        _ => {
            data[15] |= 0x02 << 4;
            data[15] |= p.data_type.as_u8();
        }
    }

    data
}

/// Parse a 55-byte Homebrew DMR data frame into a packet.
pub fn parse_data(data: &[u8]) -> Result<Packet, ProtocolError> {
    if data.len() != DMR_FRAME_SIZE {
        return Err(ProtocolError::FrameLength {
            expected: DMR_FRAME_SIZE,
            got: data.len(),
        });
    }

    let data_type = match (data[15] >> 4) & 0x03 {
        // voice (B-F), voice sync (A)
        0x00 | 0x01 => {
            let offset = data[15] & 0x0f;
            DataType::from_u8(DataType::VoiceBurstA.as_u8() + offset)
                .ok_or(ProtocolError::InvalidVoiceBurst(offset))?
        }
        // data sync
        0x02 => {
            let value = data[15] & 0x0f;
            DataType::from_u8(value).ok_or(ProtocolError::InvalidDataType(value))?
        }
        // reserved/unused
        _ => return Err(ProtocolError::ReservedFrameKind),
    };

    let mut payload = [0u8; PAYLOAD_SIZE];
    payload.copy_from_slice(&data[20..53]);

    Ok(Packet {
        sequence: data[4],
        src_id: (u32::from(data[5]) << 16) | (u32::from(data[6]) << 8) | u32::from(data[7]),
        dst_id: (u32::from(data[8]) << 16) | (u32::from(data[9]) << 8) | u32::from(data[10]),
        repeater_id: unpack_repeater_id(&data[11..15]),
        timeslot: (data[15] >> 7) & 0x01,
        call_type: CallType::from_bit((data[15] >> 6) & 0x01),
        stream_id: unpack_repeater_id(&data[16..20]),
        data_type,
        ber: data[53],
        rssi: data[54],
        data: payload,
    })
}
