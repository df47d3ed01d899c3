//! Talker Alias header and block PDUs (ETSI TS 102 361-2 §7.1.1.4-5).
//!
//! The header PDU packs a 2-bit data format and 5-bit length into its first
//! seven bits, followed by 49 bits of payload. For the 7-bit format the
//! payload is a packed bit stream of seven 7-bit characters that has to be
//! reorganized into one character per byte; the other formats carry plain
//! octets. Continuation blocks are untyped 6-byte payload carriers.

use super::PduError;
use std::fmt;

/// Wire size of every talker alias PDU.
pub const PDU_SIZE: usize = 7;

/// Payload bytes carried by a continuation block.
pub const BLOCK_DATA_SIZE: usize = 6;

/// Talker alias data format (ETSI TS 102 361-2 §7.2.18).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DataFormat {
    /// Seven 7-bit characters packed into 49 bits.
    SevenBit = 0x00,
    /// ISO/IEC 8859-1 octets.
    Iso8Bit = 0x01,
    /// UTF-8 octets.
    Utf8 = 0x02,
    /// UTF-16 big-endian code units.
    Utf16Be = 0x03,
}

impl DataFormat {
    /// Decode from the two format bits.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x00 => DataFormat::SevenBit,
            0x01 => DataFormat::Iso8Bit,
            0x02 => DataFormat::Utf8,
            _ => DataFormat::Utf16Be,
        }
    }

    /// The two-bit wire encoding.
    pub fn as_bits(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataFormat::SevenBit => "7 bit",
            DataFormat::Iso8Bit => "ISO 8 bit",
            DataFormat::Utf8 => "unicode utf-8",
            DataFormat::Utf16Be => "unicode utf-16be",
        };
        write!(f, "{}", s)
    }
}

/// Talker Alias header PDU (ETSI TS 102 361-2 §7.1.1.4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TalkerAliasHeaderPdu {
    /// Payload encoding.
    pub data_format: DataFormat,
    /// Total alias length in characters, spanning header and blocks.
    pub length: u8,
    /// Decoded payload: 7 bytes (one character each, high bit clear) for
    /// the 7-bit format, the 5 raw octets after the header byte otherwise.
    pub data: Vec<u8>,
}

/// Talker Alias continuation block PDU (ETSI TS 102 361-2 §7.1.1.5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TalkerAliasBlockPdu {
    /// Raw payload octets.
    pub data: [u8; BLOCK_DATA_SIZE],
}

/// Copy one bit between buffers. Bits are numbered by shift amount, so 7 is
/// the MSB of a byte and 0 the LSB.
fn move_bit(src: &[u8], src_byte: usize, src_bit: usize, dst: &mut [u8], dst_byte: usize, dst_bit: usize) {
    if (src[src_byte] >> src_bit) & 0x01 == 0x01 {
        dst[dst_byte] |= 1 << dst_bit;
    } else {
        dst[dst_byte] &= !(1 << dst_bit);
    }
}

/// Parse a Talker Alias header PDU from bytes.
pub fn parse_header(data: &[u8]) -> Result<TalkerAliasHeaderPdu, PduError> {
    if data.len() != PDU_SIZE {
        return Err(PduError::Length(data.len()));
    }

    let data_format = DataFormat::from_bits(data[0] >> 6);

    let out = if data_format == DataFormat::SevenBit {
        // The 49 payload bits start at bit offset 7 of the frame. Walk them
        // in order, dropping each into the low 7 bits of its target byte.
        let mut out = [0u8; 7];
        for i in 7..56 {
            move_bit(data, i / 8, 7 - (i % 8), &mut out, (i - 7) / 7, 6 - (i % 7));
        }
        out.to_vec()
    } else {
        data[1..6].to_vec()
    };

    Ok(TalkerAliasHeaderPdu {
        data_format,
        length: (data[0] & 0b0011_1110) >> 1,
        data: out,
    })
}

impl TalkerAliasHeaderPdu {
    /// Encode as a 7-byte wire frame.
    ///
    /// For the 7-bit format this is the inverse bit move of [`parse_header`],
    /// including the frame's bit 7 (the LSB of byte 0), which carries bit 6
    /// of the first character. Other formats copy the payload after the
    /// header byte, zero-padded or truncated to the 6 remaining bytes.
    pub fn bytes(&self) -> [u8; PDU_SIZE] {
        let mut out = [0u8; PDU_SIZE];

        if self.data_format == DataFormat::SevenBit {
            for i in 7..56 {
                let src_byte = (i - 7) / 7;
                if src_byte >= self.data.len() {
                    break;
                }
                move_bit(&self.data, src_byte, 6 - (i % 7), &mut out, i / 8, 7 - (i % 8));
            }
        } else {
            let n = self.data.len().min(PDU_SIZE - 1);
            out[1..1 + n].copy_from_slice(&self.data[..n]);
        }

        out[0] |= (self.data_format.as_bits() << 6) | ((self.length << 1) & 0b0011_1110);
        out
    }

    /// Payload bytes interpreted as a string, lossily.
    pub fn data_as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

impl fmt::Display for TalkerAliasHeaderPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TalkerAliasHeader: [ format: {}, length: {}, data: {:?} ]",
            self.data_format,
            self.length,
            self.data_as_string(),
        )
    }
}

/// Parse a Talker Alias continuation block PDU from bytes.
pub fn parse_block(data: &[u8]) -> Result<TalkerAliasBlockPdu, PduError> {
    if data.len() != PDU_SIZE {
        return Err(PduError::Length(data.len()));
    }

    let mut block = [0u8; BLOCK_DATA_SIZE];
    block.copy_from_slice(&data[..BLOCK_DATA_SIZE]);
    Ok(TalkerAliasBlockPdu { data: block })
}

impl TalkerAliasBlockPdu {
    /// The payload octets, unchanged.
    pub fn bytes(&self) -> [u8; BLOCK_DATA_SIZE] {
        self.data
    }

    /// Payload bytes interpreted as a string, lossily.
    pub fn data_as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

impl fmt::Display for TalkerAliasBlockPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TalkerAliasBlock: [ data: {:?} ]", self.data_as_string())
    }
}
