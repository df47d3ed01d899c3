//! DMR Packet Model
//!
//! Transport-neutral representation of a single DMR burst (ETSI TS 102 361)
//! as carried between repeaters: addressing, timeslot, call type, stream
//! tagging, and the raw 33-byte air-interface payload. The Homebrew wire
//! codec in [`crate::homebrew::wire`] marshals this into the 55-byte frame.

use std::fmt;

/// Raw DMR burst payload size in bytes (264 bits).
pub const PAYLOAD_SIZE: usize = 33;

/// Software identifier advertised in repeater configuration records.
pub const SOFTWARE_ID: &str = concat!("hbrelay-", env!("CARGO_PKG_VERSION"));

/// Package identifier advertised in repeater configuration records.
pub const PACKAGE_ID: &str = concat!("hbrelay-", env!("CARGO_PKG_VERSION"));

/// Call addressing mode, one bit on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CallType {
    /// Talk-group call, delivered to every subscribed peer.
    Group = 0x00,
    /// Private unit-to-unit call.
    Private = 0x01,
}

impl CallType {
    /// Decode from the call-type bit of the packed frame byte.
    pub fn from_bit(bit: u8) -> Self {
        if bit & 0x01 == 0 {
            CallType::Group
        } else {
            CallType::Private
        }
    }

    /// The single-bit wire encoding.
    pub fn as_bit(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallType::Group => "group",
            CallType::Private => "private",
        };
        write!(f, "{}", s)
    }
}

/// Slot content type.
///
/// Values 0x00..=0x09 are the data-sync slot types; 0x0a..=0x0f index the
/// six-burst voice superframe (burst A carries the voice sync pattern).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    PrivacyIndicator = 0x00,
    VoiceLcHeader = 0x01,
    TerminatorWithLc = 0x02,
    Csbk = 0x03,
    MultiBlockControl = 0x04,
    MultiBlockControlFollowup = 0x05,
    DataHeader = 0x06,
    Rate12Data = 0x07,
    Rate34Data = 0x08,
    Idle = 0x09,
    VoiceBurstA = 0x0a,
    VoiceBurstB = 0x0b,
    VoiceBurstC = 0x0c,
    VoiceBurstD = 0x0d,
    VoiceBurstE = 0x0e,
    VoiceBurstF = 0x0f,
}

impl DataType {
    /// Try to convert from a byte.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(DataType::PrivacyIndicator),
            0x01 => Some(DataType::VoiceLcHeader),
            0x02 => Some(DataType::TerminatorWithLc),
            0x03 => Some(DataType::Csbk),
            0x04 => Some(DataType::MultiBlockControl),
            0x05 => Some(DataType::MultiBlockControlFollowup),
            0x06 => Some(DataType::DataHeader),
            0x07 => Some(DataType::Rate12Data),
            0x08 => Some(DataType::Rate34Data),
            0x09 => Some(DataType::Idle),
            0x0a => Some(DataType::VoiceBurstA),
            0x0b => Some(DataType::VoiceBurstB),
            0x0c => Some(DataType::VoiceBurstC),
            0x0d => Some(DataType::VoiceBurstD),
            0x0e => Some(DataType::VoiceBurstE),
            0x0f => Some(DataType::VoiceBurstF),
            _ => None,
        }
    }

    /// Convert to a byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this is one of the A..F voice bursts.
    pub fn is_voice_burst(self) -> bool {
        matches!(
            self,
            DataType::VoiceBurstA
                | DataType::VoiceBurstB
                | DataType::VoiceBurstC
                | DataType::VoiceBurstD
                | DataType::VoiceBurstE
                | DataType::VoiceBurstF
        )
    }

    /// Position within the six-burst voice superframe (A = 0), if a voice burst.
    pub fn voice_burst_index(self) -> Option<u8> {
        if self.is_voice_burst() {
            Some(self.as_u8() - DataType::VoiceBurstA.as_u8())
        } else {
            None
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::PrivacyIndicator => "privacy indicator",
            DataType::VoiceLcHeader => "voice LC header",
            DataType::TerminatorWithLc => "terminator with LC",
            DataType::Csbk => "CSBK",
            DataType::MultiBlockControl => "multi block control",
            DataType::MultiBlockControlFollowup => "multi block control followup",
            DataType::DataHeader => "data header",
            DataType::Rate12Data => "rate 1/2 data",
            DataType::Rate34Data => "rate 3/4 data",
            DataType::Idle => "idle",
            DataType::VoiceBurstA => "voice burst A",
            DataType::VoiceBurstB => "voice burst B",
            DataType::VoiceBurstC => "voice burst C",
            DataType::VoiceBurstD => "voice burst D",
            DataType::VoiceBurstE => "voice burst E",
            DataType::VoiceBurstF => "voice burst F",
        };
        write!(f, "{}", s)
    }
}

/// A single DMR burst with its addressing metadata.
///
/// `src_id` and `dst_id` are 24-bit on the wire; `repeater_id` and
/// `stream_id` are 32-bit. `timeslot` is 0 or 1 (TS1/TS2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Frame sequence number within the stream.
    pub sequence: u8,
    /// Source subscriber ID (24-bit).
    pub src_id: u32,
    /// Destination subscriber or talk-group ID (24-bit).
    pub dst_id: u32,
    /// ID of the repeater that carried the burst (32-bit).
    pub repeater_id: u32,
    /// Timeslot, 0 (TS1) or 1 (TS2).
    pub timeslot: u8,
    /// Group or private call.
    pub call_type: CallType,
    /// Random tag identifying one transmission.
    pub stream_id: u32,
    /// Slot content type.
    pub data_type: DataType,
    /// Bit error rate as reported by the modem.
    pub ber: u8,
    /// Received signal strength as reported by the modem.
    pub rssi: u8,
    /// Raw air-interface payload.
    pub data: [u8; PAYLOAD_SIZE],
}

impl Packet {
    /// Replace the payload, truncating or zero-padding to [`PAYLOAD_SIZE`].
    pub fn set_data(&mut self, data: &[u8]) {
        let n = data.len().min(PAYLOAD_SIZE);
        self.data[..n].copy_from_slice(&data[..n]);
        for b in &mut self.data[n..] {
            *b = 0;
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "from {} to {}{}, TS{}, {} call, stream {:#010x}, {}",
            self.src_id,
            if self.call_type == CallType::Group { "TG" } else { "" },
            self.dst_id,
            self.timeslot + 1,
            self.call_type,
            self.stream_id,
            self.data_type,
        )
    }
}
