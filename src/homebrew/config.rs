//! Repeater configuration record and protocol tunables.
//!
//! The `RPTC` frame is a 302-byte fixed-offset ASCII record: string fields
//! are space-padded, numeric fields zero-padded decimal. Offsets:
//!
//! ```text
//! [RPTC:4][id:4 BE][callsign:8][rx:9][tx:9][power:2][color:2][lat:8][lon:9]
//! [height:3][location:20][description:19][slots:1][url:124]
//! [software_id:40][package_id:40]
//! ```
//!
//! Decoding is tolerant: a numeric field that fails to parse falls back to
//! zero, and it is up to the caller to decide whether the record is usable.

use super::wire::{pack_repeater_id, unpack_repeater_id, CONFIG_FRAME_SIZE, REPEATER_CONFIG};
use super::ProtocolError;
use crate::dmr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identity and RF parameters a repeater advertises to its master.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeaterConfiguration {
    /// Numeric repeater ID.
    pub id: u32,
    /// Station callsign, up to 8 characters.
    pub callsign: String,
    /// Receive frequency in Hz.
    pub rx_freq: u32,
    /// Transmit frequency in Hz.
    pub tx_freq: u32,
    /// Transmit power in dBm, clamped to 0..=99 on encode.
    pub tx_power: u8,
    /// DMR color code, clamped to 1..=15 on encode.
    pub color_code: u8,
    /// Antenna latitude in decimal degrees.
    pub latitude: f32,
    /// Antenna longitude in decimal degrees.
    pub longitude: f32,
    /// Antenna height in metres, up to 3 digits.
    pub height: u16,
    /// Site location, up to 20 characters.
    pub location: String,
    /// Free-form description, up to 19 characters.
    pub description: String,
    /// Timeslot capability, clamped to 0..=4 on encode.
    pub slots: u8,
    /// Informational URL, up to 124 characters.
    pub url: String,
    /// Software identifier; [`dmr::SOFTWARE_ID`] when left empty.
    pub software_id: String,
    /// Package identifier; [`dmr::PACKAGE_ID`] when left empty.
    pub package_id: String,
}

impl fmt::Display for RepeaterConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id: {}, cs: {}, rx: {}, tx: {}, pw: {}, cc: {}, slots: {}, loc: {:?}",
            self.id,
            self.callsign,
            self.rx_freq,
            self.tx_freq,
            self.tx_power,
            self.color_code,
            self.slots,
            self.location,
        )
    }
}

/// Copy a string into a fixed-width field, space-padded and truncated.
fn put_str(field: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(field.len());
    field[..n].copy_from_slice(&bytes[..n]);
    for b in &mut field[n..] {
        *b = b' ';
    }
}

/// Copy a number into a fixed-width field, zero-padded decimal.
fn put_num(field: &mut [u8], v: u64) {
    let s = format!("{:0width$}", v, width = field.len());
    let bytes = s.as_bytes();
    let n = bytes.len().min(field.len());
    field[..n].copy_from_slice(&bytes[..n]);
}

fn num_field(field: &[u8]) -> u64 {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn float_field(field: &[u8]) -> f64 {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0.0)
}

fn str_field(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim_matches(' ').to_string()
}

/// Format a coordinate the way the record expects: six decimals, truncated
/// to the field width.
fn coordinate(value: f32, width: usize) -> String {
    let mut s = format!("{:<width$.6}", value, width = width);
    s.truncate(width);
    s
}

/// Build a 302-byte `RPTC` configuration frame.
///
/// Out-of-range numeric fields are clamped rather than rejected, and empty
/// software/package identifiers are substituted with this crate's own.
pub fn build_config_data(c: &RepeaterConfiguration) -> [u8; CONFIG_FRAME_SIZE] {
    let color_code = c.color_code.clamp(1, 15);
    let tx_power = c.tx_power.min(99);
    let slots = c.slots.min(4);
    let software_id = if c.software_id.is_empty() {
        dmr::SOFTWARE_ID
    } else {
        c.software_id.as_str()
    };
    let package_id = if c.package_id.is_empty() {
        dmr::PACKAGE_ID
    } else {
        c.package_id.as_str()
    };

    let mut data = [0u8; CONFIG_FRAME_SIZE];
    data[..4].copy_from_slice(REPEATER_CONFIG);
    data[4..8].copy_from_slice(&pack_repeater_id(c.id));
    put_str(&mut data[8..16], &c.callsign);
    put_num(&mut data[16..25], u64::from(c.rx_freq));
    put_num(&mut data[25..34], u64::from(c.tx_freq));
    put_num(&mut data[34..36], u64::from(tx_power));
    put_num(&mut data[36..38], u64::from(color_code));
    put_str(&mut data[38..46], &coordinate(c.latitude, 8));
    put_str(&mut data[46..55], &coordinate(c.longitude, 9));
    put_num(&mut data[55..58], u64::from(c.height));
    put_str(&mut data[58..78], &c.location);
    put_str(&mut data[78..97], &c.description);
    put_num(&mut data[97..98], u64::from(slots));
    put_str(&mut data[98..222], &c.url);
    put_str(&mut data[222..262], software_id);
    put_str(&mut data[262..302], package_id);

    data
}

/// Parse a 302-byte `RPTC` configuration frame.
pub fn parse_config_data(data: &[u8]) -> Result<RepeaterConfiguration, ProtocolError> {
    if data.len() != CONFIG_FRAME_SIZE {
        return Err(ProtocolError::FrameLength {
            expected: CONFIG_FRAME_SIZE,
            got: data.len(),
        });
    }

    Ok(RepeaterConfiguration {
        id: unpack_repeater_id(&data[4..8]),
        callsign: str_field(&data[8..16]),
        rx_freq: num_field(&data[16..25]) as u32,
        tx_freq: num_field(&data[25..34]) as u32,
        tx_power: num_field(&data[34..36]) as u8,
        color_code: num_field(&data[36..38]) as u8,
        latitude: float_field(&data[38..46]) as f32,
        longitude: float_field(&data[46..55]) as f32,
        height: num_field(&data[55..58]) as u16,
        location: str_field(&data[58..78]),
        description: str_field(&data[78..97]),
        slots: num_field(&data[97..98]) as u8,
        url: str_field(&data[98..222]),
        software_id: str_field(&data[222..262]),
        package_id: str_field(&data[262..302]),
    })
}

/// Protocol timing tunables.
///
/// The defaults match the reference deployment; embedders override them per
/// link budget. All intervals are driven by the one-second keepalive sweep,
/// so sub-second values degrade to one second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    /// Seconds an authentication exchange may stall before retrying.
    #[serde(default = "Timing::default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Seconds between keepalive pings on an authenticated link.
    #[serde(default = "Timing::default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Seconds without a pong before the link is torn down and re-established.
    #[serde(default = "Timing::default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    /// Milliseconds between consecutive frames of a paced transmission.
    /// Reserved for embedders replaying recorded streams.
    #[serde(default = "Timing::default_send_interval_ms")]
    pub send_interval_ms: u64,
    /// Seconds before a peer's talk-group subscription goes stale and group
    /// calls stop being relayed to it. Zero disables expiry.
    #[serde(default = "Timing::default_tg_timeout_secs")]
    pub tg_timeout_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            auth_timeout_secs: 15,
            ping_interval_secs: 5,
            ping_timeout_secs: 15,
            send_interval_ms: 30,
            tg_timeout_secs: 900,
        }
    }
}

impl Timing {
    fn default_auth_timeout_secs() -> u64 {
        15
    }
    fn default_ping_interval_secs() -> u64 {
        5
    }
    fn default_ping_timeout_secs() -> u64 {
        15
    }
    fn default_send_interval_ms() -> u64 {
        30
    }
    fn default_tg_timeout_secs() -> u64 {
        900
    }

    /// Authentication stall timeout.
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Keepalive ping interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Pong loss timeout.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// Frame pacing interval.
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    /// Talk-group subscription expiry.
    pub fn tg_timeout(&self) -> Duration {
        Duration::from_secs(self.tg_timeout_secs)
    }
}
