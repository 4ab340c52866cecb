// THEORY:
// OOTX ("omnidirectional optical transmitter") is the slow side channel of a
// Lighthouse base station: one bit per sync flash, i.e. 120 bits per second.
// A frame starts with a preamble of 17 zero bits followed by a one. After it,
// every 16 data bits (two bytes, most significant bit first) are followed by a
// sync bit that must be 1. Because the sync bit breaks every run of zeros, a
// run longer than 16 can only be a preamble.
//
// The frame is a little-endian record: a 16-bit payload length, the payload,
// padding to an even length, and a CRC32 of the payload. Protocol version 6
// stores the station serial, the per-rotor calibration terms as half floats,
// the model id, a reset counter and the direction of gravity.

use crc::{CRC_32_ISO_HDLC, Crc};
use serde::Serialize;

use crate::core_modules::half_float::f16_to_f32;
use crate::error::OotxError;

/// Size of the capture buffer: length, padded payload and CRC.
pub const OOTX_BUFFER_LEN: usize = 40;
/// Payload length of protocol version 6.
pub const OOTX_PAYLOAD_LEN: u16 = 33;
pub const OOTX_PROTOCOL_VERSION: u8 = 6;

const OOTX_WORDS: usize = OOTX_BUFFER_LEN / 2;
/// The serial number is complete once this many words have arrived.
const SERIAL_WORDS: usize = 4;
const SYNC_BIT: u8 = 16;
const PREAMBLE_ZEROS: u32 = 16;
const CRC_OFFSET: usize = 36;

const OOTX_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Calibration terms of one rotor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RotorCalibration {
    pub tilt: f32,
    pub phase: f32,
    pub curve: f32,
    pub gibphase: f32,
    pub gibmag: f32,
}

/// Calibration of both rotors of a base station.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BaseCalibration {
    pub rotor: [RotorCalibration; 2],
}

/// A validated OOTX frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OotxFrame {
    pub firmware_version: u16,
    pub serial: u32,
    pub calibration: BaseCalibration,
    pub reset_count: u8,
    pub model_id: u8,
    /// Raw gravity direction, not normalized.
    pub gravity: [i8; 3],
}

fn le16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn le32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn half(buf: &[u8], offset: usize) -> f32 {
    f16_to_f32(le16(buf, offset))
}

/// Declared payload length of a (possibly partial) capture buffer.
pub fn payload_len(buf: &[u8; OOTX_BUFFER_LEN]) -> u16 {
    le16(buf, 0)
}

/// Validates and decodes a complete capture buffer.
pub fn decode_ootx_frame(buf: &[u8; OOTX_BUFFER_LEN]) -> Result<OotxFrame, OotxError> {
    let len = payload_len(buf);
    if len != OOTX_PAYLOAD_LEN {
        return Err(OotxError::Length(len));
    }

    let payload = &buf[2..2 + usize::from(OOTX_PAYLOAD_LEN)];
    let stored = le32(buf, CRC_OFFSET);
    let computed = OOTX_CRC.checksum(payload);
    if computed != stored {
        return Err(OotxError::Crc { computed, stored });
    }

    let version = le16(payload, 0);
    let protocol = (version & 0x3f) as u8;
    if protocol != OOTX_PROTOCOL_VERSION {
        return Err(OotxError::Version(protocol));
    }

    let mut calibration = BaseCalibration::default();
    for (i, rotor) in calibration.rotor.iter_mut().enumerate() {
        *rotor = RotorCalibration {
            phase: half(payload, 6 + 2 * i),
            tilt: half(payload, 10 + 2 * i),
            curve: half(payload, 16 + 2 * i),
            gibphase: half(payload, 23 + 2 * i),
            gibmag: half(payload, 27 + 2 * i),
        };
    }

    Ok(OotxFrame {
        firmware_version: version >> 6,
        serial: le32(payload, 2),
        calibration,
        reset_count: payload[14],
        model_id: payload[15],
        gravity: [payload[20] as i8, payload[21] as i8, payload[22] as i8],
    })
}

/// Where the decoder is in the bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OotxState {
    /// Waiting for a preamble.
    Idle,
    /// Filling `word`; `bit` 16 is the sync bit.
    Capturing { word: usize, bit: u8 },
}

/// Something noteworthy happened at a word boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum OotxEvent {
    /// Length, version and serial have arrived. Nothing is validated yet.
    Header { len: u16, protocol: u8, serial: u32 },
    /// All words of a 33-byte frame have arrived.
    Frame(Result<OotxFrame, OotxError>),
    /// A sync bit was 0. Capture restarts at the next preamble.
    MissedSyncBit,
}

/// Per-station OOTX bit accumulator.
#[derive(Debug, Clone)]
pub struct OotxDecoder {
    state: OotxState,
    /// Consecutive zero bits seen.
    zeros: u32,
    buf: [u8; OOTX_BUFFER_LEN],
}

impl Default for OotxDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl OotxDecoder {
    pub fn new() -> Self {
        Self {
            state: OotxState::Idle,
            zeros: 0,
            buf: [0; OOTX_BUFFER_LEN],
        }
    }

    /// Drops any partial frame and waits for the next preamble.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn state(&self) -> OotxState {
        self.state
    }

    pub fn buffer(&self) -> &[u8; OOTX_BUFFER_LEN] {
        &self.buf
    }

    /// Feeds the data bit of one sync flash.
    pub fn push_bit(&mut self, data: bool) -> Option<OotxEvent> {
        let mut event = None;

        match self.state {
            OotxState::Capturing { word, .. } if word >= OOTX_WORDS => {
                self.state = OotxState::Idle;
            }
            OotxState::Capturing { word, bit: SYNC_BIT } => {
                if data {
                    let word = word + 1;
                    self.state = OotxState::Capturing { word, bit: 0 };
                    event = self.word_complete(word);
                } else {
                    self.state = OotxState::Idle;
                    event = Some(OotxEvent::MissedSyncBit);
                }
            }
            OotxState::Capturing { word, bit } => {
                if data {
                    self.buf[2 * word + usize::from(bit / 8)] |= 0x80 >> (bit % 8);
                }
                self.state = OotxState::Capturing { word, bit: bit + 1 };
            }
            OotxState::Idle => {}
        }

        // Preamble detection
        if data {
            if self.zeros > PREAMBLE_ZEROS {
                self.buf = [0; OOTX_BUFFER_LEN];
                self.state = OotxState::Capturing { word: 0, bit: 0 };
            }
            self.zeros = 0;
        } else {
            self.zeros += 1;
        }

        event
    }

    /// `words` words have been received in full.
    fn word_complete(&self, words: usize) -> Option<OotxEvent> {
        let len = payload_len(&self.buf);
        if words == SERIAL_WORDS {
            return Some(OotxEvent::Header {
                len,
                protocol: (le16(&self.buf, 2) & 0x3f) as u8,
                serial: le32(&self.buf, 4),
            });
        }
        if words == OOTX_WORDS && len == OOTX_PAYLOAD_LEN {
            return Some(OotxEvent::Frame(decode_ootx_frame(&self.buf)));
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds a valid version 6 capture buffer.
    pub fn frame_bytes(serial: u32, reset_count: u8, gravity: [i8; 3]) -> [u8; OOTX_BUFFER_LEN] {
        let mut buf = [0u8; OOTX_BUFFER_LEN];
        buf[0..2].copy_from_slice(&OOTX_PAYLOAD_LEN.to_le_bytes());
        let p = &mut buf[2..];
        // Firmware 436, protocol 6.
        p[0..2].copy_from_slice(&((436u16 << 6) | 6).to_le_bytes());
        p[2..6].copy_from_slice(&serial.to_le_bytes());
        // phase: 0.25, -0.5
        p[6..8].copy_from_slice(&0x3400u16.to_le_bytes());
        p[8..10].copy_from_slice(&0xb800u16.to_le_bytes());
        // tilt: 1.0, -2.0
        p[10..12].copy_from_slice(&0x3c00u16.to_le_bytes());
        p[12..14].copy_from_slice(&0xc000u16.to_le_bytes());
        p[14] = reset_count;
        p[15] = 9;
        // curve: 0.0, subnormal 2^-24
        p[16..18].copy_from_slice(&0x0000u16.to_le_bytes());
        p[18..20].copy_from_slice(&0x0001u16.to_le_bytes());
        p[20] = gravity[0] as u8;
        p[21] = gravity[1] as u8;
        p[22] = gravity[2] as u8;
        // gibphase: 3.0, 0.5
        p[23..25].copy_from_slice(&0x4200u16.to_le_bytes());
        p[25..27].copy_from_slice(&0x3800u16.to_le_bytes());
        // gibmag: 65504, -0.25
        p[27..29].copy_from_slice(&0x7bffu16.to_le_bytes());
        p[29..31].copy_from_slice(&0xb400u16.to_le_bytes());
        let crc = OOTX_CRC.checksum(&buf[2..35]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// The bits of a capture buffer as transmitted, sync bits included.
    pub fn frame_bits(buf: &[u8; OOTX_BUFFER_LEN]) -> Vec<bool> {
        let mut bits = Vec::new();
        for word in buf.chunks(2) {
            for byte in word {
                bits.extend((0..8).map(|i| byte & (0x80 >> i) != 0));
            }
            bits.push(true);
        }
        bits
    }

    /// Preamble: 17 zeros and a one.
    pub fn preamble() -> Vec<bool> {
        let mut bits = vec![false; 17];
        bits.push(true);
        bits
    }
}
