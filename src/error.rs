// THEORY:
// Errors are rare in this crate. The hot paths (extent scanning, blob assembly,
// pulse arbitration) never fail: capacity overflow truncates and malformed
// timing degrades to "no observation this cycle". The enums below cover the
// few places where a caller hands us bytes that can be structurally wrong:
// a camera frame of the wrong size, a HID report, or a completed OOTX frame.

use thiserror::Error;

use crate::core_modules::lighthouse::Pulse;

/// A camera frame could not be processed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame buffer holds {actual} bytes, expected {width}x{height} = {expected}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// A raw HID report could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("invalid {actual}-byte report, expected {expected} bytes")]
    Length { expected: usize, actual: usize },
    #[error("unexpected report id 0x{0:02x}")]
    ReportId(u8),
    /// Decoding stopped at a bad slot. `pulses` holds the slots before it.
    #[error("unhandled sensor id: {sensor_id:04x}")]
    SensorId { sensor_id: u16, pulses: Vec<Pulse> },
    #[error("unexpected pattern length: {0}")]
    PatternLength(u8),
    #[error("unexpected pattern: 0x{0:x}")]
    PatternSymbols(u32),
    #[error("LED index {index} out of range for {num} LEDs")]
    LedIndex { index: u16, num: u16 },
}

/// A fully received OOTX frame was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OotxError {
    #[error("unexpected OOTX payload length: {0}")]
    Length(u16),
    #[error("CRC error: {computed:08x} != {stored:08x}")]
    Crc { computed: u32, stored: u32 },
    #[error("unexpected OOTX frame version: {0}")]
    Version(u8),
}
