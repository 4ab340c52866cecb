// THEORY:
// A tracking model is the tracked device's description of itself: where its
// LEDs (or photodiodes) sit in the device's own coordinate frame, which way
// each one faces, and, for blinking LEDs, the 10-bit code each one flashes.
// Positions and normals are consumed by the pose solver; the code table is
// what the flicker identifier matches observed brightness histories against.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ReportError;

/// Length of an LED blink code, in frames.
pub const PATTERN_BITS: u32 = 10;
/// Mask selecting the bits of a blink code.
pub const PATTERN_MASK: u16 = (1 << PATTERN_BITS) - 1;

/// Blink codes of LEDs 0 to 39 as read from a Rift DK2.
const RIFT_DK2_PATTERNS: [u16; 40] = [
    0x001, 0x006, 0x01a, 0x01d, 0x028, 0x02f, 0x033, 0x04b, 0x04c, 0x057,
    0x062, 0x065, 0x079, 0x07e, 0x090, 0x0a4, 0x114, 0x151, 0x183, 0x18c,
    0x199, 0x1aa, 0x1b5, 0x1c0, 0x1cf, 0x1d6, 0x1e9, 0x1f3, 0x1fc, 0x230,
    0x252, 0x282, 0x285, 0x29b, 0x29c, 0x2ae, 0x2b7, 0x2c8, 0x2d1, 0x2e3,
];

/// Known blink codes, indexed by LED id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedPatternTable {
    patterns: Vec<u16>,
}

impl LedPatternTable {
    /// Builds a table from raw codes. Bits above the 10-bit code are dropped.
    pub fn new(patterns: impl IntoIterator<Item = u16>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| p & PATTERN_MASK).collect(),
        }
    }

    pub fn rift_dk2() -> Self {
        Self::new(RIFT_DK2_PATTERNS)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.patterns
    }

    pub fn get(&self, led: usize) -> Option<u16> {
        self.patterns.get(led).copied()
    }

    /// Stores the code for `led`, growing the table if needed.
    pub fn set(&mut self, led: usize, pattern: u16) {
        if led >= self.patterns.len() {
            self.patterns.resize(led + 1, 0);
        }
        self.patterns[led] = pattern & PATTERN_MASK;
    }
}

/// Reference points of a tracked device in its local coordinate system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingModel {
    /// LED or photodiode positions, in meters.
    pub points: Vec<Vec3>,
    /// Unit vectors each point faces along, parallel to `points`.
    pub normals: Vec<Vec3>,
    /// Blink codes, parallel to `points`. Empty for non-blinking devices.
    #[serde(default)]
    pub patterns: LedPatternTable,
}

impl TrackingModel {
    pub fn num_points(&self) -> usize {
        self.points.len()
    }
}

/// One LED's entry from the headset's LED pattern feature report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedPatternReport {
    /// LED index this report describes.
    pub index: u16,
    /// Total number of LEDs on the device.
    pub num: u16,
    /// The decoded 10-bit blink code.
    pub pattern: u16,
}

pub const LED_PATTERN_REPORT_ID: u8 = 0x10;
pub const LED_PATTERN_REPORT_LEN: usize = 12;

/// Decodes an LED pattern feature report.
///
/// Layout: id, le16 echo, pattern length, le32 pattern, le16 index, le16 num.
/// The pattern field holds 10 two-bit symbols, 1 for dark and 3 for bright,
/// first symbol in the low bits.
pub fn decode_led_pattern_report(buf: &[u8]) -> Result<LedPatternReport, ReportError> {
    if buf.len() != LED_PATTERN_REPORT_LEN {
        return Err(ReportError::Length {
            expected: LED_PATTERN_REPORT_LEN,
            actual: buf.len(),
        });
    }
    if buf[0] != LED_PATTERN_REPORT_ID {
        return Err(ReportError::ReportId(buf[0]));
    }

    let pattern_length = buf[3];
    let raw = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let index = u16::from_le_bytes([buf[8], buf[9]]);
    let num = u16::from_le_bytes([buf[10], buf[11]]);

    if index >= num {
        return Err(ReportError::LedIndex { index, num });
    }
    if u32::from(pattern_length) != PATTERN_BITS {
        return Err(ReportError::PatternLength(pattern_length));
    }
    if raw & !0xaaaaa != 0x55555 {
        return Err(ReportError::PatternSymbols(raw));
    }

    let pattern = (0..PATTERN_BITS).fold(0u16, |acc, bit| {
        acc | ((((raw >> (2 * bit + 1)) & 1) as u16) << bit)
    });

    Ok(LedPatternReport {
        index,
        num,
        pattern,
    })
}
