use serde::{Deserialize, Serialize};

use crate::error::ReportError;

pub const PULSE_REPORT_ID: u8 = 0x21;
/// Report id, seven pulse slots and a reserved byte.
pub const PULSE_REPORT_LEN: usize = 58;
const PULSES_PER_REPORT: usize = 7;
const PULSE_SLOT_LEN: usize = 8;
const EMPTY_SLOT: u16 = 0xffff;
pub const MAX_SENSOR_ID: u16 = 31;

/// One light pulse as measured by a photodiode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pulse {
    pub sensor_id: u8,
    /// Pulse length in 48 MHz ticks.
    pub duration: u16,
    /// Rising edge, 48 MHz ticks, wrapping.
    pub timestamp: u32,
}

/// Parses a Lighthouse receiver pulse report.
///
/// Pulses come out in slot order, which is not necessarily time order. Empty
/// slots are skipped. A sensor id outside 0..=31 ends decoding; the pulses of
/// the slots before it are handed back inside the error.
pub fn parse_pulse_report(buf: &[u8]) -> Result<Vec<Pulse>, ReportError> {
    if buf.len() != PULSE_REPORT_LEN {
        return Err(ReportError::Length {
            expected: PULSE_REPORT_LEN,
            actual: buf.len(),
        });
    }
    if buf[0] != PULSE_REPORT_ID {
        return Err(ReportError::ReportId(buf[0]));
    }

    let mut pulses = Vec::with_capacity(PULSES_PER_REPORT);
    for slot in buf[1..1 + PULSES_PER_REPORT * PULSE_SLOT_LEN].chunks_exact(PULSE_SLOT_LEN) {
        let sensor_id = u16::from_le_bytes([slot[0], slot[1]]);
        if sensor_id == EMPTY_SLOT {
            continue;
        }
        if sensor_id > MAX_SENSOR_ID {
            return Err(ReportError::SensorId { sensor_id, pulses });
        }
        pulses.push(Pulse {
            sensor_id: sensor_id as u8,
            duration: u16::from_le_bytes([slot[2], slot[3]]),
            timestamp: u32::from_le_bytes([slot[4], slot[5], slot[6], slot[7]]),
        });
    }
    Ok(pulses)
}
