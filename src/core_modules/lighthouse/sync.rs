use std::fmt;

use serde::Serialize;

/// Shortest pulse, in 48 MHz ticks, that can be a sync flash.
pub const SYNC_MIN_DURATION: u16 = 2750;
/// Longest pulse accepted as a sync flash.
pub const SYNC_MAX_DURATION: u16 = 6750;

const SYNC_CODE_STEP: u16 = 500;

const SKIP_BIT: u8 = 4;
const DATA_BIT: u8 = 2;
const ROTOR_BIT: u8 = 1;

/// Gap between flashes of a single base station (48 MHz / 120 Hz).
const SINGLE_BASE_PERIOD: i32 = 400_000;
/// Gap from station C's flash to station B's in a two-station setup.
const CHANNEL_B_GAP: i32 = 380_000;
/// Gap from station B's flash to station C's.
const CHANNEL_C_GAP: i32 = 20_000;
const CHANNEL_TOLERANCE: i32 = 4_000;

/// The three bits carried by a sync flash's duration.
///
/// ```text
/// duration  3000 3500 4000 4500 5000 5500 6000 6500 (48 MHz ticks)
/// skip         0    0    0    0    1    1    1    1
/// data         0    0    1    1    0    0    1    1
/// rotor        0    1    0    1    0    1    0    1
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCode(u8);

impl SyncCode {
    /// Decodes a flash duration. Durations outside the table yield `None`.
    pub fn from_duration(duration: u16) -> Option<Self> {
        if !(SYNC_MIN_DURATION..=SYNC_MAX_DURATION).contains(&duration) {
            return None;
        }
        let code = ((duration - SYNC_MIN_DURATION) / SYNC_CODE_STEP).min(7);
        Some(Self(code as u8))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// The emitting station will not sweep in the following window.
    pub fn skip(self) -> bool {
        self.0 & SKIP_BIT != 0
    }

    /// One bit of the OOTX stream.
    pub fn data(self) -> bool {
        self.0 & DATA_BIT != 0
    }

    /// 0 for a horizontal sweep, 1 for vertical.
    pub fn rotor(self) -> u8 {
        self.0 & ROTOR_BIT
    }
}

/// Logical base station channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Channel {
    /// The only station in view.
    A,
    /// First station of a pair.
    B,
    /// Second station of a pair.
    C,
}

impl Channel {
    /// Index of the base station slot this channel is decoded into.
    pub fn base_index(self) -> usize {
        usize::from(self == Channel::C)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Channel::A => 'A',
            Channel::B => 'B',
            Channel::C => 'C',
        };
        write!(f, "{c}")
    }
}

/// What the gap since the previous finalized sync says about a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncGap {
    Channel(Channel),
    /// The same flash, finalized twice.
    Duplicate,
    /// Matches no known cadence.
    Irregular,
}

fn near(dt: i32, expected: i32) -> bool {
    dt > expected - CHANNEL_TOLERANCE && dt < expected + CHANNEL_TOLERANCE
}

/// Attributes a sync pulse to a channel by the gap `dt` since the previous one.
pub fn attribute_channel(dt: i32) -> SyncGap {
    if near(dt, SINGLE_BASE_PERIOD) {
        SyncGap::Channel(Channel::A)
    } else if near(dt, CHANNEL_B_GAP) {
        SyncGap::Channel(Channel::B)
    } else if near(dt, CHANNEL_C_GAP) {
        SyncGap::Channel(Channel::C)
    } else if near(dt, 0) {
        SyncGap::Duplicate
    } else {
        SyncGap::Irregular
    }
}
