// THEORY:
// A Lighthouse base station sweeps the room with two rotating laser sheets.
// Before each sweep it floods the room with a sync flash whose length carries
// three bits: whether the sweep that follows is skipped, which rotor sweeps,
// and one bit of the station's self-description (OOTX) bitstream. The
// photodiodes of a tracked device report every flash and sweep as a
// `(sensor, duration, timestamp)` pulse.
//
// The layer is split the same way the signal is:
// 1.  **`report`**: raw HID bytes to pulse tuples.
// 2.  **`sync`**: the stateless tables: flash length to code bits, gap between
//     flashes to channel.
// 3.  **`ootx`**: the per-station bit accumulator and frame decoder.
// 4.  **`watchman`**: the stateful arbiter that merges the flash as seen by
//     many sensors into one sync pulse, routes it to the right station and
//     collects the sweeps that follow.

pub mod ootx;
pub mod report;
pub mod sync;
pub mod watchman;

pub use ootx::{BaseCalibration, OotxDecoder, OotxFrame, RotorCalibration};
pub use report::{Pulse, parse_pulse_report};
pub use sync::{Channel, SyncCode};
pub use watchman::{BaseStationInfo, Mode, Sweep, SweepFrame, Watchman, WatchmanEvent};
