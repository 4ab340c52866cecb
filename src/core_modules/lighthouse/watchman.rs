// THEORY:
// The `Watchman` watches the photodiodes of one tracked device. Every sensor
// that can see a base station reports its sync flash, so a single flash
// arrives as a burst of nearly simultaneous long pulses. Short pulses in
// between are the laser sheet sweeping across individual sensors.
//
// Key architectural principles:
// 1.  **Arbitration**: Long pulses that overlap the pending sync pulse are
//     merged into it, remembering which sensors saw it. The pending pulse is
//     finalized by the first pulse that starts after it has ended.
// 2.  **Classification**: A finalized sync pulse's duration carries the
//     skip/data/rotor bits; the gap since the previous one names the channel.
//     A near-zero gap is the same flash finalized twice; any other unexpected
//     gap means we lost track of the stations and both decoders restart.
// 3.  **Two Stations**: Channels A and B feed base slot 0, channel C feeds
//     slot 1. Each slot accumulates OOTX bits and the sweeps it emitted.
// 4.  **Events Out, No Callbacks**: `handle_pulse` returns what the pulse
//     caused. The caller decides what to do with spotted stations, new
//     calibration and completed sweep frames.

use std::mem;

use glam::Vec3;
use log::{debug, info, warn};
use serde::Serialize;

use super::ootx::{
    BaseCalibration, OOTX_PAYLOAD_LEN, OOTX_PROTOCOL_VERSION, OotxDecoder, OotxEvent, OotxFrame,
};
use super::report::{MAX_SENSOR_ID, Pulse};
use super::sync::{Channel, SYNC_MIN_DURATION, SyncCode, SyncGap, attribute_channel};

/// Sweeps recorded per base station between two of its sync pulses.
pub const MAX_SWEEPS_PER_FRAME: usize = 32;

// The vertical sweep starts 55555 ticks after its sync pulse, the horizontal
// one ends 346667 ticks after it.
const SWEEP_WINDOW_START: i32 = 55_555;
const SWEEP_WINDOW_END: i32 = 346_667;
const SWEEP_WINDOW_MARGIN: i32 = 1_000;
const MAX_SWEEP_OFFSET: i32 = 379_000;

fn in_sweep_window(offset: i32, duration: u16) -> bool {
    offset > SWEEP_WINDOW_START - SWEEP_WINDOW_MARGIN
        && offset + i32::from(duration) < SWEEP_WINDOW_END + SWEEP_WINDOW_MARGIN
}

/// What the watchman is currently looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Accumulating the sensors that saw a sync flash.
    Sync,
    #[default]
    Sweep,
}

/// Everything a base station has told us about itself.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BaseStationInfo {
    pub channel: Option<Channel>,
    pub serial: u32,
    pub firmware_version: u16,
    pub model_id: u8,
    pub reset_count: u8,
    pub calibration: BaseCalibration,
    /// Unit vector, or zero if the station reported none.
    pub gravity: Vec3,
}

/// One sensor crossed by a laser sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sweep {
    pub sensor_id: u8,
    /// Ticks since the sweeping station's sync pulse.
    pub offset: u32,
    pub duration: u16,
    pub rotor: u8,
}

/// The sweeps a base station emitted between two of its sync pulses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SweepFrame {
    pub sync_timestamp: u32,
    pub sync_duration: u16,
    pub sweeps: Vec<Sweep>,
    /// Ticks from this frame's sync pulse to the next one.
    pub frame_duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WatchmanEvent {
    /// A station's serial was received for the first time. Not yet validated.
    BaseSpotted { channel: Channel, serial: u32 },
    /// A complete OOTX frame passed validation.
    Calibration {
        channel: Channel,
        base: BaseStationInfo,
    },
    /// A sweep frame was completed by the station's next sync pulse.
    Frame { channel: Channel, frame: SweepFrame },
}

/// Decoder state for one base station slot.
#[derive(Debug, Clone, Default)]
pub struct BaseStation {
    info: BaseStationInfo,
    ootx: OotxDecoder,
    last_sync_timestamp: u32,
    active_rotor: u8,
    frame: SweepFrame,
}

impl BaseStation {
    pub fn info(&self) -> &BaseStationInfo {
        &self.info
    }

    pub fn ootx(&self) -> &OotxDecoder {
        &self.ootx
    }

    pub fn active_rotor(&self) -> u8 {
        self.active_rotor
    }

    fn handle_data_bit(
        &mut self,
        name: &str,
        channel: Channel,
        data: bool,
        events: &mut Vec<WatchmanEvent>,
    ) {
        match self.ootx.push_bit(data) {
            Some(OotxEvent::Header {
                len,
                protocol,
                serial,
            }) => {
                if len != OOTX_PAYLOAD_LEN {
                    warn!("{}: unexpected OOTX frame length {}", name, len);
                } else if protocol == OOTX_PROTOCOL_VERSION && serial != self.info.serial {
                    info!("{}: spotted Lighthouse Base {:X}", name, serial);
                    events.push(WatchmanEvent::BaseSpotted { channel, serial });
                }
            }
            Some(OotxEvent::Frame(Ok(frame))) => {
                self.apply_frame(name, &frame);
                events.push(WatchmanEvent::Calibration {
                    channel,
                    base: self.info.clone(),
                });
            }
            Some(OotxEvent::Frame(Err(err))) => {
                warn!("{}: Lighthouse Base {:X}: {}", name, self.info.serial, err);
            }
            Some(OotxEvent::MissedSyncBit) => {
                debug!("{}: missed a sync bit, restarting", name);
            }
            None => {}
        }
    }

    fn apply_frame(&mut self, name: &str, frame: &OotxFrame) {
        let info = &mut self.info;
        let serial_changed = info.serial != frame.serial;

        info.serial = frame.serial;
        info.firmware_version = frame.firmware_version;
        info.model_id = frame.model_id;
        info.calibration = frame.calibration;

        if serial_changed {
            info!(
                "{}: Lighthouse Base {:X}: firmware version: {}, model id: {}, channel: {}",
                name,
                info.serial,
                info.firmware_version,
                info.model_id,
                info.channel.map_or_else(|| "?".to_string(), |c| c.to_string()),
            );
            for (i, rotor) in info.calibration.rotor.iter().enumerate() {
                info!(
                    "{}: Lighthouse Base {:X}: rotor {}: [ {:12.9} {:12.9} {:12.9} {:12.9} {:12.9} ]",
                    name,
                    info.serial,
                    i,
                    rotor.tilt,
                    rotor.phase,
                    rotor.curve,
                    rotor.gibphase,
                    rotor.gibmag
                );
            }
        }

        let [x, y, z] = frame.gravity.map(f32::from);
        let gravity = Vec3::new(x, y, z).normalize_or_zero();
        if gravity != info.gravity {
            info.gravity = gravity;
            info!(
                "{}: Lighthouse Base {:X}: gravity: [ {:9.6} {:9.6} {:9.6} ]",
                name, info.serial, gravity.x, gravity.y, gravity.z
            );
        }

        if info.reset_count != frame.reset_count {
            info.reset_count = frame.reset_count;
            info!(
                "{}: Lighthouse Base {:X}: reset count: {}",
                name, info.serial, info.reset_count
            );
        }
    }

    /// Closes the current sweep frame at the station's next sync pulse.
    fn finish_frame(&mut self, sync_timestamp: u32) -> Option<SweepFrame> {
        if self.frame.sweeps.is_empty() {
            return None;
        }
        let mut frame = mem::take(&mut self.frame);
        frame.frame_duration = sync_timestamp.wrapping_sub(frame.sync_timestamp);
        Some(frame)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SyncPulse {
    timestamp: u32,
    duration: u16,
}

/// Lighthouse pulse decoder for one receiver sensor array.
#[derive(Debug, Clone)]
pub struct Watchman {
    name: String,
    /// Slot 0 decodes channels A and B, slot 1 channel C.
    bases: [BaseStation; 2],
    /// Slot of the station expected to sweep next.
    active_base: Option<usize>,
    /// The sync pulse being accumulated.
    last_sync: SyncPulse,
    /// Sensors that reported `last_sync`, one bit per sensor id.
    seen_by: u32,
    mode: Mode,
    /// Start of the previous finalized sync pulse.
    last_timestamp: u32,
}

impl Watchman {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bases: Default::default(),
            active_base: None,
            last_sync: SyncPulse::default(),
            seen_by: 0,
            mode: Mode::default(),
            last_timestamp: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn bases(&self) -> &[BaseStation; 2] {
        &self.bases
    }

    pub fn base(&self, channel: Channel) -> &BaseStation {
        &self.bases[channel.base_index()]
    }

    pub fn active_base(&self) -> Option<&BaseStation> {
        self.active_base.map(|i| &self.bases[i])
    }

    /// Sensors that have reported the sync pulse being accumulated.
    pub fn seen_by(&self) -> u32 {
        self.seen_by
    }

    pub fn handle(&mut self, pulse: &Pulse) -> Vec<WatchmanEvent> {
        self.handle_pulse(pulse.sensor_id, pulse.duration, pulse.timestamp)
    }

    /// Processes one pulse and returns the events it caused.
    pub fn handle_pulse(
        &mut self,
        sensor_id: u8,
        duration: u16,
        timestamp: u32,
    ) -> Vec<WatchmanEvent> {
        let mut events = Vec::new();

        if u16::from(sensor_id) > MAX_SENSOR_ID {
            warn!("{}: unhandled sensor id: {:04x}", self.name, sensor_id);
            return events;
        }

        let dt = timestamp.wrapping_sub(self.last_sync.timestamp) as i32;
        if self.seen_by != 0 && dt > i32::from(self.last_sync.duration) {
            let sync = self.last_sync;
            self.handle_sync_pulse(sync, &mut events);
            self.seen_by = 0;
        }

        if duration >= SYNC_MIN_DURATION {
            self.accumulate_sync_pulse(sensor_id, timestamp, duration);
        } else {
            self.mode = Mode::Sweep;
            self.handle_sweep_pulse(sensor_id, timestamp, duration);
        }

        events
    }

    fn accumulate_sync_pulse(&mut self, sensor_id: u8, timestamp: u32, duration: u16) {
        let dt = timestamp.wrapping_sub(self.last_sync.timestamp) as i32;

        if self.seen_by == 0 || dt > i32::from(self.last_sync.duration) {
            self.seen_by = 1 << sensor_id;
            self.last_sync = SyncPulse {
                timestamp,
                duration,
            };
            self.mode = Mode::Sync;
        } else {
            self.seen_by |= 1 << sensor_id;
            // Sensors disagree slightly on when the flash started.
            if dt < 0 {
                self.last_sync.timestamp = timestamp;
            }
            self.last_sync.duration = duration;
        }
    }

    fn handle_sync_pulse(&mut self, sync: SyncPulse, events: &mut Vec<WatchmanEvent>) {
        let Some(code) = SyncCode::from_duration(sync.duration) else {
            debug!("{}: Unknown pulse length: {}", self.name, sync.duration);
            return;
        };

        let dt = sync.timestamp.wrapping_sub(self.last_timestamp) as i32;
        let channel = match attribute_channel(dt) {
            SyncGap::Channel(channel) => channel,
            SyncGap::Duplicate => {
                self.last_timestamp = sync.timestamp;
                return;
            }
            SyncGap::Irregular => {
                if self.last_timestamp != 0 {
                    warn!(
                        "{}: Irregular sync pulse: {:08x} -> {:08x} ({:+})",
                        self.name, self.last_timestamp, sync.timestamp, dt
                    );
                }
                for base in &mut self.bases {
                    base.ootx.reset();
                }
                self.last_timestamp = sync.timestamp;
                return;
            }
        };

        let index = channel.base_index();
        let base = &mut self.bases[index];
        base.info.channel = Some(channel);
        base.last_sync_timestamp = sync.timestamp;
        base.handle_data_bit(&self.name, channel, code.data(), events);
        if let Some(frame) = base.finish_frame(sync.timestamp) {
            events.push(WatchmanEvent::Frame { channel, frame });
        }

        base.active_rotor = code.rotor();
        if !code.skip() {
            self.active_base = Some(index);
            base.frame.sync_timestamp = sync.timestamp;
            base.frame.sync_duration = sync.duration;
        }

        self.last_timestamp = sync.timestamp;
    }

    fn handle_sweep_pulse(&mut self, sensor_id: u8, timestamp: u32, duration: u16) {
        let Some(index) = self.active_base else {
            debug!("{}: sweep without sync", self.name);
            return;
        };
        let base = &mut self.bases[index];
        let offset = timestamp.wrapping_sub(base.last_sync_timestamp) as i32;

        if offset > MAX_SWEEP_OFFSET {
            return;
        }
        if !in_sweep_window(offset, duration) {
            debug!(
                "{}: sweep offset out of range: rotor {} offset {} duration {}",
                self.name, base.active_rotor, offset, duration
            );
            return;
        }
        if base.frame.sweeps.len() >= MAX_SWEEPS_PER_FRAME {
            debug!(
                "{}: frame already contains {} sweep pulses",
                self.name, MAX_SWEEPS_PER_FRAME
            );
            return;
        }

        base.frame.sweeps.push(Sweep {
            sensor_id,
            offset: offset as u32,
            duration,
            rotor: base.active_rotor,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::lighthouse::ootx::OotxState;
    use crate::core_modules::lighthouse::ootx::test_support::{frame_bits, frame_bytes, preamble};

    const START: u32 = 1_000_000;
    const PERIOD: u32 = 400_000;

    /// One sync flash as seen by three sensors with slightly skewed clocks.
    fn flash(watchman: &mut Watchman, timestamp: u32, data: bool) -> Vec<WatchmanEvent> {
        let base = if data { 4000 } else { 3000 };
        let mut events = Vec::new();
        events.extend(watchman.handle_pulse(1, base, timestamp + 2));
        events.extend(watchman.handle_pulse(7, base - 10, timestamp));
        events.extend(watchman.handle_pulse(12, base + 10, timestamp + 5));
        events
    }

    fn calibrations(events: &[WatchmanEvent]) -> Vec<(Channel, &BaseStationInfo)> {
        events
            .iter()
            .filter_map(|e| match e {
                WatchmanEvent::Calibration { channel, base } => Some((*channel, base)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sync_flash_is_merged_across_sensors() {
        let mut watchman = Watchman::new("test");
        assert_eq!(watchman.mode(), Mode::Sweep);
        flash(&mut watchman, START, true);
        assert_eq!(watchman.mode(), Mode::Sync);
        assert_eq!(watchman.seen_by(), (1 << 1) | (1 << 7) | (1 << 12));
        assert_eq!(watchman.last_sync.timestamp, START);
        assert_eq!(watchman.last_sync.duration, 4010);
    }

    #[test]
    fn ootx_frame_over_sync_flashes_yields_one_calibration() {
        let serial = 0x8e2f_41b7;
        let buf = frame_bytes(serial, 2, [0, 127, 0]);

        // The first flash only establishes the timing reference.
        let mut bits = vec![false];
        bits.extend(preamble());
        bits.extend(frame_bits(&buf));

        let mut watchman = Watchman::new("test");
        let mut events = Vec::new();
        let mut timestamp = START;
        for &bit in &bits {
            events.extend(flash(&mut watchman, timestamp, bit));
            timestamp += PERIOD;
        }
        // A sweep pulse finalizes the last flash.
        events.extend(watchman.handle_pulse(3, 200, timestamp - PERIOD + 100_000));

        let spotted: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, WatchmanEvent::BaseSpotted { .. }))
            .collect();
        assert_eq!(
            spotted,
            [&WatchmanEvent::BaseSpotted {
                channel: Channel::A,
                serial
            }]
        );

        let calibrations = calibrations(&events);
        assert_eq!(calibrations.len(), 1);
        let (channel, base) = calibrations[0];
        assert_eq!(channel, Channel::A);
        assert_eq!(base.serial, serial);
        assert_eq!(base.firmware_version, 436);
        assert_eq!(base.model_id, 9);
        assert_eq!(base.reset_count, 2);
        assert_eq!(base.calibration.rotor[0].tilt, 1.0);
        assert_eq!(base.calibration.rotor[1].phase, -0.5);
        assert!(base.gravity.abs_diff_eq(Vec3::Y, 1e-6));

        assert_eq!(watchman.base(Channel::A).info(), base);
        assert_eq!(watchman.base(Channel::A).info().channel, Some(Channel::A));
        assert_eq!(watchman.base(Channel::C).info().serial, 0);
    }

    #[test]
    fn bad_frame_keeps_previous_calibration() {
        let serial = 0x51c0_0a11;
        let good = frame_bytes(serial, 2, [0, 127, 0]);
        let mut bad = frame_bytes(serial, 2, [0, 127, 0]);
        // Reset count changed in flight; the stored CRC no longer matches.
        bad[2 + 14] = 5;

        let mut bits = vec![false];
        for buf in [&good, &bad] {
            bits.extend(preamble());
            bits.extend(frame_bits(buf));
        }

        let mut watchman = Watchman::new("test");
        let mut events = Vec::new();
        let mut timestamp = START;
        for &bit in &bits {
            events.extend(flash(&mut watchman, timestamp, bit));
            timestamp += PERIOD;
        }
        events.extend(watchman.handle_pulse(3, 200, timestamp - PERIOD + 100_000));

        let calibrations = calibrations(&events);
        assert_eq!(calibrations.len(), 1);
        let (_, base) = calibrations[0];
        assert_eq!(base.reset_count, 2);
        assert_eq!(watchman.base(Channel::A).info(), base);
        // The bad frame was fully received before being rejected.
        assert_eq!(watchman.base(Channel::A).ootx().buffer()[2 + 14], 5);
    }

    #[test]
    fn two_stations_decode_on_separate_channels() {
        let serial_b = 0x0b0b_0001;
        let serial_c = 0x0c0c_0002;
        let buf_b = frame_bytes(serial_b, 1, [0, 127, 0]);
        let buf_c = frame_bytes(serial_c, 4, [127, 0, 0]);

        // B's first flash only establishes the timing reference, so C's
        // stream starts one flash earlier and is padded at the end.
        let mut bits_b = vec![false];
        bits_b.extend(preamble());
        bits_b.extend(frame_bits(&buf_b));
        let mut bits_c = preamble();
        bits_c.extend(frame_bits(&buf_c));
        bits_c.push(false);
        assert_eq!(bits_b.len(), bits_c.len());

        let mut watchman = Watchman::new("test");
        let mut events = Vec::new();
        let mut timestamp = START;
        for (&bit_b, &bit_c) in bits_b.iter().zip(&bits_c) {
            events.extend(flash(&mut watchman, timestamp, bit_b));
            events.extend(flash(&mut watchman, timestamp + 20_000, bit_c));
            timestamp += PERIOD;
        }
        events.extend(watchman.handle_pulse(3, 200, timestamp - PERIOD + 120_000));

        let mut spotted: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                WatchmanEvent::BaseSpotted { channel, serial } => Some((*channel, *serial)),
                _ => None,
            })
            .collect();
        spotted.sort_by_key(|&(_, serial)| serial);
        assert_eq!(spotted, [(Channel::B, serial_b), (Channel::C, serial_c)]);

        let mut calibrations = calibrations(&events);
        calibrations.sort_by_key(|&(_, base)| base.serial);
        assert_eq!(calibrations.len(), 2);
        assert_eq!(calibrations[0].0, Channel::B);
        assert_eq!(calibrations[0].1.serial, serial_b);
        assert_eq!(calibrations[0].1.reset_count, 1);
        assert_eq!(calibrations[1].0, Channel::C);
        assert_eq!(calibrations[1].1.serial, serial_c);
        assert_eq!(calibrations[1].1.reset_count, 4);

        let [slot0, slot1] = watchman.bases();
        assert_eq!(slot0.info().channel, Some(Channel::B));
        assert_eq!(slot0.info().serial, serial_b);
        assert!(slot0.info().gravity.abs_diff_eq(Vec3::Y, 1e-6));
        assert_eq!(slot1.info().channel, Some(Channel::C));
        assert_eq!(slot1.info().serial, serial_c);
        assert!(slot1.info().gravity.abs_diff_eq(Vec3::X, 1e-6));
        assert_eq!(watchman.base(Channel::B).info(), slot0.info());
    }

    #[test]
    fn irregular_sync_resets_both_decoders() {
        let mut watchman = Watchman::new("test");
        let mut timestamp = START;
        for bit in std::iter::once(false).chain(preamble()) {
            flash(&mut watchman, timestamp, bit);
            timestamp += PERIOD;
        }
        // Finalize the preamble's closing one.
        flash(&mut watchman, timestamp, true);
        assert_eq!(
            watchman.base(Channel::A).ootx().state(),
            OotxState::Capturing { word: 0, bit: 0 }
        );

        // Next flash arrives half a period late.
        timestamp += PERIOD + PERIOD / 2;
        flash(&mut watchman, timestamp, true);
        flash(&mut watchman, timestamp + PERIOD, true);
        assert_eq!(watchman.base(Channel::A).ootx().state(), OotxState::Idle);
    }

    #[test]
    fn sweeps_are_collected_into_frames() {
        let mut watchman = Watchman::new("test");
        flash(&mut watchman, START, false);
        let t1 = START + PERIOD;
        flash(&mut watchman, t1, false);

        // Finalizes t1. The sweep itself is too early in the window to count.
        assert!(watchman.handle_pulse(5, 100, t1 + 20_000).is_empty());
        assert_eq!(watchman.mode(), Mode::Sweep);
        assert!(watchman.active_base().is_some());

        watchman.handle_pulse(5, 100, t1 + 100_000);
        watchman.handle_pulse(6, 120, t1 + 200_000);
        // Past the end of the sweep window.
        watchman.handle_pulse(6, 120, t1 + 350_000);

        let t2 = t1 + PERIOD;
        assert!(flash(&mut watchman, t2, false).is_empty());
        let events = watchman.handle_pulse(5, 100, t2 + 100_000);
        assert_eq!(
            events,
            vec![WatchmanEvent::Frame {
                channel: Channel::A,
                frame: SweepFrame {
                    sync_timestamp: t1,
                    sync_duration: 3010,
                    sweeps: vec![
                        Sweep {
                            sensor_id: 5,
                            offset: 100_000,
                            duration: 100,
                            rotor: 0
                        },
                        Sweep {
                            sensor_id: 6,
                            offset: 200_000,
                            duration: 120,
                            rotor: 0
                        },
                    ],
                    frame_duration: PERIOD,
                },
            }]
        );
    }

    #[test]
    fn skip_flash_does_not_become_active() {
        let mut watchman = Watchman::new("test");
        // 5000 ticks: skip set.
        watchman.handle_pulse(0, 5000, START);
        watchman.handle_pulse(0, 5000, START + PERIOD);
        watchman.handle_pulse(0, 100, START + PERIOD + 100_000);
        assert!(watchman.active_base().is_none());
        assert_eq!(watchman.base(Channel::A).info().channel, Some(Channel::A));
    }

    #[test]
    fn unknown_sync_length_is_ignored() {
        let mut watchman = Watchman::new("test");
        watchman.handle_pulse(0, 9000, START);
        watchman.handle_pulse(0, 100, START + 50_000);
        assert_eq!(watchman.last_timestamp, 0);
        assert!(watchman.bases().iter().all(|b| b.info().channel.is_none()));
    }
}
