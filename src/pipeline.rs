// THEORY:
// The `pipeline` module is the top-level API of the camera path. It wires the
// stages of `core_modules` into a single per-frame call that turns a grayscale
// IR frame into a `Blobservation` whose blobs carry LED identities as soon as
// their blink codes have been recognised.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core_modules::blob::{Blobservation, MAX_BLOBS_PER_FRAME};
use crate::core_modules::blob_detector::blob_detector;
use crate::core_modules::extent::{ExtentLine, MAX_EXTENTS_PER_LINE, find_frame_extents};
use crate::core_modules::flicker::Flicker;
use crate::core_modules::tracker::{DEFAULT_MAX_MATCH_DISTANCE, Tracker};
use crate::core_modules::tracking_model::LedPatternTable;
use crate::error::FrameError;

// Re-export key data structures for the public API.
pub use crate::core_modules::blob::{Blob, Confidence, LedId};

/// Configuration for `Blobwatch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobwatchConfig {
    pub image_width: u32,
    pub image_height: u32,
    /// Runs recorded per row; capped at `MAX_EXTENTS_PER_LINE`.
    pub max_extents_per_line: usize,
    /// Blobs reported per frame; capped at `MAX_BLOBS_PER_FRAME`.
    pub max_blobs: usize,
    /// How far, in pixels, a blob may land from its predicted position and
    /// still be considered the same LED.
    pub max_match_distance: f32,
}

impl Default for BlobwatchConfig {
    fn default() -> Self {
        // Rift DK2 tracking camera.
        Self {
            image_width: 752,
            image_height: 480,
            max_extents_per_line: MAX_EXTENTS_PER_LINE,
            max_blobs: MAX_BLOBS_PER_FRAME,
            max_match_distance: DEFAULT_MAX_MATCH_DISTANCE,
        }
    }
}

/// Blob detection and LED identification for one camera.
pub struct Blobwatch {
    config: BlobwatchConfig,
    lines: Vec<ExtentLine>,
    observation: Blobservation,
    tracker: Tracker,
    flicker: Flicker,
}

impl Blobwatch {
    pub fn new(config: BlobwatchConfig, patterns: LedPatternTable) -> Self {
        Self {
            lines: vec![ExtentLine::new(); config.image_height as usize],
            observation: Blobservation::new(),
            tracker: Tracker::new(config.max_match_distance),
            flicker: Flicker::new(patterns),
            config,
        }
    }

    /// Processes one frame. `skipped` is the number of frames the camera
    /// dropped since the previous call.
    pub fn process(&mut self, frame: &[u8], skipped: u32) -> Result<&Blobservation, FrameError> {
        let width = self.config.image_width as usize;
        let height = self.config.image_height as usize;
        let expected = width * height;
        if frame.len() != expected {
            return Err(FrameError::SizeMismatch {
                width: self.config.image_width,
                height: self.config.image_height,
                expected,
                actual: frame.len(),
            });
        }

        // Stage 1: Scanline Extents
        find_frame_extents(
            frame,
            width,
            height,
            self.config.max_extents_per_line,
            &mut self.lines,
        );

        // Stage 2: Spatial Grouping
        blob_detector::find_blobs(&mut self.lines, self.config.max_blobs, &mut self.observation);

        // Stage 3: Cross-Frame Correspondence
        self.tracker.update(&mut self.observation);

        // Stage 4: Blink Identification
        self.flicker.process(&mut self.observation.blobs, skipped);
        self.tracker.remember(&self.observation);

        debug!(
            "blobwatch: {} blobs, {} identified, phase {:?}",
            self.observation.num_blobs(),
            self.observation.identified().count(),
            self.flicker.phase()
        );

        Ok(&self.observation)
    }

    pub fn config(&self) -> &BlobwatchConfig {
        &self.config
    }

    /// The result of the most recent `process` call.
    pub fn last_observation(&self) -> &Blobservation {
        &self.observation
    }

    /// Extents of the most recent frame, one line per row.
    pub fn extent_lines(&self) -> &[ExtentLine] {
        &self.lines
    }

    pub fn phase(&self) -> Option<u8> {
        self.flicker.phase()
    }

    /// Forgets all blob history, e.g. after the camera was restarted.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.observation.clear();
        self.flicker = Flicker::new(self.flicker.patterns().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32) -> BlobwatchConfig {
        BlobwatchConfig {
            image_width: width,
            image_height: height,
            ..BlobwatchConfig::default()
        }
    }

    /// Paints a `size` x `size` bright square with its top-left corner at (x, y).
    fn square(frame: &mut [u8], width: usize, x: usize, y: usize, size: usize) {
        for row in y..y + size {
            frame[row * width + x..row * width + x + size].fill(230);
        }
    }

    #[test]
    fn single_scanline_yields_one_extent() {
        let mut blobwatch = Blobwatch::new(config(32, 1), LedPatternTable::rift_dk2());
        let mut frame = vec![0u8; 32];
        frame[9..17].fill(200);
        let ob = blobwatch.process(&frame, 0).expect("frame size matches");
        assert_eq!(ob.num_blobs(), 0);

        let extents = blobwatch.extent_lines()[0].as_slice();
        assert_eq!(extents.len(), 1);
        assert_eq!((extents[0].start, extents[0].end), (9, 16));
    }

    #[test]
    fn stacked_runs_yield_one_blob() {
        let width = 40;
        let mut frame = vec![0u8; width * 8];
        let runs = [(10, 14), (9, 15), (9, 15), (10, 14), (11, 13)];
        for (row, (start, end)) in runs.into_iter().enumerate() {
            frame[row * width + start..=row * width + end].fill(200);
        }
        let mut blobwatch = Blobwatch::new(config(width as u32, 8), LedPatternTable::rift_dk2());
        let ob = blobwatch.process(&frame, 0).expect("frame size matches");

        assert_eq!(ob.num_blobs(), 1);
        let b = ob.blobs[0];
        assert_eq!((b.top, b.bottom), (0, 4));
        assert_eq!((b.left, b.right), (9, 15));
        assert_eq!(b.age, 0);
    }

    #[test]
    fn rejects_wrong_frame_size() {
        let mut blobwatch = Blobwatch::new(config(16, 16), LedPatternTable::rift_dk2());
        assert_eq!(
            blobwatch.process(&[0u8; 100], 0).err(),
            Some(FrameError::SizeMismatch {
                width: 16,
                height: 16,
                expected: 256,
                actual: 100
            })
        );
    }

    #[test]
    fn rising_then_flat_spot_is_identified() {
        let (width, height) = (48usize, 32usize);
        let table = LedPatternTable::new([0x001, 0x0f0, 0x3ff]);
        let mut blobwatch = Blobwatch::new(config(width as u32, height as u32), table);

        // Frame 0: 5x5 spot. Frame 1: grows to 6x6 (+44%). Then unchanged.
        for frame_index in 0..12 {
            let mut frame = vec![0u8; width * height];
            let size = if frame_index == 0 { 5 } else { 6 };
            square(&mut frame, width, 20, 10, size);
            blobwatch.process(&frame, 0).expect("frame size matches");
        }

        let ob = blobwatch.last_observation();
        assert_eq!(ob.num_blobs(), 1);
        let b = ob.blobs[0];
        assert_eq!(b.age, 11);
        assert_eq!(b.pattern, 0x3ff);
        assert_eq!(
            b.led,
            Some(LedId {
                index: 2,
                confidence: Confidence::Exact
            })
        );
        assert_eq!(ob.tracked_blob(0), Some(&ob.blobs[0]));
    }

    #[test]
    fn blink_history_survives_from_frame_to_frame() {
        let (width, height) = (32usize, 32usize);
        let config = config(width as u32, height as u32);
        let mut blobwatch = Blobwatch::new(config, LedPatternTable::rift_dk2());
        let spot = |size| {
            let mut frame = vec![0u8; width * height];
            square(&mut frame, width, 10, 10, size);
            frame
        };

        let mut patterns = Vec::new();
        for size in [5, 6, 6, 6] {
            let ob = blobwatch.process(&spot(size), 0).expect("frame size matches");
            patterns.push(ob.blobs[0].pattern);
        }
        assert_eq!(patterns, [0x000, 0x200, 0x300, 0x380]);

        // One dropped frame is bridged: inherited age 4, plus the missing frame.
        let ob = blobwatch.process(&spot(6), 1).expect("frame size matches");
        assert_eq!((ob.blobs[0].age, ob.blobs[0].pattern), (5, 0x3e0));
        let ob = blobwatch.process(&spot(6), 0).expect("frame size matches");
        assert_eq!((ob.blobs[0].age, ob.blobs[0].pattern), (6, 0x3f0));

        // Several dropped frames start the history over.
        let ob = blobwatch.process(&spot(6), 4).expect("frame size matches");
        assert_eq!((ob.blobs[0].age, ob.blobs[0].pattern), (0, 0));
        let ob = blobwatch.process(&spot(6), 0).expect("frame size matches");
        assert_eq!((ob.blobs[0].age, ob.blobs[0].pattern), (1, 0));
        assert_eq!(blobwatch.phase(), None);
    }

    #[test]
    fn blinking_leds_are_identified_end_to_end() {
        let (width, height) = (128usize, 40usize);
        let table = LedPatternTable::rift_dk2();
        let leds = [3usize, 17, 15];
        let mut blobwatch = Blobwatch::new(config(width as u32, height as u32), table.clone());

        // The camera joins the blink cycle at step 1, where all three LEDs are dark.
        for frame_index in 0..30u32 {
            let step = (1 + frame_index) % 10;
            let mut frame = vec![0u8; width * height];
            for (i, &led) in leds.iter().enumerate() {
                let code = table.get(led).expect("led in table");
                let size = if frame_index > 0 && code >> step & 1 == 1 { 6 } else { 5 };
                square(&mut frame, width, 20 + 40 * i, 15, size);
            }
            blobwatch.process(&frame, 0).expect("frame size matches");
        }

        let ob = blobwatch.last_observation();
        assert_eq!(ob.num_blobs(), 3);
        let mut ids: Vec<_> = ob.blobs.iter().map(|b| (b.x, b.led_id())).collect();
        ids.sort();
        assert_eq!(ids, vec![(22, Some(3)), (62, Some(17)), (102, Some(15))]);
        assert!(blobwatch.phase().is_some());
    }

    #[test]
    fn reset_forgets_identities() {
        let (width, height) = (32usize, 32usize);
        let config = config(width as u32, height as u32);
        let mut blobwatch = Blobwatch::new(config, LedPatternTable::rift_dk2());
        let mut frame = vec![0u8; width * height];
        square(&mut frame, width, 10, 10, 5);
        blobwatch.process(&frame, 0).expect("frame size matches");
        blobwatch.process(&frame, 0).expect("frame size matches");
        assert_eq!(blobwatch.last_observation().blobs[0].age, 1);

        blobwatch.reset();
        let ob = blobwatch.process(&frame, 0).expect("frame size matches");
        assert_eq!(ob.blobs[0].age, 0);
        assert_eq!(blobwatch.phase(), None);
    }

    #[test]
    fn config_reads_partial_json() {
        let config: BlobwatchConfig =
            serde_json::from_str(r#"{ "image_width": 640, "max_match_distance": 4.5 }"#)
                .expect("valid config");
        assert_eq!(config.image_width, 640);
        assert_eq!(config.image_height, 480);
        assert_eq!(config.max_match_distance, 4.5);
        assert_eq!(config.max_blobs, MAX_BLOBS_PER_FRAME);
    }
}
