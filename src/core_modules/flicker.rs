// THEORY:
// The `flicker` module identifies LEDs by the way they blink. Each LED of a
// tracked headset modulates its brightness with a 10-frame code that is
// synchronised to the camera. Over ten frames the apparent size of an LED's
// blob goes up and down in a sequence unique to that LED.
//
// Key architectural principles:
// 1.  **Edge Detection On Area**: A blob whose area grew by more than 10% since
//     the previous frame is bright (1); one that shrank by more than 10% is
//     dark (0); anything in between repeats the previous level. The newest
//     level enters at bit 9 of a rolling 10-bit window.
// 2.  **Phase Alignment**: The camera does not know where in the 10-frame cycle
//     the headset is. The table stores codes at phase 0, so an observed window
//     is barrel-rotated by the current phase before lookup.
// 3.  **Tolerant Lookup**: An exact table hit is trusted; a single flipped bit
//     is accepted as probable. Exact matches anywhere in the table take
//     precedence over near matches.
// 4.  **Phase Consensus**: The stateful `Flicker` owns the phase. When it is
//     unknown, or when lookups fail more than they succeed, every long-lived
//     blob votes for the rotation that makes its window an exact table entry
//     and the most popular phase wins.

use log::info;

use crate::core_modules::blob::{Blob, Confidence, LedId};
use crate::core_modules::tracking_model::{LedPatternTable, PATTERN_BITS, PATTERN_MASK};

const PHASES: u8 = PATTERN_BITS as u8;
const MSB: u16 = 1 << (PATTERN_BITS - 1);

/// Number of differing bits between two 10-bit codes.
pub fn hamming_distance(a: u16, b: u16) -> u32 {
    ((a ^ b) & PATTERN_MASK).count_ones()
}

/// Rotates a 10-bit code left by `phase` (taken modulo 10).
pub fn rotate_pattern(pattern: u16, phase: u8) -> u16 {
    let pattern = pattern & PATTERN_MASK;
    let phase = u32::from(phase % PHASES);
    if phase == 0 {
        return pattern;
    }
    ((pattern << phase) | (pattern >> (PATTERN_BITS - phase))) & PATTERN_MASK
}

/// Looks `pattern` up in `table`: an exact match first, otherwise the first
/// entry at Hamming distance 1.
pub fn pattern_find_id(table: &LedPatternTable, pattern: u16) -> Option<LedId> {
    let pattern = pattern & PATTERN_MASK;
    let codes = table.as_slice();
    if let Some(index) = codes.iter().position(|&code| code == pattern) {
        return Some(LedId {
            index,
            confidence: Confidence::Exact,
        });
    }
    codes
        .iter()
        .position(|&code| hamming_distance(code, pattern) == 1)
        .map(|index| LedId {
            index,
            confidence: Confidence::Probable,
        })
}

/// The phase at which `pattern` rotates onto an exact table entry, if any.
pub fn pattern_phase(table: &LedPatternTable, pattern: u16) -> Option<u8> {
    (0..PHASES).find(|&phase| {
        let rotated = rotate_pattern(pattern, phase);
        table.as_slice().contains(&rotated)
    })
}

/// Drops the oldest bit of `pattern` and enters `level` (0 or MSB) as the newest.
fn shift_in(pattern: u16, level: u16) -> u16 {
    ((pattern >> 1) & (PATTERN_MASK >> 1)) | level
}

/// Shifts the blob's brightness level for this frame into its pattern.
pub fn update_pattern(blob: &mut Blob) {
    let area = u64::from(blob.area);
    let last_area = u64::from(blob.last_area);
    let level = if area * 10 > last_area * 11 {
        MSB
    } else if area * 11 < last_area * 10 {
        0
    } else {
        blob.pattern & MSB
    };
    blob.pattern = shift_in(blob.pattern, level);
}

/// Updates the pattern of every blob seen before and, for blobs with a full
/// window, resolves `led` at the given `phase`.
///
/// Returns a score: +2 per exact match, +1 per probable match, -2 per failed
/// lookup. Lookups are only attempted when `phase` is known.
pub fn identify_blobs(blobs: &mut [Blob], phase: Option<u8>, table: &LedPatternTable) -> i32 {
    let mut score = 0;
    for blob in blobs.iter_mut() {
        if blob.age < 1 {
            continue;
        }
        update_pattern(blob);

        let Some(phase) = phase else {
            continue;
        };
        if blob.age < PATTERN_BITS - 1 {
            continue;
        }

        match pattern_find_id(table, rotate_pattern(blob.pattern, phase)) {
            Some(led) => {
                score += match led.confidence {
                    Confidence::Exact => 2,
                    Confidence::Probable => 1,
                };
                blob.led = Some(led);
            }
            None => score -= 2,
        }
    }
    score
}

/// Stateful blink identifier for one camera.
#[derive(Debug, Clone)]
pub struct Flicker {
    /// Blink phase expected for the next frame, if established.
    phase: Option<u8>,
    patterns: LedPatternTable,
}

impl Flicker {
    pub fn new(patterns: LedPatternTable) -> Self {
        Self {
            phase: None,
            patterns,
        }
    }

    pub fn phase(&self) -> Option<u8> {
        self.phase
    }

    pub fn patterns(&self) -> &LedPatternTable {
        &self.patterns
    }

    /// Records this frame's brightness levels and resolves LED ids.
    ///
    /// `skipped` is the number of camera frames dropped before this one. One
    /// dropped frame is bridged by assuming unchanged brightness; more than
    /// one invalidates all patterns and the phase.
    pub fn process(&mut self, blobs: &mut [Blob], skipped: u32) {
        let mut phase = self.phase;

        match skipped {
            0 => {}
            1 => {
                for blob in blobs.iter_mut() {
                    blob.pattern = shift_in(blob.pattern, blob.pattern & MSB);
                    blob.age += 1;
                }
                phase = phase.map(|p| (p + 1) % PHASES);
            }
            _ => {
                info!("flicker: Skipped {} frames, reset", skipped);
                for blob in blobs.iter_mut() {
                    blob.pattern = 0;
                    blob.age = 0;
                }
                phase = None;
            }
        }

        let score = identify_blobs(blobs, phase, &self.patterns);

        if score < 0 || phase.is_none() {
            if let Some(consensus) = self.phase_consensus(blobs) {
                if score < 0 && phase != Some(consensus) {
                    info!(
                        "flicker: too many errors ({}), corrected phase: {:?} -> {}",
                        score, phase, consensus
                    );
                }
                phase = Some(consensus);
            }
        }

        self.phase = phase.map(|p| (p + 1) % PHASES);
    }

    /// The phase most full-window blobs agree on.
    fn phase_consensus(&self, blobs: &[Blob]) -> Option<u8> {
        let mut votes = [0u32; PHASES as usize];
        for blob in blobs.iter().filter(|b| b.age >= PATTERN_BITS - 1) {
            if let Some(phase) = pattern_phase(&self.patterns, blob.pattern) {
                votes[usize::from(phase)] += 1;
            }
        }

        let (phase, &count) = votes
            .iter()
            .enumerate()
            .max_by_key(|&(phase, count)| (*count, std::cmp::Reverse(phase)))?;
        (count > 0).then_some(phase as u8)
    }
}
