// THEORY:
// The `tracker` module gives the camera path its memory. The blob detector
// produces a fresh, anonymous list of blobs every frame; the blink identifier
// needs the *same* physical LED's brightness history across many frames. The
// tracker bridges the two by solving the data association problem between
// consecutive frames.
//
// Key architectural principles:
// 1.  **Prediction**: Every blob carries a velocity (center displacement since
//     the previous frame). A previous blob is expected at its center plus that
//     velocity.
// 2.  **Nearest Match With A Gate**: Each previous blob claims the nearest
//     unclaimed blob of the current frame, provided it lies within
//     `max_match_distance` pixels of the prediction. Anything further is a
//     different LED, or the same LED after a jump we cannot trust.
// 3.  **Identity Transfer**: A matched blob inherits `age + 1`, the blink
//     `pattern`, the resolved `led`, and the previous `area` as its
//     `last_area`. Unmatched blobs start over at age 0.
// 4.  **Track Slots**: Blobs that have survived at least one frame hold one of
//     `MAX_BLOBS_PER_FRAME` track slots. A slot follows its blob for as long as
//     it keeps being matched, so consumers can follow a track by slot index.

use crate::core_modules::blob::{Blob, Blobservation, MAX_BLOBS_PER_FRAME};

/// Default gate for cross-frame association, in pixels.
pub const DEFAULT_MAX_MATCH_DISTANCE: f32 = 8.0;

/// Associates the blobs of consecutive frames.
#[derive(Debug, Clone)]
pub struct Tracker {
    /// The last frame handed to `remember`.
    previous: Blobservation,
    /// False until the first frame has been seen.
    primed: bool,
    max_match_distance: f32,
}

impl Tracker {
    pub fn new(max_match_distance: f32) -> Self {
        Self {
            previous: Blobservation::new(),
            primed: false,
            max_match_distance,
        }
    }

    /// Forgets the previous frame. The next frame starts every blob at age 0.
    pub fn reset(&mut self) {
        self.previous.clear();
        self.primed = false;
    }

    pub fn previous(&self) -> Option<&Blobservation> {
        self.primed.then_some(&self.previous)
    }

    /// Carries identity from the remembered frame onto `current`.
    pub fn update(&mut self, current: &mut Blobservation) {
        associate(&self.previous, current, self.max_match_distance);
    }

    /// Keeps `current` as the reference for the next `update`. Call this once
    /// every later stage has written its per-blob state for the frame.
    pub fn remember(&mut self, current: &Blobservation) {
        self.previous.clone_from(current);
        self.primed = true;
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MATCH_DISTANCE)
    }
}

/// Matches the blobs of `current` against `previous` and transfers identity.
pub fn associate(previous: &Blobservation, current: &mut Blobservation, max_match_distance: f32) {
    let Blobservation { blobs, tracked } = current;
    *tracked = [None; MAX_BLOBS_PER_FRAME];

    // --- 1. Matching ---
    let mut claimed = [false; MAX_BLOBS_PER_FRAME];
    for old in &previous.blobs {
        let (px, py) = old.predicted_center();
        let mut best_match: Option<(usize, f32)> = None;

        for (j, new) in blobs.iter().enumerate().take(MAX_BLOBS_PER_FRAME) {
            if claimed[j] {
                continue;
            }
            let dx = (px - i32::from(new.x)) as f32;
            let dy = (py - i32::from(new.y)) as f32;
            let dist = dx.hypot(dy);
            if dist <= max_match_distance && best_match.is_none_or(|(_, best)| dist < best) {
                best_match = Some((j, dist));
            }
        }

        // --- 2. Identity Transfer ---
        if let Some((j, _)) = best_match {
            claimed[j] = true;
            let new = &mut blobs[j];
            inherit(new, old);
            if let Some(slot) = old.track_index {
                if tracked[slot].is_none() {
                    new.track_index = Some(slot);
                    tracked[slot] = Some(j);
                }
            }
        }
    }

    // --- 3. Slot Allocation ---
    for (i, blob) in blobs.iter_mut().enumerate() {
        if blob.age > 0 && blob.track_index.is_none() {
            if let Some(slot) = tracked.iter().position(Option::is_none) {
                blob.track_index = Some(slot);
                tracked[slot] = Some(i);
            }
        }
    }
}

fn inherit(new: &mut Blob, old: &Blob) {
    new.age = old.age + 1;
    new.pattern = old.pattern;
    new.led = old.led;
    new.last_area = old.area;
    new.vx = i32::from(new.x) - i32::from(old.x);
    new.vy = i32::from(new.y) - i32::from(old.y);
}
