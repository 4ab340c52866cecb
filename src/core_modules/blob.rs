// THEORY:
// The `blob` module holds the data containers of the camera path. A `Blob` is
// one LED candidate seen in one frame; a `Blobservation` is everything seen in
// that frame.
//
// Key architectural principles:
// 1.  **Per-Frame Geometry, Carried Identity**: Geometry (bounding box, center,
//     area) is recomputed from scratch every frame by the blob detector. The
//     identity fields (`age`, `pattern`, `last_area`, `led`, `track_index`,
//     velocity) are copied forward from the matching blob of the previous
//     frame by the tracker and then refined by the flicker identifier.
// 2.  **Dumb Containers**: Neither struct knows how to find or match blobs.
//     They only describe the result, which keeps each stage testable alone.
// 3.  **Bounded Size**: A frame never holds more than `MAX_BLOBS_PER_FRAME`
//     blobs, and the track slot table has exactly that many entries.

/// Maximum number of blobs reported per frame.
pub const MAX_BLOBS_PER_FRAME: usize = 42;

/// How confidently a blob's blink pattern matched the LED table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Confidence {
    /// The pattern differed from the table entry in exactly one bit.
    Probable,
    /// The pattern equals the table entry.
    Exact,
}

/// A resolved LED identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LedId {
    /// Index into the LED pattern table.
    pub index: usize,
    pub confidence: Confidence,
}

/// One LED or photodiode candidate found in a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Blob {
    /// Center of the bounding box, in pixels.
    pub x: u16,
    pub y: u16,
    /// Inclusive bounding box.
    pub left: u16,
    pub right: u16,
    pub top: u16,
    pub bottom: u16,
    /// Number of bright pixels in the chained extents.
    pub area: u32,
    /// `area` of the matching blob in the previous frame.
    pub last_area: u32,
    /// Number of consecutive frames this blob has been followed. 0 on first sight.
    pub age: u32,
    /// Rolling 10-bit brightness history; the newest sample is bit 9.
    pub pattern: u16,
    /// Identity resolved from `pattern`, if any.
    pub led: Option<LedId>,
    /// Slot in the observation's track table.
    pub track_index: Option<usize>,
    /// Center displacement since the previous frame.
    pub vx: i32,
    pub vy: i32,
}

impl Blob {
    pub fn width(&self) -> u32 {
        u32::from(self.right - self.left) + 1
    }

    pub fn height(&self) -> u32 {
        u32::from(self.bottom - self.top) + 1
    }

    pub fn led_id(&self) -> Option<usize> {
        self.led.map(|led| led.index)
    }

    /// Where this blob is expected to be in the next frame.
    pub fn predicted_center(&self) -> (i32, i32) {
        (i32::from(self.x) + self.vx, i32::from(self.y) + self.vy)
    }
}

/// The complete result for one camera frame.
#[derive(Debug, Clone)]
pub struct Blobservation {
    /// Blobs in detection order (top to bottom, then left to right).
    pub blobs: Vec<Blob>,
    /// Track slot -> index into `blobs` of the blob currently holding it.
    pub tracked: [Option<usize>; MAX_BLOBS_PER_FRAME],
}

impl Default for Blobservation {
    fn default() -> Self {
        Self::new()
    }
}

impl Blobservation {
    pub fn new() -> Self {
        Self {
            blobs: Vec::with_capacity(MAX_BLOBS_PER_FRAME),
            tracked: [None; MAX_BLOBS_PER_FRAME],
        }
    }

    pub fn clear(&mut self) {
        self.blobs.clear();
        self.tracked = [None; MAX_BLOBS_PER_FRAME];
    }

    pub fn num_blobs(&self) -> usize {
        self.blobs.len()
    }

    /// The blob holding track slot `slot`, if any.
    pub fn tracked_blob(&self, slot: usize) -> Option<&Blob> {
        self.tracked
            .get(slot)
            .copied()
            .flatten()
            .and_then(|index| self.blobs.get(index))
    }

    /// Blobs that carry a resolved LED identity.
    pub fn identified(&self) -> impl Iterator<Item = &Blob> {
        self.blobs.iter().filter(|b| b.led.is_some())
    }
}
