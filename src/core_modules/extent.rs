// THEORY:
// The `extent` module is the first stage of the camera path. An IR tracking
// camera sees the headset LEDs as small, saturated spots on a dark background,
// so instead of analysing every pixel in 2-D we reduce each image row to the
// horizontal runs of bright pixels it contains ("extents").
//
// Key architectural principles:
// 1.  **Single Pass, Fixed Capacity**: A row is scanned once, left to right.
//     Each `ExtentLine` is a fixed-size array, so scanning a frame allocates
//     nothing once the per-row storage exists.
// 2.  **Hard Threshold**: A pixel is bright iff its value is strictly greater
//     than `THRESHOLD`. The sensors are exposed so that LEDs clip and the
//     background stays near black, which makes an adaptive threshold
//     unnecessary.
// 3.  **Silent Truncation**: Rows with more than the allowed number of runs are
//     truncated. Extra runs are dropped, never reported as an error.
// 4.  **Explicit Visit State**: The blob assembler consumes extents as it chains
//     them vertically. Consumption is recorded in the `visited` flag of each
//     extent rather than by corrupting its coordinates.

/// Pixels strictly brighter than this value belong to an extent.
pub const THRESHOLD: u8 = 0x9f;

/// Maximum number of extents recorded per scanline.
pub const MAX_EXTENTS_PER_LINE: usize = 11;

/// A contiguous run `[start, end]` (inclusive) of bright pixels in one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    /// Column of the first bright pixel.
    pub start: u16,
    /// Column of the last bright pixel.
    pub end: u16,
    /// Set once the extent has been chained into a blob.
    pub visited: bool,
}

impl Extent {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            visited: false,
        }
    }

    /// Number of pixels in the run.
    pub fn len(&self) -> u32 {
        u32::from(self.end - self.start) + 1
    }

    /// Center column, biased low.
    pub fn center(&self) -> u16 {
        ((u32::from(self.start) + u32::from(self.end)) / 2) as u16
    }

    /// True if `column` lies in `[start, end)`.
    pub fn contains_column(&self, column: u16) -> bool {
        self.start <= column && column < self.end
    }
}

/// The extents found in one scanline, in increasing column order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtentLine {
    extents: [Extent; MAX_EXTENTS_PER_LINE],
    num: usize,
}

impl ExtentLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.num
    }

    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    pub fn as_slice(&self) -> &[Extent] {
        &self.extents[..self.num]
    }

    pub fn as_mut_slice(&mut self) -> &mut [Extent] {
        &mut self.extents[..self.num]
    }

    pub fn clear(&mut self) {
        self.num = 0;
    }

    /// Appends an extent. Returns false if the line is already full.
    pub fn push(&mut self, extent: Extent) -> bool {
        if self.num == MAX_EXTENTS_PER_LINE {
            return false;
        }
        self.extents[self.num] = extent;
        self.num += 1;
        true
    }
}

/// Collects the runs of pixels brighter than `THRESHOLD` in `line` into `out`.
///
/// At most `max_extents` runs are stored (never more than
/// `MAX_EXTENTS_PER_LINE`); any further runs on the row are ignored.
pub fn find_extents(line: &[u8], max_extents: usize, out: &mut ExtentLine) {
    let max_extents = max_extents.min(MAX_EXTENTS_PER_LINE);
    let width = line.len().min(usize::from(u16::MAX) + 1);
    out.clear();

    let mut x = 0;
    while x < width {
        if line[x] <= THRESHOLD {
            x += 1;
            continue;
        }
        if out.len() >= max_extents {
            break;
        }

        let start = x;
        while x < width && line[x] > THRESHOLD {
            x += 1;
        }
        out.push(Extent::new(start as u16, (x - 1) as u16));
    }
}

/// Scans every row of a `width` x `height` grayscale frame, filling one
/// `ExtentLine` per row. `lines` is resized to `height` and reused.
pub fn find_frame_extents(
    frame: &[u8],
    width: usize,
    height: usize,
    max_extents: usize,
    lines: &mut Vec<ExtentLine>,
) {
    lines.resize(height, ExtentLine::default());
    if width == 0 {
        lines.iter_mut().for_each(ExtentLine::clear);
        return;
    }
    for (row, line) in frame.chunks_exact(width).take(height).zip(lines.iter_mut()) {
        find_extents(row, max_extents, line);
    }
}
