// THEORY:
// The `BlobDetector` is the engine of the spatial grouping layer for the IR
// camera. It turns the per-row extents of one frame into 2-D blobs, each of
// which is a candidate LED.
//
// Key architectural principles & algorithm steps:
// 1.  **Seeding**: Rows are walked top to bottom and extents left to right.
//     Every extent not yet consumed by an earlier blob seeds a new one.
// 2.  **Vertical Chaining**: From the seed we walk down the image. In each
//     following row we look for an unconsumed extent whose `[start, end)`
//     contains the seed's center column. Containment of the center, not mere
//     overlap, is the matching rule, so two LEDs that touch diagonally stay
//     separate. The chain ends at the first row without such an extent.
// 3.  **Shape Filtering**: LEDs image as round or mildly elliptical spots.
//     Chains with no continuation, or whose bounding box is more than 2:1 tall
//     or wide, are reflections, cables or sensor noise and are dropped.
// 4.  **Stateless Utility**: Like the rest of this layer, `find_blobs` has no
//     memory of previous frames. Identity is the tracker's job.

use crate::core_modules::blob::{Blob, Blobservation, MAX_BLOBS_PER_FRAME};
use crate::core_modules::extent::ExtentLine;

pub mod blob_detector {
    use super::*;

    /// Assembles the extents of one frame into blobs, writing them to `out`.
    ///
    /// `lines` holds one `ExtentLine` per image row; extents are marked
    /// visited as they are consumed. At most `max_blobs` blobs are produced.
    pub fn find_blobs(lines: &mut [ExtentLine], max_blobs: usize, out: &mut Blobservation) {
        let max_blobs = max_blobs.min(MAX_BLOBS_PER_FRAME);
        out.clear();

        for y in 0..lines.len() {
            for i in 0..lines[y].len() {
                if out.blobs.len() >= max_blobs {
                    return;
                }

                let seed = lines[y].as_slice()[i];
                if seed.visited {
                    continue;
                }
                lines[y].as_mut_slice()[i].visited = true;

                // --- Vertical chaining ---
                let center = seed.center();
                let mut left = seed.start;
                let mut right = seed.end;
                let mut area = seed.len();
                let mut dy: u32 = 1;

                for next_line in lines[y + 1..].iter_mut() {
                    let Some(next) = next_line
                        .as_mut_slice()
                        .iter_mut()
                        .find(|e| !e.visited && e.contains_column(center))
                    else {
                        break;
                    };
                    next.visited = true;
                    left = left.min(next.start);
                    right = right.max(next.end);
                    area += next.len();
                    dy += 1;
                }

                // --- Shape filtering ---
                if dy < 2 {
                    continue;
                }
                let width = u32::from(right - left) + 1;
                if 2 * width <= dy || width >= 2 * dy {
                    continue;
                }

                let top = y as u16;
                let bottom = top + (dy - 1) as u16;
                out.blobs.push(Blob {
                    x: ((u32::from(left) + u32::from(right)) / 2) as u16,
                    y: ((u32::from(top) + u32::from(bottom)) / 2) as u16,
                    left,
                    right,
                    top,
                    bottom,
                    area,
                    ..Blob::default()
                });
            }
        }
    }
}
