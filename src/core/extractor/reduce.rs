//! Deterministic box reducer.
//!
//! Every output cell covers an integer-bounded block of source pixels (at
//! least one). Channels are averaged over the block, then weighted into
//! luminance with fixed integer BT.601 weights scaled by 1000. No resampling
//! filter is involved, so the output depends only on the pixels.

use super::decode::PixelGrid;

const WEIGHT_R: u64 = 299;
const WEIGHT_G: u64 = 587;
const WEIGHT_B: u64 = 114;
const WEIGHT_SUM: u64 = WEIGHT_R + WEIGHT_G + WEIGHT_B;

/// Half-open source range covered by output cell `cell` of `cells`
fn span(cell: u32, cells: u32, source: u32) -> (u32, u32) {
    let start = (cell as u64 * source as u64 / cells as u64) as u32;
    let end = ((cell as u64 + 1) * source as u64 / cells as u64) as u32;
    (start, end.max(start + 1).min(source))
}

/// Reduce a pixel grid to `width x height` luminance cells, row-major.
///
/// Values are luminance x 1000 so block averages keep their precision.
pub fn reduce_to_luma(grid: &PixelGrid, width: u32, height: u32) -> Vec<u64> {
    let mut cells = Vec::with_capacity(width as usize * height as usize);

    for cy in 0..height {
        let (y0, y1) = span(cy, height, grid.height());
        for cx in 0..width {
            let (x0, x1) = span(cx, width, grid.width());

            let mut sums = [0u64; 3];
            let mut count = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    let px = grid.pixel(x, y);
                    match grid.channels() {
                        1 | 2 => {
                            sums[0] += px[0] as u64;
                            sums[1] += px[0] as u64;
                            sums[2] += px[0] as u64;
                        }
                        _ => {
                            sums[0] += px[0] as u64;
                            sums[1] += px[1] as u64;
                            sums[2] += px[2] as u64;
                        }
                    }
                    count += 1;
                }
            }

            let weighted = WEIGHT_R * sums[0] + WEIGHT_G * sums[1] + WEIGHT_B * sums[2];
            cells.push(weighted * 1000 / (WEIGHT_SUM * count.max(1)));
        }
    }

    cells
}
