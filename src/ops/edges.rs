// ============================================================================
// EDGE RENDERING: morphological gradient of the composite
// ============================================================================

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

/// Image-processing collaborator used by the compositor for edges-only mode.
///
/// Hosts with a native image library can plug in their own implementation;
/// [`MorphologicalGradient`] is the built-in one.
pub trait ImageOps: Send + Sync {
    /// Return an image of the same size holding only the outlines of `src`.
    fn morphological_gradient(&self, src: &RgbaImage) -> RgbaImage;
}

/// 3×3 dilate minus 3×3 erode on the alpha channel. Outline pixels keep the
/// colour of the painted pixel they came from (or of a neighbour, for the
/// outer ring) at full alpha.
#[derive(Clone, Copy, Debug, Default)]
pub struct MorphologicalGradient;

impl ImageOps for MorphologicalGradient {
    fn morphological_gradient(&self, src: &RgbaImage) -> RgbaImage {
        let w = src.width();
        let h = src.height();
        let mut out = RgbaImage::new(w, h);
        if w == 0 || h == 0 {
            return out;
        }
        let stride = w as usize * 4;

        out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
            let y = y as u32;
            for x in 0..w {
                let mut max_a = 0u8;
                let mut min_a = 255u8;
                let mut source = None;
                for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                        let p = src.get_pixel(nx, ny);
                        if p[3] > max_a {
                            max_a = p[3];
                            source = Some(*p);
                        }
                        min_a = min_a.min(p[3]);
                    }
                }
                // Pixels on the frame border see transparent outside.
                if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                    min_a = 0;
                }
                if max_a > min_a {
                    let own = src.get_pixel(x, y);
                    let color = if own[3] > 0 { *own } else { source.unwrap_or(*own) };
                    let off = x as usize * 4;
                    row[off..off + 4].copy_from_slice(&Rgba([color[0], color[1], color[2], 255]).0);
                }
            }
        });
        out
    }
}
