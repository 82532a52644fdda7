//! Hard-edge binarization of freshly edited regions.
//!
//! Flat mode thresholds alpha and recolours to the single label colour.
//! Instance mode snaps every painted pixel to the closest shade of the label's
//! palette so several instances stay distinguishable inside one surface.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::geometry::Rect;
use crate::labels::LabelColor;

/// Alpha strictly above this value counts as painted in flat mode.
pub const ALPHA_CUTOFF: u8 = 127;

/// How pixels of an edited region are snapped to hard values.
#[derive(Clone, Copy, Debug)]
pub enum Binarization<'a> {
    Flat(LabelColor),
    Instances(&'a [LabelColor]),
}

fn nearest_shade(shades: &[LabelColor], rgb: [u8; 3]) -> Option<LabelColor> {
    shades.iter().copied().min_by_key(|s| s.distance_sq(rgb))
}

/// Binarize the pixels of `img` inside `rect` in place.
pub fn binarize(img: &mut RgbaImage, rect: Rect, mode: Binarization<'_>) {
    let rect = rect.clamp_to(img.width(), img.height());
    if rect.is_empty() {
        return;
    }
    let stride = img.width() as usize * 4;
    let x0 = rect.x as usize * 4;
    let x1 = rect.right() as usize * 4;

    img.par_chunks_mut(stride)
        .skip(rect.y as usize)
        .take(rect.height as usize)
        .for_each(|row| {
            for px in row[x0..x1].chunks_exact_mut(4) {
                let out = match mode {
                    Binarization::Flat(color) => {
                        if px[3] > ALPHA_CUTOFF {
                            color.rgba()
                        } else {
                            Rgba([0, 0, 0, 0])
                        }
                    }
                    Binarization::Instances(shades) => {
                        if px[3] == 0 {
                            Rgba([0, 0, 0, 0])
                        } else {
                            match nearest_shade(shades, [px[0], px[1], px[2]]) {
                                Some(shade) => shade.rgba(),
                                None => Rgba([px[0], px[1], px[2], 255]),
                            }
                        }
                    }
                };
                px.copy_from_slice(&out.0);
            }
        });
}
