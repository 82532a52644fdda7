// ============================================================================
// RASTER PRIMITIVES: Porter-Duff compositing, stamping and polygon fill
// ============================================================================
//
// All surfaces are straight-alpha `RgbaImage`s of identical size. Regions are
// always copied "in place" (source rect == destination rect), mirroring how the
// label surfaces, the stroke buffer and the composite share one pixel grid.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::geometry::{Point2D, Rect};

/// Compositing operator applied when drawing a source onto a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CompositeOp {
    #[default]
    SourceOver,
    /// Keep the source only where the destination is painted.
    SourceIn,
    /// Paint the source only over painted destination pixels, keeping dst alpha.
    SourceAtop,
    /// Keep the destination only where the source is painted.
    DestinationIn,
    /// Remove the destination where the source is painted.
    DestinationOut,
    /// Draw the source behind the destination.
    DestinationOver,
    /// Replace the destination outright.
    Copy,
}

#[inline]
fn unit(v: u8) -> f32 {
    v as f32 / 255.0
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// `a` over `b`, straight alpha.
#[inline]
fn over(a: Rgba<u8>, b: Rgba<u8>) -> Rgba<u8> {
    let aa = unit(a[3]);
    let ba = unit(b[3]);
    let out_a = aa + ba * (1.0 - aa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    if a[3] == 255 {
        return a;
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (unit(a[c]) * aa + unit(b[c]) * ba * (1.0 - aa)) / out_a;
        out[c] = to_u8(v);
    }
    out[3] = to_u8(out_a);
    Rgba(out)
}

#[inline]
fn with_alpha(px: Rgba<u8>, alpha: f32) -> Rgba<u8> {
    let a = to_u8(alpha);
    if a == 0 {
        Rgba([0, 0, 0, 0])
    } else {
        Rgba([px[0], px[1], px[2], a])
    }
}

/// Blend one source pixel onto one destination pixel.
#[inline]
pub fn blend_pixel(op: CompositeOp, src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    match op {
        CompositeOp::SourceOver => {
            if src[3] == 0 {
                dst
            } else {
                over(src, dst)
            }
        }
        CompositeOp::SourceIn => with_alpha(src, unit(src[3]) * unit(dst[3])),
        CompositeOp::SourceAtop => {
            if dst[3] == 0 {
                return dst;
            }
            let sa = unit(src[3]);
            let mut out = dst;
            for c in 0..3 {
                out[c] = to_u8(unit(src[c]) * sa + unit(dst[c]) * (1.0 - sa));
            }
            out
        }
        CompositeOp::DestinationIn => with_alpha(dst, unit(dst[3]) * unit(src[3])),
        CompositeOp::DestinationOut => {
            if src[3] == 0 {
                dst
            } else {
                with_alpha(dst, unit(dst[3]) * (1.0 - unit(src[3])))
            }
        }
        CompositeOp::DestinationOver => {
            if dst[3] == 255 {
                dst
            } else {
                over(dst, src)
            }
        }
        CompositeOp::Copy => src,
    }
}

/// Composite `src[rect]` onto `dst[rect]`. The rect is clipped to both images.
pub fn composite_region(dst: &mut RgbaImage, src: &RgbaImage, rect: Rect, op: CompositeOp) {
    let rect = rect
        .clamp_to(dst.width(), dst.height())
        .clamp_to(src.width(), src.height());
    if rect.is_empty() {
        return;
    }
    let dst_stride = dst.width() as usize * 4;
    let src_stride = src.width() as usize * 4;
    let src_raw = src.as_raw();
    let x0 = rect.x as usize * 4;
    let x1 = rect.right() as usize * 4;

    dst.par_chunks_mut(dst_stride)
        .enumerate()
        .skip(rect.y as usize)
        .take(rect.height as usize)
        .for_each(|(y, row)| {
            let src_row = &src_raw[y * src_stride..(y + 1) * src_stride];
            for (d, s) in row[x0..x1]
                .chunks_exact_mut(4)
                .zip(src_row[x0..x1].chunks_exact(4))
            {
                let out = blend_pixel(op, Rgba([s[0], s[1], s[2], s[3]]), Rgba([d[0], d[1], d[2], d[3]]));
                d.copy_from_slice(&out.0);
            }
        });
}

/// Composite the whole of `src` onto `dst`.
pub fn composite_full(dst: &mut RgbaImage, src: &RgbaImage, op: CompositeOp) {
    let rect = Rect::full(dst.width(), dst.height());
    composite_region(dst, src, rect, op);
}

/// Composite a solid colour over `rect`.
pub fn fill_rect(dst: &mut RgbaImage, rect: Rect, color: Rgba<u8>, op: CompositeOp) {
    let rect = rect.clamp_to(dst.width(), dst.height());
    if rect.is_empty() {
        return;
    }
    let stride = dst.width() as usize * 4;
    let x0 = rect.x as usize * 4;
    let x1 = rect.right() as usize * 4;
    dst.par_chunks_mut(stride)
        .skip(rect.y as usize)
        .take(rect.height as usize)
        .for_each(|row| {
            for d in row[x0..x1].chunks_exact_mut(4) {
                let out = blend_pixel(op, color, Rgba([d[0], d[1], d[2], d[3]]));
                d.copy_from_slice(&out.0);
            }
        });
}

/// Zero every pixel.
pub fn clear(img: &mut RgbaImage) {
    img.fill(0);
}

/// Zero every pixel outside `rect`.
pub fn retain_rect(img: &mut RgbaImage, rect: Rect) {
    let rect = rect.clamp_to(img.width(), img.height());
    let stride = img.width() as usize * 4;
    let x0 = rect.x as usize * 4;
    let x1 = rect.right() as usize * 4;
    img.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        if y < rect.y as usize || y >= rect.bottom() as usize || rect.is_empty() {
            row.fill(0);
        } else {
            row[..x0].fill(0);
            row[x1..].fill(0);
        }
    });
}

/// Copy the RGBA bytes of `rect` out of `img`, row-major.
pub fn crop_bytes(img: &RgbaImage, rect: Rect) -> Vec<u8> {
    let rect = rect.clamp_to(img.width(), img.height());
    let stride = img.width() as usize * 4;
    let raw = img.as_raw();
    let mut out = Vec::with_capacity(rect.area() * 4);
    for y in rect.y..rect.bottom() {
        let start = y as usize * stride + rect.x as usize * 4;
        out.extend_from_slice(&raw[start..start + rect.width as usize * 4]);
    }
    out
}

/// Write row-major RGBA `bytes` of size `rect` back into `img` (replacing pixels).
/// Returns false if the byte count does not match the rect.
pub fn put_bytes(img: &mut RgbaImage, rect: Rect, bytes: &[u8]) -> bool {
    if bytes.len() != rect.area() * 4 || rect.right() > img.width() || rect.bottom() > img.height() {
        return false;
    }
    let stride = img.width() as usize * 4;
    let row_len = rect.width as usize * 4;
    let raw: &mut [u8] = &mut **img;
    for (i, src_row) in bytes.chunks_exact(row_len.max(1)).enumerate() {
        let start = (rect.y as usize + i) * stride + rect.x as usize * 4;
        raw[start..start + row_len].copy_from_slice(src_row);
    }
    true
}

// ---- Brush stamping ---------------------------------------------------------

/// Stamp one hard-edged round dab of `diameter` centred on pixel `p`.
pub fn stamp_dab(dst: &mut RgbaImage, p: Point2D, diameter: f32, color: Rgba<u8>) {
    let (w, h) = (dst.width() as i64, dst.height() as i64);
    let radius = (diameter / 2.0).max(0.5);
    let radius_sq = radius * radius;
    let cx = p.x.round() + 0.5;
    let cy = p.y.round() + 0.5;

    let min_x = ((cx - radius).floor() as i64).max(0);
    let max_x = ((cx + radius).ceil() as i64).min(w - 1);
    let min_y = ((cy - radius).floor() as i64).max(0);
    let max_y = ((cy + radius).ceil() as i64).min(h - 1);
    if min_x > max_x || min_y > max_y {
        return;
    }
    for y in min_y..=max_y {
        let dy = y as f32 + 0.5 - cy;
        for x in min_x..=max_x {
            let dx = x as f32 + 0.5 - cx;
            if dx * dx + dy * dy <= radius_sq {
                let px = dst.get_pixel_mut(x as u32, y as u32);
                *px = blend_pixel(CompositeOp::SourceOver, color, *px);
            }
        }
    }
}

/// Stamp a round-capped segment: dense one-pixel stepping of round dabs, so
/// consecutive segments join seamlessly.
pub fn stamp_segment(dst: &mut RgbaImage, from: Point2D, to: Point2D, diameter: f32, color: Rgba<u8>) {
    let distance = from.distance(to);
    if distance < 0.1 {
        stamp_dab(dst, from, diameter, color);
        return;
    }
    let steps = distance.ceil() as usize;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let p = Point2D::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t);
        stamp_dab(dst, p, diameter, color);
    }
}

// ---- Polygon fill ------------------------------------------------------------

/// Scanline even-odd fill of the closed polygon through `points` (pixel
/// indices), composited with `op`. Polygons with fewer than three points are
/// ignored.
pub fn fill_polygon(dst: &mut RgbaImage, points: &[Point2D], color: Rgba<u8>, op: CompositeOp) {
    if points.len() < 3 {
        return;
    }
    let w = dst.width();
    let h = dst.height();
    let stride = w as usize * 4;
    // Vertices sit on pixel centres.
    let verts: Vec<(f32, f32)> = points.iter().map(|p| (p.x + 0.5, p.y + 0.5)).collect();
    let min_y = verts.iter().map(|v| v.1).fold(f32::MAX, f32::min).floor().max(0.0) as usize;
    let max_y = (verts.iter().map(|v| v.1).fold(f32::MIN, f32::max).ceil().max(0.0) as usize).min(h as usize);
    if min_y >= max_y {
        return;
    }

    dst.par_chunks_mut(stride)
        .enumerate()
        .skip(min_y)
        .take(max_y - min_y)
        .for_each(|(y, row)| {
            let yf = y as f32 + 0.5;
            let n = verts.len();
            let mut nodes: Vec<f32> = Vec::new();
            for i in 0..n {
                let (xi, yi) = verts[i];
                let (xj, yj) = verts[(i + 1) % n];
                if (yi <= yf && yj > yf) || (yj <= yf && yi > yf) {
                    let t = (yf - yi) / (yj - yi);
                    nodes.push(xi + t * (xj - xi));
                }
            }
            nodes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            for pair in nodes.chunks_exact(2) {
                let x_start = (pair[0] - 0.5).ceil().max(0.0) as u32;
                let x_end = ((pair[1] - 0.5).floor() + 1.0).max(0.0) as u32;
                for x in x_start.min(w)..x_end.min(w) {
                    let off = x as usize * 4;
                    let d = &mut row[off..off + 4];
                    let out = blend_pixel(op, color, Rgba([d[0], d[1], d[2], d[3]]));
                    d.copy_from_slice(&out.0);
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

    fn painted(img: &RgbaImage) -> usize {
        img.pixels().filter(|p| p[3] != 0).count()
    }

    #[test]
    fn porter_duff_on_hard_pixels() {
        assert_eq!(blend_pixel(CompositeOp::SourceOver, RED, BLUE), RED);
        assert_eq!(blend_pixel(CompositeOp::SourceOver, CLEAR, BLUE), BLUE);
        assert_eq!(blend_pixel(CompositeOp::DestinationOut, RED, BLUE), CLEAR);
        assert_eq!(blend_pixel(CompositeOp::DestinationOut, CLEAR, BLUE), BLUE);
        assert_eq!(blend_pixel(CompositeOp::SourceIn, RED, BLUE), RED);
        assert_eq!(blend_pixel(CompositeOp::SourceIn, RED, CLEAR), CLEAR);
        assert_eq!(blend_pixel(CompositeOp::DestinationIn, CLEAR, BLUE), CLEAR);
        assert_eq!(blend_pixel(CompositeOp::DestinationOver, RED, BLUE), BLUE);
        assert_eq!(blend_pixel(CompositeOp::DestinationOver, RED, CLEAR), RED);
        assert_eq!(blend_pixel(CompositeOp::SourceAtop, RED, BLUE), RED);
        assert_eq!(blend_pixel(CompositeOp::SourceAtop, RED, CLEAR), CLEAR);
    }

    #[test]
    fn half_alpha_over_transparent_keeps_colour() {
        let half = Rgba([10, 20, 30, 128]);
        assert_eq!(blend_pixel(CompositeOp::SourceOver, half, CLEAR), half);
    }

    #[test]
    fn segment_is_a_straight_band() {
        let mut img = RgbaImage::new(40, 40);
        stamp_segment(&mut img, Point2D::new(10.0, 10.0), Point2D::new(20.0, 10.0), 1.0, RED);
        for x in 10..=20 {
            assert_eq!(*img.get_pixel(x, 10), RED, "x={x}");
        }
        assert_eq!(painted(&img), 11);
    }

    #[test]
    fn wide_dab_is_round() {
        let mut img = RgbaImage::new(40, 40);
        stamp_dab(&mut img, Point2D::new(20.0, 20.0), 10.0, RED);
        assert_eq!(*img.get_pixel(20, 20), RED);
        assert_eq!(*img.get_pixel(24, 20), RED);
        assert_eq!(*img.get_pixel(24, 24), CLEAR);
    }

    #[test]
    fn polygon_fill_covers_square_inclusive() {
        let mut img = RgbaImage::new(20, 20);
        let square = [
            Point2D::new(2.0, 2.0),
            Point2D::new(6.0, 2.0),
            Point2D::new(6.0, 6.0),
            Point2D::new(2.0, 6.0),
        ];
        fill_polygon(&mut img, &square, RED, CompositeOp::SourceOver);
        assert_eq!(*img.get_pixel(2, 2), RED);
        assert_eq!(*img.get_pixel(6, 5), RED);
        assert_eq!(*img.get_pixel(7, 3), CLEAR);
        assert_eq!(*img.get_pixel(1, 3), CLEAR);
    }

    #[test]
    fn polygon_with_two_points_is_inert() {
        let mut img = RgbaImage::new(10, 10);
        fill_polygon(&mut img, &[Point2D::new(1.0, 1.0), Point2D::new(8.0, 8.0)], RED, CompositeOp::SourceOver);
        assert_eq!(painted(&img), 0);
    }

    #[test]
    fn region_composite_only_touches_rect() {
        let mut dst = RgbaImage::from_pixel(10, 10, BLUE);
        let src = RgbaImage::from_pixel(10, 10, RED);
        composite_region(&mut dst, &src, Rect::new(2, 2, 3, 3), CompositeOp::DestinationOut);
        assert_eq!(painted(&dst), 100 - 9);
        assert_eq!(*dst.get_pixel(3, 3), CLEAR);
        assert_eq!(*dst.get_pixel(5, 5), BLUE);
    }

    #[test]
    fn retain_rect_clears_outside() {
        let mut img = RgbaImage::from_pixel(6, 6, RED);
        retain_rect(&mut img, Rect::new(1, 2, 2, 3));
        assert_eq!(painted(&img), 6);
        assert_eq!(*img.get_pixel(2, 4), RED);
        assert_eq!(*img.get_pixel(3, 4), CLEAR);
    }

    #[test]
    fn crop_and_put_are_inverse() {
        let mut img = RgbaImage::new(8, 8);
        fill_rect(&mut img, Rect::new(1, 1, 3, 2), RED, CompositeOp::Copy);
        let rect = Rect::new(0, 0, 5, 4);
        let bytes = crop_bytes(&img, rect);
        assert_eq!(bytes.len(), 5 * 4 * 4);
        let mut other = RgbaImage::new(8, 8);
        assert!(put_bytes(&mut other, rect, &bytes));
        assert_eq!(other, img);
        assert!(!put_bytes(&mut other, rect, &bytes[..8]));
    }
}
