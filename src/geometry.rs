//! Points, pixel rectangles and per-stroke tracking state.

use serde::{Deserialize, Serialize};

/// A point in either screen or image space, depending on context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    pub const ZERO: Point2D = Point2D { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point2D) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl std::ops::Add for Point2D {
    type Output = Point2D;
    fn add(self, rhs: Point2D) -> Point2D {
        Point2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Point2D {
    type Output = Point2D;
    fn sub(self, rhs: Point2D) -> Point2D {
        Point2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Point2D {
    type Output = Point2D;
    fn mul(self, rhs: f32) -> Point2D {
        Point2D::new(self.x * rhs, self.y * rhs)
    }
}

/// Integer pixel rectangle. `width`/`height` may be zero (empty region).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The whole `width × height` frame.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Clip to a `width × height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Per-stroke pointer tracking: previous/current points plus the growing
/// bounding box of everything the stroke touched.
#[derive(Clone, Debug)]
pub struct StrokeState {
    pub previous_point: Option<Point2D>,
    pub current_point: Option<Point2D>,
    pub min_point: Point2D,
    pub max_point: Point2D,
    pub is_drawing: bool,
}

impl Default for StrokeState {
    fn default() -> Self {
        Self {
            previous_point: None,
            current_point: None,
            min_point: Point2D::new(f32::MAX, f32::MAX),
            max_point: Point2D::ZERO,
            is_drawing: false,
        }
    }
}

impl StrokeState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True until the first point of the stroke has been recorded.
    pub fn is_first_point(&self) -> bool {
        self.previous_point.is_none()
    }

    pub fn has_bounds(&self) -> bool {
        self.min_point.x <= self.max_point.x && self.min_point.y <= self.max_point.y
    }

    /// Grow the bounding box by `point ± pad`. The minimum never goes below 0
    /// and the maximum never passes the last pixel of the frame.
    pub fn update_bounds(&mut self, point: Point2D, pad: f32, width: u32, height: u32) {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        self.min_point = Point2D::new(
            (point.x - pad).min(self.min_point.x).max(0.0),
            (point.y - pad).min(self.min_point.y).max(0.0),
        );
        self.max_point = Point2D::new(
            (point.x + pad).max(self.max_point.x).min(max_x),
            (point.y + pad).max(self.max_point.y).min(max_y),
        );
    }

    /// Inclusive pixel rectangle covering the stroke, or `None` before any point.
    pub fn bounding_box(&self) -> Option<Rect> {
        if !self.has_bounds() {
            return None;
        }
        let x = self.min_point.x.floor() as u32;
        let y = self.min_point.y.floor() as u32;
        let right = self.max_point.x.ceil() as u32;
        let bottom = self.max_point.y.ceil() as u32;
        Some(Rect::new(x, y, right - x + 1, bottom - y + 1))
    }
}
