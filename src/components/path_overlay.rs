use std::fmt::Write;

use crate::geometry::Point2D;

/// Point trail for the live vector preview of lasso and eraser strokes.
/// Never touches raster surfaces.
#[derive(Clone, Debug, Default)]
pub struct PathOverlay {
    points: Vec<Point2D>,
}

impl PathOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, p: Point2D) {
        self.points.push(p);
    }

    pub fn reset_path(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> &[Point2D] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// SVG path data (`M x y L x y ...`), or `None` below two points.
    pub fn to_vector_path(&self) -> Option<String> {
        let (first, rest) = self.points.split_first()?;
        if rest.is_empty() {
            return None;
        }
        let mut d = format!("M {} {}", first.x, first.y);
        for p in rest {
            let _ = write!(d, " L {} {}", p.x, p.y);
        }
        Some(d)
    }
}
