//! Screen ↔ image coordinate transform with eased zoom and immediate pan.
//!
//! The rendered transform (`scale`, `offset`) chases a target transform one
//! [`tick`](Viewport::tick) at a time. The host calls `tick` once per frame
//! while it returns `true`; there is nothing to cancel.

use crate::events::{EngineEvent, EventSink};
use crate::geometry::Point2D;
use crate::settings::ViewSettings;

/// The on-screen element the image is drawn into.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportSurface {
    /// Client (CSS/logical) size of the element.
    pub client_width: f32,
    pub client_height: f32,
    /// Backing pixel buffer size.
    pub buffer_width: u32,
    pub buffer_height: u32,
}

impl ViewportSurface {
    /// Factor from client units to backing-buffer pixels, per axis.
    fn buffer_factor(&self) -> (f32, f32) {
        let fx = if self.client_width > 0.0 {
            self.buffer_width as f32 / self.client_width
        } else {
            1.0
        };
        let fy = if self.client_height > 0.0 {
            self.buffer_height as f32 / self.client_height
        } else {
            1.0
        };
        (fx, fy)
    }
}

/// Rendered image extent on the element, in client units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// Visible image region, in image units, for vector overlays.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SvgViewBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Target transform as reported to callers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub scale: f32,
    pub offset: Point2D,
}

pub struct Viewport {
    scale: f32,
    offset: Point2D,
    target_scale: f32,
    target_offset: Point2D,
    settings: ViewSettings,
    can_zoom: bool,
    can_pan: bool,
    is_dragging: bool,
    prev_point: Option<Point2D>,
    surface: Option<ViewportSurface>,
    image_width: u32,
    image_height: u32,
    events: EventSink,
}

impl Viewport {
    pub fn new(settings: ViewSettings, events: EventSink) -> Self {
        Self {
            scale: 1.0,
            offset: Point2D::ZERO,
            target_scale: 1.0,
            target_offset: Point2D::ZERO,
            settings: settings.sanitized(),
            can_zoom: true,
            can_pan: true,
            is_dragging: false,
            prev_point: None,
            surface: None,
            image_width: 0,
            image_height: 0,
            events,
        }
    }

    pub fn attach(&mut self, surface: ViewportSurface) {
        self.surface = Some(surface);
    }

    pub fn detach(&mut self) {
        self.surface = None;
    }

    pub fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    pub fn set_image_size(&mut self, width: u32, height: u32) {
        self.image_width = width;
        self.image_height = height;
    }

    pub fn set_interaction(&mut self, can_zoom: bool, can_pan: bool) {
        self.can_zoom = can_zoom;
        self.can_pan = can_pan;
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> Point2D {
        self.offset
    }

    pub fn target_scale(&self) -> f32 {
        self.target_scale
    }

    pub fn target_offset(&self) -> Point2D {
        self.target_offset
    }

    pub fn is_dragging(&self) -> bool {
        self.is_dragging
    }

    pub fn is_converged(&self) -> bool {
        self.scale == self.target_scale && self.offset == self.target_offset
    }

    // ---- Coordinate conversion -------------------------------------------------

    /// Client point to backing-buffer pixels. Identity when detached.
    pub fn to_buffer_coordinates(&self, client: Point2D) -> Point2D {
        match self.surface {
            Some(s) => {
                let (fx, fy) = s.buffer_factor();
                Point2D::new((client.x * fx).round(), (client.y * fy).round())
            }
            None => client,
        }
    }

    /// Client point to the image pixel under it, rounded and clamped to the image.
    pub fn to_image_coordinates(&self, client: Point2D) -> Point2D {
        let buffer = match self.surface {
            Some(s) => {
                let (fx, fy) = s.buffer_factor();
                Point2D::new(client.x * fx, client.y * fy)
            }
            None => client,
        };
        let max_x = self.image_width.saturating_sub(1) as f32;
        let max_y = self.image_height.saturating_sub(1) as f32;
        let x = ((buffer.x - self.offset.x) / self.scale).clamp(0.0, max_x);
        let y = ((buffer.y - self.offset.y) / self.scale).clamp(0.0, max_y);
        Point2D::new(x.round(), y.round())
    }

    /// Buffer point to image space under the rendered transform, unclamped.
    fn buffer_to_image(&self, buffer: Point2D) -> Point2D {
        Point2D::new(
            ((buffer.x - self.offset.x) / self.scale).round(),
            ((buffer.y - self.offset.y) / self.scale).round(),
        )
    }

    // ---- Zoom ------------------------------------------------------------------

    /// Zoom about the cursor: negative `delta_y` zooms in. The image point under
    /// the cursor keeps its screen position once the animation settles.
    pub fn wheel(&mut self, delta_y: f32, cursor: Point2D) {
        if !self.can_zoom || delta_y == 0.0 {
            return;
        }
        let direction = if delta_y < 0.0 { 1.0 } else { -1.0 };
        let zoom = (direction * self.settings.zoom_intensity).exp();

        let anchor = self.to_buffer_coordinates(cursor);
        let image_point = self.buffer_to_image(anchor);

        self.target_scale = (self.target_scale * zoom).clamp(self.settings.min_scale, self.settings.max_scale);
        self.target_offset = Point2D::new(
            anchor.x - image_point.x * self.target_scale,
            anchor.y - image_point.y * self.target_scale,
        );
        log::trace!("zoom target {:.3} at {:?}", self.target_scale, self.target_offset);
        self.tick();
    }

    /// One easing step toward the target. Returns `true` while more frames are
    /// needed; on convergence the transform lands exactly on the target.
    pub fn tick(&mut self) -> bool {
        let ease = self.settings.ease_factor;
        let new_scale = self.scale + (self.target_scale - self.scale) * ease;
        let new_offset = self.offset + (self.target_offset - self.offset) * ease;

        let pending = (self.target_scale - new_scale).abs() > self.settings.scale_threshold
            || (self.target_offset.x - new_offset.x).abs() > self.settings.offset_threshold
            || (self.target_offset.y - new_offset.y).abs() > self.settings.offset_threshold;

        if pending {
            self.scale = new_scale;
            self.offset = new_offset;
            self.events.emit(EngineEvent::RedrawRequested);
            true
        } else {
            if !self.is_converged() {
                self.scale = self.target_scale;
                self.offset = self.target_offset;
                self.events.emit(EngineEvent::RedrawRequested);
            }
            false
        }
    }

    /// Tick until converged. Returns the number of frames taken.
    pub fn settle(&mut self) -> usize {
        let mut frames = 1;
        while self.tick() {
            frames += 1;
        }
        frames
    }

    // ---- Pan -------------------------------------------------------------------

    pub fn start_drag(&mut self, client: Point2D) {
        self.prev_point = Some(client);
        self.is_dragging = true;
    }

    /// Pan by the pointer movement since the last call. No easing.
    pub fn drag_to(&mut self, client: Point2D) {
        if !self.is_dragging {
            return;
        }
        let Some(prev) = self.prev_point else {
            return;
        };
        self.drag(client - prev);
        self.prev_point = Some(client);
    }

    /// Pan by a client-space delta, applied to both rendered and target offset.
    pub fn drag(&mut self, delta: Point2D) {
        if !self.can_pan || !self.is_dragging {
            return;
        }
        let (fx, fy) = self.surface.map(|s| s.buffer_factor()).unwrap_or((1.0, 1.0));
        let d = Point2D::new(delta.x * fx, delta.y * fy);
        self.offset = self.offset + d;
        self.target_offset = self.target_offset + d;
        self.events.emit(EngineEvent::RedrawRequested);
    }

    pub fn end_drag(&mut self) {
        self.is_dragging = false;
        self.prev_point = None;
    }

    // ---- Direct control ----------------------------------------------------------

    pub fn transform(&self) -> Transform {
        Transform {
            scale: self.target_scale,
            offset: self.target_offset,
        }
    }

    pub fn set_transform(&mut self, scale: f32, offset: Point2D, smooth: bool) {
        self.target_scale = scale.clamp(self.settings.min_scale, self.settings.max_scale);
        self.target_offset = offset;
        if smooth {
            self.tick();
        } else {
            self.scale = self.target_scale;
            self.offset = self.target_offset;
            self.events.emit(EngineEvent::RedrawRequested);
        }
    }

    pub fn reset_zoom_and_pan(&mut self, smooth: bool) {
        self.set_transform(1.0, Point2D::ZERO, smooth);
    }

    // ---- View boxes ---------------------------------------------------------------

    /// Where the image lands on the element. Zeroed when detached.
    pub fn view_box(&self) -> ViewBox {
        let Some(surface) = self.surface else {
            return ViewBox::default();
        };
        if self.image_width == 0 {
            return ViewBox::default();
        }
        let canvas_scale = surface.client_width / self.image_width as f32;
        let xmin = (self.offset.x * canvas_scale).round();
        let ymin = (self.offset.y * canvas_scale).round();
        ViewBox {
            xmin,
            ymin,
            xmax: xmin + self.image_width as f32 * self.scale * canvas_scale,
            ymax: ymin + self.image_height as f32 * self.scale * canvas_scale,
        }
    }

    /// Visible image region for vector overlays. Zeroed when detached.
    pub fn svg_view_box(&self) -> SvgViewBox {
        if self.surface.is_none() {
            return SvgViewBox::default();
        }
        SvgViewBox {
            x: -self.offset.x / self.scale,
            y: -self.offset.y / self.scale,
            width: self.image_width as f32 / self.scale,
            height: self.image_height as f32 / self.scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        let mut v = Viewport::new(ViewSettings::default(), EventSink::new());
        v.set_image_size(200, 100);
        v
    }

    #[test]
    fn identity_transform_rounds_and_clamps() {
        let v = viewport();
        assert_eq!(v.to_image_coordinates(Point2D::new(10.4, 20.6)), Point2D::new(10.0, 21.0));
        assert_eq!(v.to_image_coordinates(Point2D::new(-5.0, 500.0)), Point2D::new(0.0, 99.0));
    }

    #[test]
    fn wheel_keeps_cursor_point_fixed_after_convergence() {
        let mut v = viewport();
        let cursor = Point2D::new(50.0, 50.0);
        v.wheel(-1.0, cursor);
        assert!((v.target_scale() - 0.25f32.exp()).abs() < 1e-5);
        v.settle();
        assert!(v.is_converged());
        assert_eq!(v.to_image_coordinates(cursor), Point2D::new(50.0, 50.0));
    }

    #[test]
    fn scale_stays_within_bounds() {
        let mut v = viewport();
        for _ in 0..60 {
            v.wheel(-1.0, Point2D::new(10.0, 10.0));
            assert!(v.scale() <= 10.0 && v.scale() >= 0.01);
        }
        v.settle();
        assert_eq!(v.scale(), 10.0);
        for _ in 0..120 {
            v.wheel(1.0, Point2D::new(10.0, 10.0));
            assert!(v.scale() <= 10.0 && v.scale() >= 0.01);
        }
        v.settle();
        assert!((v.scale() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn locked_view_ignores_wheel_and_drag() {
        let mut v = viewport();
        v.set_interaction(false, false);
        v.wheel(-1.0, Point2D::new(10.0, 10.0));
        assert_eq!(v.target_scale(), 1.0);
        v.start_drag(Point2D::ZERO);
        v.drag_to(Point2D::new(9.0, 9.0));
        assert_eq!(v.offset(), Point2D::ZERO);
    }

    #[test]
    fn drag_moves_offset_immediately() {
        let mut v = viewport();
        v.drag(Point2D::new(5.0, 5.0));
        assert_eq!(v.offset(), Point2D::ZERO);
        v.start_drag(Point2D::new(0.0, 0.0));
        v.drag_to(Point2D::new(7.0, -3.0));
        assert_eq!(v.offset(), Point2D::new(7.0, -3.0));
        assert_eq!(v.target_offset(), Point2D::new(7.0, -3.0));
        v.end_drag();
        v.drag_to(Point2D::new(20.0, 20.0));
        assert_eq!(v.offset(), Point2D::new(7.0, -3.0));
    }

    #[test]
    fn drag_is_corrected_for_buffer_density() {
        let mut v = viewport();
        v.attach(ViewportSurface {
            client_width: 100.0,
            client_height: 50.0,
            buffer_width: 200,
            buffer_height: 100,
        });
        v.start_drag(Point2D::ZERO);
        v.drag_to(Point2D::new(3.0, 1.0));
        assert_eq!(v.offset(), Point2D::new(6.0, 2.0));
    }

    #[test]
    fn detached_view_boxes_are_neutral() {
        let v = viewport();
        assert_eq!(v.view_box(), ViewBox::default());
        assert_eq!(v.svg_view_box(), SvgViewBox::default());
    }

    #[test]
    fn bad_settings_neither_panic_nor_hang() {
        let settings = ViewSettings {
            min_scale: 5.0,
            max_scale: 1.0,
            ease_factor: 0.0,
            ..ViewSettings::default()
        };
        let mut v = Viewport::new(settings, EventSink::new());
        v.set_image_size(200, 100);
        v.wheel(-1.0, Point2D::new(10.0, 10.0));
        assert!(v.target_scale() >= 1.0 && v.target_scale() <= 5.0);
        assert!(v.settle() < 100);
        assert!(v.is_converged());
        v.set_transform(0.5, Point2D::ZERO, false);
        assert_eq!(v.scale(), 1.0);
    }

    #[test]
    fn reset_snaps_when_not_smooth() {
        let mut v = viewport();
        v.set_transform(3.0, Point2D::new(-40.0, 12.0), false);
        assert_eq!(v.scale(), 3.0);
        v.reset_zoom_and_pan(false);
        assert_eq!(v.transform(), Transform { scale: 1.0, offset: Point2D::ZERO });
        assert_eq!(v.offset(), Point2D::ZERO);
    }
}
