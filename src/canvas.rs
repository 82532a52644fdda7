use image::RgbaImage;

use crate::error::{EngineError, PersistenceError};
use crate::events::{EngineEvent, EventSink};
use crate::geometry::Rect;
use crate::io;
use crate::labels::LabelSet;
use crate::ops::edges::{ImageOps, MorphologicalGradient};
use crate::ops::raster::{self, CompositeOp};

// ============================================================================
// SURFACE TARGETS
// ============================================================================

/// Which label surfaces an operation writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceTarget {
    Single(usize),
    All,
}

// ============================================================================
// LABEL SURFACE MANAGER
// ============================================================================

/// Owns one surface per label, the cached composite and the scratch buffer.
///
/// Surfaces are index-aligned with the label list. The composite is rebuilt
/// lazily: every mutation sets `recompute_required` and the next call to
/// [`composite`](Self::composite) recombines.
pub struct LabelSurfaceManager {
    width: u32,
    height: u32,
    initialized: bool,
    surfaces: Vec<RgbaImage>,
    composite: RgbaImage,
    buffer: RgbaImage,
    recompute_required: bool,
    edges_only: bool,
    image_ops: Box<dyn ImageOps>,
    events: EventSink,
}

impl LabelSurfaceManager {
    pub fn new(events: EventSink) -> Self {
        Self::with_image_ops(Box::new(MorphologicalGradient), events)
    }

    pub fn with_image_ops(image_ops: Box<dyn ImageOps>, events: EventSink) -> Self {
        Self {
            width: 0,
            height: 0,
            initialized: false,
            surfaces: Vec::new(),
            composite: RgbaImage::new(0, 0),
            buffer: RgbaImage::new(0, 0),
            recompute_required: true,
            edges_only: false,
            image_ops,
            events,
        }
    }

    /// Allocate `count` empty surfaces plus composite and buffer at `width × height`,
    /// replacing anything allocated before.
    pub fn init_surfaces(&mut self, count: usize, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.surfaces = (0..count).map(|_| RgbaImage::new(width, height)).collect();
        self.composite = RgbaImage::new(width, height);
        self.buffer = RgbaImage::new(width, height);
        self.initialized = true;
        log::debug!("allocated {} label surfaces at {}x{}", count, width, height);
        self.mark_dirty();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame(&self) -> Rect {
        Rect::full(self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn recompute_required(&self) -> bool {
        self.recompute_required
    }

    /// Flag the composite as stale and tell observers.
    pub fn mark_dirty(&mut self) {
        self.recompute_required = true;
        self.events.emit(EngineEvent::CompositeInvalidated);
    }

    pub fn edges_only(&self) -> bool {
        self.edges_only
    }

    pub fn set_edges_only(&mut self, on: bool) {
        if self.edges_only != on {
            self.edges_only = on;
            self.mark_dirty();
        }
    }

    /// Append an empty surface for a newly added label.
    pub fn push_surface(&mut self) {
        if self.initialized {
            self.surfaces.push(RgbaImage::new(self.width, self.height));
            self.mark_dirty();
        }
    }

    /// Drop the surface of a removed label.
    pub fn remove_surface(&mut self, index: usize) -> Option<RgbaImage> {
        if index >= self.surfaces.len() {
            return None;
        }
        let removed = self.surfaces.remove(index);
        self.mark_dirty();
        Some(removed)
    }

    // ---- Compositing ----------------------------------------------------------

    /// Return the composite, recombining first if anything changed.
    ///
    /// Invisible labels never contribute. In edges-only mode the result is
    /// the morphological gradient of the combined surfaces. Returns `None`
    /// (and keeps the dirty flag) when there is nothing to combine yet, so the
    /// next request simply tries again.
    pub fn composite(&mut self, labels: &LabelSet) -> Option<&RgbaImage> {
        if !self.initialized {
            log::warn!("composite requested before surfaces were initialized");
            return None;
        }
        if self.surfaces.len() != labels.len() {
            log::error!(
                "surface/label mismatch: {} surfaces for {} labels, skipping frame",
                self.surfaces.len(),
                labels.len()
            );
            return None;
        }
        if self.recompute_required {
            self.composite = self.combine_visible(labels);
            if self.edges_only {
                self.composite = self.image_ops.morphological_gradient(&self.composite);
            }
            self.recompute_required = false;
        }
        Some(&self.composite)
    }

    /// Fresh combination of the visible surfaces, ignoring edges-only mode.
    pub fn combine_visible(&self, labels: &LabelSet) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        for (surface, label) in self.surfaces.iter().zip(labels.iter()) {
            if label.visible {
                raster::composite_full(&mut out, surface, CompositeOp::SourceOver);
            }
        }
        out
    }

    // ---- Accessors -----------------------------------------------------------

    pub fn surface(&self, index: usize) -> Option<&RgbaImage> {
        self.surfaces.get(index)
    }

    pub fn surface_mut(&mut self, index: usize) -> Option<&mut RgbaImage> {
        self.surfaces.get_mut(index)
    }

    pub fn surfaces(&self) -> &[RgbaImage] {
        &self.surfaces
    }

    pub fn active_surface(&self, labels: &LabelSet) -> Option<&RgbaImage> {
        labels.active_index().and_then(|i| self.surfaces.get(i))
    }

    pub fn active_surface_mut(&mut self, labels: &LabelSet) -> Option<&mut RgbaImage> {
        labels.active_index().and_then(|i| self.surfaces.get_mut(i))
    }

    pub fn buffer(&self) -> &RgbaImage {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut RgbaImage {
        &mut self.buffer
    }

    /// Last composite built, without recombining.
    pub fn composite_image(&self) -> &RgbaImage {
        &self.composite
    }

    pub fn clear_buffer(&mut self) {
        raster::clear(&mut self.buffer);
    }

    // ---- Mutation ------------------------------------------------------------

    pub fn clear_surface(&mut self, index: usize) -> Result<(), EngineError> {
        let len = self.surfaces.len();
        let surface = self
            .surfaces
            .get_mut(index)
            .ok_or(EngineError::LabelOutOfRange { index, len })?;
        raster::clear(surface);
        self.mark_dirty();
        Ok(())
    }

    pub fn clear_all(&mut self) {
        for surface in &mut self.surfaces {
            raster::clear(surface);
        }
        self.mark_dirty();
    }

    /// Composite `rect` of the scratch buffer onto the target surface(s).
    pub fn apply_buffer(&mut self, target: SurfaceTarget, rect: Rect, op: CompositeOp) {
        let buffer = &self.buffer;
        for (i, surface) in self.surfaces.iter_mut().enumerate() {
            if target_includes(target, i) {
                raster::composite_region(surface, buffer, rect, op);
            }
        }
        self.mark_dirty();
    }

    /// Apply `f` to each targeted surface.
    pub fn for_each_target(&mut self, target: SurfaceTarget, mut f: impl FnMut(&mut RgbaImage)) {
        for (i, surface) in self.surfaces.iter_mut().enumerate() {
            if target_includes(target, i) {
                f(surface);
            }
        }
        self.mark_dirty();
    }

    /// Exchange the pixels of surface `index` with `pixels`. Used by undo/redo
    /// so the caller ends up holding the state that was replaced.
    pub fn swap_surface(&mut self, index: usize, pixels: &mut RgbaImage) -> Result<(), EngineError> {
        let len = self.surfaces.len();
        let surface = self
            .surfaces
            .get_mut(index)
            .ok_or(EngineError::LabelOutOfRange { index, len })?;
        if surface.dimensions() != pixels.dimensions() {
            log::warn!(
                "snapshot for surface {} is {:?}, surface is {:?}; skipping",
                index,
                pixels.dimensions(),
                surface.dimensions()
            );
            return Ok(());
        }
        std::mem::swap(surface, pixels);
        self.mark_dirty();
        Ok(())
    }

    // ---- Persistence ---------------------------------------------------------

    /// Decode an encoded image into surface `index`.
    pub fn load_surface(&mut self, encoded: &[u8], index: usize) -> Result<(), EngineError> {
        let len = self.surfaces.len();
        if index >= len {
            return Err(EngineError::LabelOutOfRange { index, len });
        }
        let decoded = self.decode_checked(encoded, index)?;
        self.surfaces[index] = decoded;
        self.mark_dirty();
        Ok(())
    }

    /// Decode one blob per label, in label order. Nothing is replaced unless
    /// every blob decodes.
    pub fn load_all_surfaces(&mut self, encoded: &[Vec<u8>]) -> Result<(), EngineError> {
        if encoded.len() != self.surfaces.len() {
            return Err(PersistenceError::CountMismatch {
                blobs: encoded.len(),
                labels: self.surfaces.len(),
            }
            .into());
        }
        let decoded = encoded
            .iter()
            .enumerate()
            .map(|(i, blob)| self.decode_checked(blob, i))
            .collect::<Result<Vec<_>, _>>()?;
        self.surfaces = decoded;
        self.mark_dirty();
        log::info!("restored {} label surfaces", self.surfaces.len());
        Ok(())
    }

    fn decode_checked(&self, encoded: &[u8], index: usize) -> Result<RgbaImage, PersistenceError> {
        let img = io::decode_surface(encoded).map_err(|source| PersistenceError::Decode { index, source })?;
        if img.dimensions() != (self.width, self.height) {
            return Err(PersistenceError::SizeMismatch {
                index,
                got_w: img.width(),
                got_h: img.height(),
                want_w: self.width,
                want_h: self.height,
            });
        }
        Ok(img)
    }
}

fn target_includes(target: SurfaceTarget, index: usize) -> bool {
    match target {
        SurfaceTarget::Single(i) => i == index,
        SurfaceTarget::All => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{Label, LabelColor};
    use image::Rgba;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    fn two_labels() -> LabelSet {
        LabelSet::new(vec![
            Label::new("A", LabelColor([255, 0, 0])),
            Label::new("B", LabelColor([0, 255, 0])),
        ])
    }

    fn manager(labels: &LabelSet) -> LabelSurfaceManager {
        let mut m = LabelSurfaceManager::new(EventSink::new());
        m.init_surfaces(labels.len(), 8, 8);
        m
    }

    #[test]
    fn composite_before_init_is_none_and_stays_dirty() {
        let mut m = LabelSurfaceManager::new(EventSink::new());
        assert!(m.composite(&two_labels()).is_none());
        assert!(m.recompute_required());
    }

    #[test]
    fn later_labels_stack_on_top() {
        let labels = two_labels();
        let mut m = manager(&labels);
        raster::fill_rect(m.surface_mut(0).unwrap(), Rect::full(8, 8), RED, CompositeOp::Copy);
        raster::fill_rect(m.surface_mut(1).unwrap(), Rect::new(0, 0, 2, 2), GREEN, CompositeOp::Copy);
        m.mark_dirty();
        let comp = m.composite(&labels).unwrap();
        assert_eq!(*comp.get_pixel(0, 0), GREEN);
        assert_eq!(*comp.get_pixel(5, 5), RED);
        assert!(!m.recompute_required());
    }

    #[test]
    fn invisible_label_never_contributes() {
        let mut labels = two_labels();
        let mut m = manager(&labels);
        raster::fill_rect(m.surface_mut(0).unwrap(), Rect::full(8, 8), RED, CompositeOp::Copy);
        labels.get_mut(0).unwrap().visible = false;
        m.mark_dirty();
        let comp = m.composite(&labels).unwrap();
        assert!(comp.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn clear_surface_checks_range() {
        let labels = two_labels();
        let mut m = manager(&labels);
        assert!(m.clear_surface(1).is_ok());
        assert!(matches!(
            m.clear_surface(5),
            Err(EngineError::LabelOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn apply_buffer_respects_target() {
        let labels = two_labels();
        let mut m = manager(&labels);
        raster::fill_rect(m.buffer_mut(), Rect::full(8, 8), RED, CompositeOp::Copy);
        m.apply_buffer(SurfaceTarget::Single(1), Rect::new(1, 1, 2, 2), CompositeOp::SourceOver);
        assert_eq!(*m.surface(1).unwrap().get_pixel(1, 1), RED);
        assert_eq!(m.surface(1).unwrap().get_pixel(4, 4)[3], 0);
        assert_eq!(m.surface(0).unwrap().get_pixel(1, 1)[3], 0);
    }

    #[test]
    fn load_all_rejects_wrong_count_and_size() {
        let labels = two_labels();
        let mut m = manager(&labels);
        let blob = io::encode_surface(&RgbaImage::new(8, 8)).unwrap();
        assert!(m.load_all_surfaces(&[blob.clone()]).is_err());
        let small = io::encode_surface(&RgbaImage::new(4, 4)).unwrap();
        assert!(matches!(
            m.load_all_surfaces(&[blob.clone(), small]),
            Err(EngineError::Persistence(PersistenceError::SizeMismatch { index: 1, .. }))
        ));
        assert!(m.load_all_surfaces(&[blob.clone(), blob]).is_ok());
    }

    #[test]
    fn load_surface_restores_pixels() {
        let labels = two_labels();
        let mut m = manager(&labels);
        let mut painted = RgbaImage::new(8, 8);
        painted.put_pixel(3, 4, RED);
        let blob = io::encode_surface(&painted).unwrap();
        m.load_surface(&blob, 1).unwrap();
        assert_eq!(m.surface(1).unwrap(), &painted);
    }

    #[test]
    fn active_handle_writes_through_and_clear_all_empties() {
        let labels = two_labels();
        let mut m = manager(&labels);
        m.active_surface_mut(&labels).unwrap().put_pixel(2, 2, RED);
        assert_eq!(*m.surface(0).unwrap().get_pixel(2, 2), RED);

        m.set_edges_only(true);
        m.mark_dirty();
        m.composite(&labels).unwrap();
        assert_eq!(*m.composite_image().get_pixel(2, 2), RED);

        m.clear_all();
        assert!(m.recompute_required());
        assert!(m.surfaces().iter().all(|s| s.pixels().all(|p| p[3] == 0)));
    }
}
