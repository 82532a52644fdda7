//! # Draw engine
//!
//! The tool state machine. Pointer events come in as client coordinates,
//! are mapped to image pixels through the [`Viewport`], and mutate the label
//! surfaces through the [`LabelSurfaceManager`]. Each stroke pushes one
//! pre-stroke snapshot onto the [`UndoRedoStack`].
//!
//! Per-tool behaviour lives in a fixed handler table indexed by [`Tool`].

use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::{LabelSurfaceManager, SurfaceTarget};
use crate::components::history::{UndoRedoEntry, UndoRedoStack};
use crate::components::path_overlay::PathOverlay;
use crate::components::tools::{Tool, ToolFamily, ToolTable};
use crate::error::{EngineError, GatewayError};
use crate::events::{EngineEvent, EventSink};
use crate::geometry::{Point2D, Rect, StrokeState};
use crate::labels::{ActiveInstance, Label, LabelColor, LabelSet};
use crate::ops::binarize::{self, Binarization};
use crate::ops::raster::{self, CompositeOp};
use crate::postprocess::{
    self, Placement, PostProcessGateway, PostProcessJob, PostProcessOutcome, PostProcessResult, RefineOp,
    RegionProposal,
};
use crate::settings::{EditorSettings, PostProcessOption, RefineSettings};
use crate::viewport::Viewport;

/// Whether a stroke is in progress, and with which tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Stroke(Tool),
}

// ============================================================================
// TOOL HANDLERS
// ============================================================================

/// What a tool did with its stroke once the pointer was released.
enum StrokeEnd {
    /// Pixels were written to the label surfaces.
    Committed,
    /// Nothing was written.
    Inert,
    /// The stroke is staged and waits for refinement.
    Job(PostProcessJob),
}

impl StrokeEnd {
    fn staged(job: Option<PostProcessJob>) -> Self {
        job.map_or(StrokeEnd::Inert, StrokeEnd::Job)
    }
}

struct ToolHandlers {
    /// Called for every pointer move with the image-space point.
    on_move: fn(&mut DrawEngine, Point2D),
    /// Called once at stroke end.
    on_finish: fn(&mut DrawEngine, LabelColor) -> StrokeEnd,
}

const HANDLERS: ToolTable<ToolHandlers> = ToolTable([
    // Pan
    ToolHandlers {
        on_move: DrawEngine::ignore_move,
        on_finish: DrawEngine::ignore_finish,
    },
    // Pen
    ToolHandlers {
        on_move: DrawEngine::pen_move,
        on_finish: DrawEngine::pen_finish,
    },
    // Eraser
    ToolHandlers {
        on_move: DrawEngine::eraser_move,
        on_finish: DrawEngine::eraser_finish,
    },
    // Lasso
    ToolHandlers {
        on_move: DrawEngine::lasso_move,
        on_finish: DrawEngine::lasso_finish,
    },
    // LassoEraser
    ToolHandlers {
        on_move: DrawEngine::lasso_move,
        on_finish: DrawEngine::lasso_eraser_finish,
    },
]);

// ============================================================================
// DRAW ENGINE
// ============================================================================

pub struct DrawEngine {
    tool: Tool,
    line_width: f32,
    bbox_margin: f32,
    erase_all: bool,
    swap_markers: bool,
    auto_post_process: bool,
    post_process: PostProcessOption,
    increment_after_stroke: bool,
    instance_mode: bool,
    instance_shade_count: usize,
    refine: RefineSettings,

    labels: LabelSet,
    surfaces: LabelSurfaceManager,
    viewport: Viewport,
    history: UndoRedoStack,
    overlay: PathOverlay,
    lasso: Vec<Point2D>,
    stroke: StrokeState,
    state: EngineState,
    stroke_color: LabelColor,

    /// Bumped at every stroke start and image load.
    generation: u64,
    /// Tool of the stroke whose refinement is outstanding.
    pending_tool: Option<Tool>,
    reference: Option<RgbaImage>,
    image_id: u64,
    session: Uuid,
    events: EventSink,
}

impl DrawEngine {
    pub fn new(settings: &EditorSettings) -> Self {
        let events = EventSink::new();
        Self {
            tool: settings.tools.initial_tool,
            line_width: settings.brush.line_width.max(1.0),
            bbox_margin: settings.brush.bbox_margin,
            erase_all: settings.tools.erase_all,
            swap_markers: settings.tools.swap_markers,
            auto_post_process: settings.tools.auto_post_process,
            post_process: settings.tools.post_process,
            increment_after_stroke: settings.tools.increment_after_stroke,
            instance_mode: false,
            instance_shade_count: settings.tools.instance_shades.max(1),
            refine: settings.refine.clone(),
            labels: LabelSet::new(Vec::new()),
            surfaces: LabelSurfaceManager::new(events.clone()),
            viewport: Viewport::new(settings.view.clone(), events.clone()),
            history: UndoRedoStack::new(
                settings.history.max_entries,
                Some(settings.history.max_memory_mib.saturating_mul(1024 * 1024)),
            ),
            overlay: PathOverlay::new(),
            lasso: Vec::new(),
            stroke: StrokeState::default(),
            state: EngineState::Idle,
            stroke_color: LabelColor::WHITE,
            generation: 0,
            pending_tool: None,
            reference: None,
            image_id: 0,
            session: Uuid::new_v4(),
            events,
        }
    }

    // ---- Session setup ---------------------------------------------------------

    /// Replace the label list. Surfaces are reallocated if an image is loaded.
    pub fn set_labels(&mut self, labels: Vec<Label>) {
        self.labels = LabelSet::new(labels);
        if self.surfaces.is_initialized() {
            let (w, h) = (self.surfaces.width(), self.surfaces.height());
            self.surfaces.init_surfaces(self.labels.len(), w, h);
            self.history.empty();
            self.emit_history();
        }
    }

    /// Start annotating a new image: fresh surfaces, empty history, and any
    /// outstanding refinement is invalidated.
    pub fn set_image(&mut self, reference: RgbaImage) {
        let (w, h) = reference.dimensions();
        self.surfaces.init_surfaces(self.labels.len(), w, h);
        self.viewport.set_image_size(w, h);
        self.history.empty();
        self.stroke.reset();
        self.lasso.clear();
        self.overlay.reset_path();
        self.state = EngineState::Idle;
        self.generation += 1;
        self.pending_tool = None;
        self.image_id += 1;
        self.reference = Some(reference);
        log::info!(
            "session {}: annotating {}x{} image with {} labels",
            self.session,
            w,
            h,
            self.labels.len()
        );
        self.emit_history();
        self.events.emit(EngineEvent::RedrawRequested);
    }

    /// Drop the image and all surfaces' history.
    pub fn unload_image(&mut self) {
        self.reference = None;
        self.history.empty();
        self.generation += 1;
        self.pending_tool = None;
        self.state = EngineState::Idle;
        self.emit_history();
    }

    pub fn reference_image(&self) -> Option<&RgbaImage> {
        self.reference.as_ref()
    }

    pub fn add_label(&mut self, label: Label) -> bool {
        if !self.labels.add(label) {
            return false;
        }
        self.surfaces.push_surface();
        true
    }

    /// Remove a label and its surface. History is dropped because snapshot
    /// indices no longer line up.
    pub fn remove_label(&mut self, name: &str) -> Option<Label> {
        let index = self.labels.index_of(name)?;
        let label = self.labels.remove(name)?;
        self.surfaces.remove_surface(index);
        self.history.empty();
        self.emit_history();
        Some(label)
    }

    // ---- Accessors ---------------------------------------------------------------

    /// Identifier of this editing session, used to tag log lines.
    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn events(&self) -> crossbeam_channel::Receiver<EngineEvent> {
        self.events.listen()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_drawing(&self) -> bool {
        self.state != EngineState::Idle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn surfaces(&self) -> &LabelSurfaceManager {
        &self.surfaces
    }

    pub fn surfaces_mut(&mut self) -> &mut LabelSurfaceManager {
        &mut self.surfaces
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn history(&self) -> &UndoRedoStack {
        &self.history
    }

    pub fn path_overlay(&self) -> &PathOverlay {
        &self.overlay
    }

    pub fn lasso_points(&self) -> &[Point2D] {
        &self.lasso
    }

    pub fn stroke(&self) -> &StrokeState {
        &self.stroke
    }

    /// Current composite, recombined if needed.
    pub fn composite(&mut self) -> Option<&RgbaImage> {
        self.surfaces.composite(&self.labels)
    }

    // ---- Settings toggles -----------------------------------------------------------

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn line_width(&self) -> f32 {
        self.line_width
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.line_width = width.max(1.0);
    }

    pub fn set_erase_all(&mut self, on: bool) {
        self.erase_all = on;
    }

    pub fn set_swap_markers(&mut self, on: bool) {
        self.swap_markers = on;
    }

    pub fn set_auto_post_process(&mut self, on: bool) {
        self.auto_post_process = on;
    }

    pub fn set_post_process(&mut self, option: PostProcessOption) {
        self.post_process = option;
    }

    pub fn set_increment_after_stroke(&mut self, on: bool) {
        self.increment_after_stroke = on;
    }

    pub fn instance_mode(&self) -> bool {
        self.instance_mode
    }

    pub fn set_instance_mode(&mut self, on: bool) {
        self.instance_mode = on;
    }

    pub fn set_edges_only(&mut self, on: bool) {
        self.surfaces.set_edges_only(on);
        self.events.emit(EngineEvent::RedrawRequested);
    }

    pub fn set_active_label(&mut self, name: Option<&str>) -> Option<usize> {
        self.labels.set_active(name)
    }

    pub fn set_active_instance(&mut self, instance: usize) -> Option<ActiveInstance> {
        self.labels.set_active_instance(instance, self.instance_shade_count)
    }

    pub fn set_label_visible(&mut self, index: usize, visible: bool) -> Result<(), EngineError> {
        let len = self.labels.len();
        let label = self
            .labels
            .get_mut(index)
            .ok_or(EngineError::LabelOutOfRange { index, len })?;
        label.visible = visible;
        self.surfaces.mark_dirty();
        self.events.emit(EngineEvent::RedrawRequested);
        Ok(())
    }

    pub fn toggle_all_visibility(&mut self) -> bool {
        let shown = self.labels.toggle_all_visibility();
        self.surfaces.mark_dirty();
        self.events.emit(EngineEvent::RedrawRequested);
        shown
    }

    /// Whether the stroke about to start snapshots every surface. Swap-markers
    /// counts for drawing tools only and erase-all for eraser tools only.
    pub fn affects_multiple_labels(&self) -> bool {
        match self.tool.family() {
            ToolFamily::Drawing => self.swap_markers,
            ToolFamily::Erasing => self.erase_all,
            ToolFamily::Navigation => false,
        }
    }

    /// Colour new pixels get: the active instance's shade in instance mode,
    /// otherwise the active label's colour (white without an active label).
    pub fn fill_color(&self) -> Result<LabelColor, EngineError> {
        if self.instance_mode {
            return self
                .labels
                .active_instance()
                .map(|i| i.shade)
                .ok_or(EngineError::NoActiveInstance);
        }
        Ok(self.labels.active().map_or(LabelColor::WHITE, |l| l.color))
    }

    fn active_index(&self) -> Option<usize> {
        self.labels.active_index()
    }

    fn active_target(&self) -> SurfaceTarget {
        SurfaceTarget::Single(self.active_index().unwrap_or(usize::MAX))
    }

    fn eraser_target(&self) -> SurfaceTarget {
        if self.erase_all {
            SurfaceTarget::All
        } else {
            self.active_target()
        }
    }

    fn emit_history(&self) {
        self.events.emit(EngineEvent::HistoryChanged {
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        });
    }

    // ---- Stroke lifecycle -----------------------------------------------------------

    /// Begin a stroke with the current tool. Silently ignored while a stroke
    /// is in progress, without an active label, before an image is loaded,
    /// or with the pan tool.
    ///
    /// Fails with [`EngineError::NoActiveInstance`] when a drawing tool is used
    /// in instance mode before an instance is picked. Nothing is recorded
    /// then, and the redo stack is kept.
    pub fn start_draw(&mut self) -> Result<(), EngineError> {
        if self.is_drawing() {
            log::trace!("start_draw ignored, stroke already in progress");
            return Ok(());
        }
        let Some(active) = self.active_index() else {
            log::debug!("start_draw ignored, no active label");
            return Ok(());
        };
        if !self.surfaces.is_initialized() || self.tool == Tool::Pan {
            return Ok(());
        }

        let color = match self.fill_color() {
            Ok(color) => color,
            Err(e) if self.tool.is_drawing_tool() => {
                log::error!("stroke aborted: {}", e);
                return Err(e);
            }
            Err(_) => LabelColor::WHITE,
        };

        self.stroke.reset();
        self.lasso.clear();
        self.overlay.reset_path();
        self.surfaces.clear_buffer();
        self.generation += 1;

        let entry = if self.affects_multiple_labels() {
            Some(UndoRedoEntry::capture_all(&self.surfaces))
        } else {
            UndoRedoEntry::capture(&self.surfaces, active)
        };
        if let Some(entry) = entry {
            self.history.push(entry);
            self.emit_history();
        }

        self.stroke_color = color;
        self.stroke.is_drawing = true;
        self.state = EngineState::Stroke(self.tool);
        log::trace!("stroke {} started with {}", self.generation, self.tool);
        Ok(())
    }

    /// Feed one pointer position (client coordinates).
    pub fn draw(&mut self, client: Point2D) {
        let EngineState::Stroke(tool) = self.state else {
            return;
        };
        if self.active_index().is_none() {
            return;
        }
        let p = self.viewport.to_image_coordinates(client);
        let pad = if tool.has_brush_size() {
            self.line_width / 2.0 + self.bbox_margin
        } else {
            0.0
        };
        self.stroke
            .update_bounds(p, pad, self.surfaces.width(), self.surfaces.height());
        if self.stroke.is_first_point() {
            self.stroke.previous_point = Some(p);
        }
        self.stroke.current_point = Some(p);

        (HANDLERS.get(tool).on_move)(self, p);

        self.stroke.previous_point = Some(p);
    }

    /// Finish the stroke. Returns the refinement job to run when
    /// auto-post-process is on; the result goes back through
    /// [`apply_post_process`](Self::apply_post_process).
    pub fn end_draw(&mut self) -> Option<PostProcessJob> {
        let EngineState::Stroke(tool) = self.state else {
            return None;
        };
        let color = self.stroke_color;

        if let Some(bbox) = self.stroke.bounding_box() {
            self.binarize_buffer(bbox, color);
        }
        let end = (HANDLERS.get(tool).on_finish)(self, color);

        self.state = EngineState::Idle;
        self.stroke.is_drawing = false;
        self.lasso.clear();
        self.surfaces.mark_dirty();

        if let StrokeEnd::Job(job) = end {
            self.pending_tool = Some(tool);
            return Some(job);
        }
        self.overlay.reset_path();
        if matches!(end, StrokeEnd::Committed) && tool.is_drawing_tool() {
            self.advance_instance();
        }
        self.events.emit(EngineEvent::RedrawRequested);
        None
    }

    /// [`end_draw`](Self::end_draw), then run and apply any refinement.
    pub async fn end_draw_with(
        &mut self,
        gateway: &PostProcessGateway,
    ) -> Result<Option<PostProcessOutcome>, EngineError> {
        let Some(job) = self.end_draw() else {
            return Ok(None);
        };
        let result = gateway.run(job).await;
        self.apply_post_process(result).map(Some)
    }

    /// Merge a refinement result into the surfaces.
    ///
    /// Results from an older stroke are dropped. On failure the staged stroke
    /// is discarded, the surfaces keep their pre-call state, and the error is
    /// reported after a redraw has been requested.
    pub fn apply_post_process(&mut self, result: PostProcessResult) -> Result<PostProcessOutcome, EngineError> {
        if result.generation != self.generation {
            log::debug!(
                "dropping refinement for stroke {}, current stroke is {}",
                result.generation,
                self.generation
            );
            return Ok(PostProcessOutcome::Stale);
        }
        let tool = self.pending_tool.take();
        self.overlay.reset_path();
        let placement = result.placement;

        let refined = result.outcome.and_then(|img| {
            if img.dimensions() != (placement.region.width, placement.region.height) {
                return Err(GatewayError::MalformedResponse {
                    op: "merge",
                    expected: placement.region.area() * 4,
                    actual: img.as_raw().len(),
                });
            }
            Ok(img)
        });
        let refined = match refined {
            Ok(img) => img,
            Err(e) => {
                self.surfaces.clear_buffer();
                self.events.emit(EngineEvent::RedrawRequested);
                self.events.emit(EngineEvent::PostProcessFailed(e.to_string()));
                return Err(e.into());
            }
        };

        let region = placement.region;
        self.surfaces.clear_buffer();
        raster::put_bytes(self.surfaces.buffer_mut(), region, refined.as_raw());
        if let Some(clip) = placement.clip {
            raster::retain_rect(self.surfaces.buffer_mut(), clip);
        }
        if placement.merge != CompositeOp::DestinationOut {
            self.binarize_buffer(region, placement.color);
        }
        self.surfaces.apply_buffer(placement.target, region, placement.merge);
        self.surfaces.clear_buffer();

        if tool.is_some_and(Tool::is_drawing_tool) {
            self.advance_instance();
        }
        self.events.emit(EngineEvent::RedrawRequested);
        Ok(PostProcessOutcome::Applied)
    }

    // ---- Pointer convenience ------------------------------------------------------

    /// Pointer pressed: pans with the pan tool, otherwise starts a stroke at `client`.
    pub fn pointer_down(&mut self, client: Point2D) -> Result<(), EngineError> {
        if self.tool == Tool::Pan {
            self.viewport.start_drag(client);
            return Ok(());
        }
        self.start_draw()?;
        self.draw(client);
        Ok(())
    }

    pub fn pointer_move(&mut self, client: Point2D) {
        if self.viewport.is_dragging() {
            self.viewport.drag_to(client);
        } else {
            self.draw(client);
        }
    }

    pub fn pointer_up(&mut self) -> Option<PostProcessJob> {
        if self.viewport.is_dragging() {
            self.viewport.end_drag();
            return None;
        }
        self.end_draw()
    }

    /// Wheel input: with the modifier held it resizes the brush by 2 px,
    /// otherwise it zooms about the cursor.
    pub fn wheel(&mut self, delta_y: f32, cursor: Point2D, modifier: bool) {
        if modifier {
            let step = if delta_y > 0.0 { -2.0 } else { 2.0 };
            self.set_line_width(self.line_width + step);
        } else {
            self.viewport.wheel(delta_y, cursor);
        }
    }

    // ---- History ------------------------------------------------------------------

    /// Restore the state before the last stroke. Returns whether anything changed.
    pub fn undo(&mut self) -> Result<bool, EngineError> {
        if self.is_drawing() {
            return Ok(false);
        }
        let Some(entry) = self.history.undo() else {
            return Ok(false);
        };
        entry.apply(&mut self.surfaces)?;
        self.after_history_move();
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool, EngineError> {
        if self.is_drawing() {
            return Ok(false);
        }
        let Some(entry) = self.history.redo() else {
            return Ok(false);
        };
        entry.apply(&mut self.surfaces)?;
        self.after_history_move();
        Ok(true)
    }

    fn after_history_move(&mut self) {
        // A result for the last stroke must not land on restored pixels.
        self.generation += 1;
        self.pending_tool = None;
        self.emit_history();
        self.events.emit(EngineEvent::RedrawRequested);
    }

    // ---- Colour maintenance ---------------------------------------------------------

    /// Recolour every painted pixel of surface `index` to its label colour.
    /// Instance surfaces keep their shades.
    pub fn refresh_color(&mut self, index: usize) -> Result<(), EngineError> {
        if !self.instance_mode {
            let len = self.labels.len();
            let color = self
                .labels
                .get(index)
                .ok_or(EngineError::LabelOutOfRange { index, len })?
                .color;
            let frame = self.surfaces.frame();
            let surface = self
                .surfaces
                .surface_mut(index)
                .ok_or(EngineError::LabelOutOfRange { index, len })?;
            raster::fill_rect(surface, frame, color.rgba(), CompositeOp::SourceAtop);
            self.surfaces.mark_dirty();
        }
        self.events.emit(EngineEvent::RedrawRequested);
        Ok(())
    }

    pub fn refresh_all_colors(&mut self) -> Result<(), EngineError> {
        for index in 0..self.labels.len().min(self.surfaces.len()) {
            self.refresh_color(index)?;
        }
        Ok(())
    }

    pub fn clear_label(&mut self, index: usize) -> Result<(), EngineError> {
        self.surfaces.clear_surface(index)?;
        self.events.emit(EngineEvent::RedrawRequested);
        Ok(())
    }

    pub fn clear_all_labels(&mut self) {
        self.surfaces.clear_all();
        self.events.emit(EngineEvent::RedrawRequested);
    }

    /// Ask the refinement service for candidate regions around the active mask.
    pub async fn propose_regions(
        &self,
        gateway: &PostProcessGateway,
        min_size: u32,
        max_depth: u32,
    ) -> Result<Vec<RegionProposal>, EngineError> {
        let Some(surface) = self.surfaces.active_surface(&self.labels) else {
            return Ok(Vec::new());
        };
        let proposals = gateway
            .propose_regions(
                surface.as_raw().clone(),
                surface.width(),
                surface.height(),
                min_size,
                max_depth,
            )
            .await?;
        log::debug!("{} region proposals", proposals.len());
        Ok(proposals)
    }

    // ---- Tool handlers ----------------------------------------------------------------

    fn ignore_move(&mut self, _p: Point2D) {}

    fn ignore_finish(&mut self, _color: LabelColor) -> StrokeEnd {
        StrokeEnd::Inert
    }

    fn stamp_stroke_segment(&mut self, p: Point2D) {
        let from = self.stroke.previous_point.unwrap_or(p);
        let width = self.line_width;
        let color = self.stroke_color.rgba();
        raster::stamp_segment(self.surfaces.buffer_mut(), from, p, width, color);
    }

    fn pen_move(&mut self, p: Point2D) {
        self.stamp_stroke_segment(p);
        self.events.emit(EngineEvent::RedrawRequested);
    }

    fn eraser_move(&mut self, p: Point2D) {
        self.stamp_stroke_segment(p);
        if self.auto_post_process {
            self.overlay.add_point(p);
        } else if let Some(bbox) = self.stroke.bounding_box() {
            let target = self.eraser_target();
            self.surfaces.apply_buffer(target, bbox, CompositeOp::DestinationOut);
        }
        self.events.emit(EngineEvent::RedrawRequested);
    }

    fn lasso_move(&mut self, p: Point2D) {
        self.lasso.push(p);
        self.overlay.add_point(p);
        self.events.emit(EngineEvent::RedrawRequested);
    }

    fn pen_finish(&mut self, color: LabelColor) -> StrokeEnd {
        let Some(bbox) = self.stroke.bounding_box() else {
            return StrokeEnd::Inert;
        };
        self.commit_drawing(bbox, color)
    }

    fn eraser_finish(&mut self, _color: LabelColor) -> StrokeEnd {
        if self.auto_post_process {
            return StrokeEnd::staged(self.erase_job());
        }
        // Already applied while moving.
        StrokeEnd::Committed
    }

    fn lasso_finish(&mut self, color: LabelColor) -> StrokeEnd {
        let points = std::mem::take(&mut self.lasso);
        if points.len() < 3 {
            log::trace!("lasso with {} points ignored", points.len());
            return StrokeEnd::Inert;
        }
        raster::fill_polygon(self.surfaces.buffer_mut(), &points, color.rgba(), CompositeOp::SourceOver);
        let Some(bbox) = self.stroke.bounding_box() else {
            return StrokeEnd::Inert;
        };
        self.commit_drawing(bbox, color)
    }

    fn lasso_eraser_finish(&mut self, color: LabelColor) -> StrokeEnd {
        let points = std::mem::take(&mut self.lasso);
        if points.len() < 3 {
            log::trace!("lasso eraser with {} points ignored", points.len());
            return StrokeEnd::Inert;
        }
        if self.auto_post_process {
            raster::fill_polygon(self.surfaces.buffer_mut(), &points, color.rgba(), CompositeOp::SourceOver);
            return StrokeEnd::staged(self.erase_job());
        }
        let target = self.eraser_target();
        self.surfaces.for_each_target(target, |surface| {
            raster::fill_polygon(surface, &points, color.rgba(), CompositeOp::DestinationOut);
        });
        StrokeEnd::Committed
    }

    /// Shared end of Pen and Lasso once the buffer holds the stroke.
    fn commit_drawing(&mut self, bbox: Rect, color: LabelColor) -> StrokeEnd {
        if self.auto_post_process {
            return StrokeEnd::staged(self.draw_job(bbox, color));
        }
        if self.swap_markers {
            self.swap_into_active(bbox, color);
        } else {
            let target = self.active_target();
            self.surfaces.apply_buffer(target, bbox, CompositeOp::SourceOver);
        }
        StrokeEnd::Committed
    }

    /// Move painted pixels under the staged stroke from whichever label owns
    /// them onto the active label.
    fn swap_into_active(&mut self, bbox: Rect, color: LabelColor) {
        let Some(active) = self.active_index() else {
            return;
        };
        let combined = self.surfaces.combine_visible(&self.labels);
        let buffer = self.surfaces.buffer_mut();
        raster::composite_region(buffer, &combined, bbox, CompositeOp::SourceIn);
        raster::fill_rect(buffer, bbox, color.rgba(), CompositeOp::SourceIn);
        for index in 0..self.surfaces.len() {
            let op = if index == active {
                CompositeOp::SourceOver
            } else {
                CompositeOp::DestinationOut
            };
            self.surfaces.apply_buffer(SurfaceTarget::Single(index), bbox, op);
        }
    }

    fn binarize_buffer(&mut self, rect: Rect, color: LabelColor) {
        if self.instance_mode {
            let count = self.instance_shade_count;
            let Some(label) = self.active_index().and_then(|i| self.labels.get_mut(i)) else {
                return;
            };
            let shades = label.ensure_shades(count).to_vec();
            binarize::binarize(self.surfaces.buffer_mut(), rect, Binarization::Instances(&shades));
        } else {
            binarize::binarize(self.surfaces.buffer_mut(), rect, Binarization::Flat(color));
        }
    }

    fn advance_instance(&mut self) {
        if !(self.instance_mode && self.increment_after_stroke) {
            return;
        }
        if let (Some(label), Some(next)) = (
            self.active_index(),
            self.labels.increment_active_instance(self.instance_shade_count),
        ) {
            self.events.emit(EngineEvent::InstanceAdvanced {
                label,
                instance: next.instance,
            });
        }
    }

    // ---- Refinement jobs ----------------------------------------------------------------

    fn draw_job(&self, bbox: Rect, color: LabelColor) -> Option<PostProcessJob> {
        let frame = self.surfaces.frame();
        let buffer = self.surfaces.buffer();
        let refine = &self.refine;
        let (op, mask, image, placement) = match self.post_process {
            PostProcessOption::Otsu | PostProcessOption::Crf => {
                let op = if self.post_process == PostProcessOption::Otsu {
                    RefineOp::Otsu {
                        opening: refine.otsu_opening,
                        inverse: refine.otsu_inverse,
                        kernel_size: refine.otsu_kernel_size,
                        connectedness: refine.otsu_connectedness,
                    }
                } else {
                    RefineOp::Crf {
                        spatial_weight: refine.crf_spatial_weight,
                        bilateral_weight: refine.crf_bilateral_weight,
                        iterations: refine.crf_iterations,
                    }
                };
                (
                    op,
                    raster::crop_bytes(buffer, bbox),
                    self.reference.as_ref().map(|r| raster::crop_bytes(r, bbox)),
                    Placement {
                        region: bbox,
                        clip: None,
                        target: self.active_target(),
                        merge: CompositeOp::DestinationOver,
                        color,
                    },
                )
            }
            PostProcessOption::SamLike => (
                RefineOp::SamLike {
                    threshold: refine.sam_threshold,
                    extract_features: false,
                },
                postprocess::coarse_mask(buffer),
                self.reference.as_ref().map(|r| r.as_raw().clone()),
                Placement {
                    region: frame,
                    clip: Some(bbox),
                    target: self.active_target(),
                    merge: CompositeOp::SourceOver,
                    color,
                },
            ),
        };
        Some(PostProcessJob {
            generation: self.generation,
            image_id: self.image_id,
            op,
            mask,
            image,
            placement,
        })
    }

    fn erase_job(&self) -> Option<PostProcessJob> {
        let frame = self.surfaces.frame();
        let label_input = if self.erase_all {
            self.surfaces.combine_visible(&self.labels)
        } else {
            self.surfaces.active_surface(&self.labels)?.clone()
        };
        Some(PostProcessJob {
            generation: self.generation,
            image_id: self.image_id,
            op: RefineOp::OverlapErase,
            mask: self.surfaces.buffer().as_raw().clone(),
            image: Some(label_input.into_raw()),
            placement: Placement {
                region: frame,
                clip: None,
                target: self.eraser_target(),
                merge: CompositeOp::DestinationOut,
                color: self.stroke_color,
            },
        })
    }
}
