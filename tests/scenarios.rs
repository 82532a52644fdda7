//! End-to-end annotation sessions driven through the public engine API.

use std::sync::{Arc, Mutex};

use image::{Rgba, RgbaImage};
use maskforge::components::history::EntryTarget;
use maskforge::components::tools::Tool;
use maskforge::engine::DrawEngine;
use maskforge::error::{EngineError, GatewayError};
use maskforge::events::EngineEvent;
use maskforge::geometry::{Point2D, Rect};
use maskforge::labels::{Label, LabelColor};
use maskforge::ops::binarize::{self, Binarization};
use maskforge::ops::raster::{self, CompositeOp};
use maskforge::postprocess::{
    PostProcessGateway, PostProcessOutcome, QuadTreeRequest, RefineOp, RefineRequest, RefinementService,
};
use maskforge::settings::{EditorSettings, PostProcessOption};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

fn engine() -> DrawEngine {
    let mut settings = EditorSettings::default();
    settings.brush.line_width = 4.0;
    let mut engine = DrawEngine::new(&settings);
    engine.set_labels(vec![
        Label::new("road", LabelColor([255, 0, 0])),
        Label::new("sky", LabelColor([0, 0, 255])),
    ]);
    engine.set_image(RgbaImage::from_pixel(100, 100, Rgba([90, 90, 90, 255])));
    engine
}

fn stroke(engine: &mut DrawEngine, points: &[(f32, f32)]) {
    engine.start_draw().unwrap();
    for &(x, y) in points {
        engine.draw(Point2D::new(x, y));
    }
    assert!(engine.end_draw().is_none());
}

fn painted(img: &RgbaImage) -> usize {
    img.pixels().filter(|p| p[3] != 0).count()
}

#[derive(Clone, Copy)]
enum Reply {
    /// One foreground byte for every requested pixel.
    AllForeground,
    /// Echo the request mask back.
    EchoMask,
    Fail,
}

struct Canned {
    reply: Reply,
    seen: Arc<Mutex<Vec<RefineRequest>>>,
}

#[async_trait::async_trait]
impl RefinementService for Canned {
    async fn refine(&self, request: RefineRequest) -> Result<Vec<u8>, GatewayError> {
        let op = request.op.name();
        let pixels = request.width as usize * request.height as usize;
        let mask = request.mask.clone();
        self.seen.lock().unwrap().push(request);
        match self.reply {
            Reply::AllForeground => Ok(vec![1; pixels]),
            Reply::EchoMask => Ok(mask),
            Reply::Fail => Err(GatewayError::Rejected {
                op,
                reason: "model not loaded".into(),
            }),
        }
    }

    async fn quad_tree_boxes(&self, _request: QuadTreeRequest) -> Result<Vec<[u32; 4]>, GatewayError> {
        Ok(vec![[0, 0, 64, 128]])
    }
}

fn gateway(reply: Reply) -> (PostProcessGateway, Arc<Mutex<Vec<RefineRequest>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let service = Canned {
        reply,
        seen: Arc::clone(&seen),
    };
    (PostProcessGateway::new(Box::new(service)), seen)
}

#[test]
fn pen_segment_lands_on_active_label_with_one_undo_entry() {
    let mut engine = engine();
    stroke(&mut engine, &[(10.0, 10.0), (20.0, 10.0)]);

    assert_eq!(engine.history().undo_len(), 1);
    assert_eq!(engine.history().peek_undo().unwrap().target(), EntryTarget::Label(0));

    let road = engine.surfaces().surface(0).unwrap();
    assert_eq!(*road.get_pixel(15, 10), RED);
    assert_eq!(road.get_pixel(15, 30)[3], 0);
    assert_eq!(painted(engine.surfaces().surface(1).unwrap()), 0);
    assert_eq!(painted(engine.surfaces().buffer()), 0);

    let composite = engine.composite().unwrap();
    assert_eq!(*composite.get_pixel(15, 10), RED);
}

#[test]
fn erase_all_snapshots_and_clears_every_label() {
    let mut engine = engine();
    let frame = Rect::full(100, 100);
    raster::fill_rect(engine.surfaces_mut().surface_mut(0).unwrap(), frame, RED, CompositeOp::Copy);
    raster::fill_rect(engine.surfaces_mut().surface_mut(1).unwrap(), frame, BLUE, CompositeOp::Copy);

    engine.set_tool(Tool::Eraser);
    engine.set_erase_all(true);
    stroke(&mut engine, &[(50.0, 50.0), (60.0, 50.0)]);

    let entry = engine.history().peek_undo().unwrap();
    assert_eq!(entry.target(), EntryTarget::AllLabels);
    assert_eq!(entry.len(), 2);
    for index in 0..2 {
        let surface = engine.surfaces().surface(index).unwrap();
        assert_eq!(surface.get_pixel(55, 50)[3], 0);
        assert_eq!(surface.get_pixel(55, 80)[3], 255);
    }

    assert!(engine.undo().unwrap());
    assert_eq!(*engine.surfaces().surface(0).unwrap().get_pixel(55, 50), RED);
    assert_eq!(*engine.surfaces().surface(1).unwrap().get_pixel(55, 50), BLUE);
}

#[test]
fn wheel_zoom_keeps_cursor_pixel_fixed() {
    let mut engine = engine();
    let cursor = Point2D::new(50.0, 30.0);
    let before = engine.viewport().to_image_coordinates(cursor);

    engine.wheel(-1.0, cursor, false);
    engine.viewport_mut().settle();

    assert!(engine.viewport().scale() > 1.0);
    assert!(engine.viewport().is_converged());
    assert_eq!(engine.viewport().to_image_coordinates(cursor), before);
}

#[test]
fn undo_then_redo_is_exact() {
    let mut engine = engine();
    stroke(&mut engine, &[(10.0, 10.0), (40.0, 40.0)]);
    let after = engine.surfaces().surface(0).unwrap().clone();

    assert!(engine.undo().unwrap());
    assert_eq!(painted(engine.surfaces().surface(0).unwrap()), 0);
    assert!(engine.redo().unwrap());
    assert_eq!(engine.surfaces().surface(0).unwrap(), &after);
    assert!(!engine.redo().unwrap());
}

#[test]
fn new_stroke_discards_redo() {
    let mut engine = engine();
    stroke(&mut engine, &[(10.0, 10.0)]);
    engine.undo().unwrap();
    assert!(engine.history().can_redo());

    stroke(&mut engine, &[(30.0, 30.0)]);
    assert!(!engine.history().can_redo());
    assert_eq!(engine.history().undo_len(), 1);
}

#[test]
fn hidden_label_is_left_out_of_composite() {
    let mut engine = engine();
    stroke(&mut engine, &[(10.0, 10.0), (20.0, 10.0)]);
    engine.set_label_visible(0, false).unwrap();
    assert_eq!(engine.composite().unwrap().get_pixel(15, 10)[3], 0);
    engine.set_label_visible(0, true).unwrap();
    assert_eq!(*engine.composite().unwrap().get_pixel(15, 10), RED);
}

#[test]
fn binarize_twice_changes_nothing() {
    let mut img = RgbaImage::new(8, 8);
    img.put_pixel(1, 1, Rgba([200, 10, 10, 200]));
    img.put_pixel(2, 2, Rgba([200, 10, 10, 40]));
    let rect = Rect::full(8, 8);
    let red = LabelColor([255, 0, 0]);

    binarize::binarize(&mut img, rect, Binarization::Flat(red));
    let once = img.clone();
    binarize::binarize(&mut img, rect, Binarization::Flat(red));
    assert_eq!(img, once);
    assert_eq!(*img.get_pixel(1, 1), RED);
    assert_eq!(img.get_pixel(2, 2)[3], 0);
}

#[test]
fn lasso_below_three_points_leaves_surfaces_alone() {
    let mut engine = engine();
    engine.set_tool(Tool::Lasso);
    stroke(&mut engine, &[(10.0, 10.0), (50.0, 50.0)]);
    assert_eq!(painted(engine.surfaces().surface(0).unwrap()), 0);
    assert!(engine.lasso_points().is_empty());
    assert!(engine.path_overlay().is_empty());
}

#[test]
fn refinement_failure_keeps_surfaces_intact() {
    let mut engine = engine();
    raster::fill_rect(
        engine.surfaces_mut().surface_mut(0).unwrap(),
        Rect::new(0, 0, 10, 10),
        RED,
        CompositeOp::Copy,
    );
    let before = engine.surfaces().surface(0).unwrap().clone();
    engine.set_auto_post_process(true);
    let (gateway, _) = gateway(Reply::Fail);
    let events = engine.events();

    engine.start_draw().unwrap();
    engine.draw(Point2D::new(40.0, 40.0));
    engine.draw(Point2D::new(60.0, 40.0));
    let _ = events.try_iter().count();

    let err = pollster::block_on(engine.end_draw_with(&gateway)).unwrap_err();
    assert!(matches!(err, EngineError::PostProcess(GatewayError::Rejected { .. })));
    assert_eq!(engine.surfaces().surface(0).unwrap(), &before);
    assert_eq!(painted(engine.surfaces().buffer()), 0);

    let seen: Vec<_> = events.try_iter().collect();
    assert!(seen.contains(&EngineEvent::RedrawRequested));
    assert!(seen.iter().any(|e| matches!(e, EngineEvent::PostProcessFailed(_))));
}

#[test]
fn result_for_older_stroke_is_dropped() {
    let mut engine = engine();
    engine.set_auto_post_process(true);
    let (gateway, _) = gateway(Reply::AllForeground);

    engine.start_draw().unwrap();
    engine.draw(Point2D::new(10.0, 10.0));
    let job = engine.end_draw().unwrap();

    // A new stroke starts before the refinement returns.
    engine.start_draw().unwrap();
    let result = pollster::block_on(gateway.run(job));
    assert_eq!(engine.apply_post_process(result).unwrap(), PostProcessOutcome::Stale);
    assert_eq!(painted(engine.surfaces().surface(0).unwrap()), 0);
}

#[test]
fn otsu_refinement_fills_stroke_region() {
    let mut engine = engine();
    engine.set_auto_post_process(true);
    let (gateway, seen) = gateway(Reply::AllForeground);

    engine.start_draw().unwrap();
    engine.draw(Point2D::new(20.0, 20.0));
    engine.draw(Point2D::new(30.0, 20.0));
    let outcome = pollster::block_on(engine.end_draw_with(&gateway)).unwrap();
    assert_eq!(outcome, Some(PostProcessOutcome::Applied));

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(matches!(requests[0].op, RefineOp::Otsu { .. }));
    assert_eq!(requests[0].image.len(), requests[0].mask.len());

    let road = engine.surfaces().surface(0).unwrap();
    // Corner of the padded stroke box, outside the brush footprint itself.
    assert_eq!(*road.get_pixel(16, 16), RED);
    assert_eq!(road.get_pixel(16, 40)[3], 0);
}

#[test]
fn sam_sends_reference_only_once_per_image() {
    let mut engine = engine();
    engine.set_auto_post_process(true);
    engine.set_post_process(PostProcessOption::SamLike);
    let (gateway, seen) = gateway(Reply::EchoMask);

    for x in [20.0, 60.0] {
        engine.start_draw().unwrap();
        engine.draw(Point2D::new(x, 50.0));
        pollster::block_on(engine.end_draw_with(&gateway)).unwrap();
    }

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(matches!(requests[0].op, RefineOp::SamLike { extract_features: true, .. }));
    assert_eq!(requests[0].image.len(), 100 * 100 * 4);
    assert!(matches!(requests[1].op, RefineOp::SamLike { extract_features: false, .. }));
    assert!(requests[1].image.is_empty());
    assert_eq!(*engine.surfaces().surface(0).unwrap().get_pixel(60, 50), RED);
}

#[test]
fn eraser_refinement_removes_overlap() {
    let mut engine = engine();
    raster::fill_rect(
        engine.surfaces_mut().surface_mut(0).unwrap(),
        Rect::full(100, 100),
        RED,
        CompositeOp::Copy,
    );
    engine.set_auto_post_process(true);
    engine.set_tool(Tool::Eraser);
    let (gateway, seen) = gateway(Reply::EchoMask);

    engine.start_draw().unwrap();
    engine.draw(Point2D::new(50.0, 50.0));
    // Deferred: nothing erased yet.
    assert_eq!(*engine.surfaces().surface(0).unwrap().get_pixel(50, 50), RED);
    assert_eq!(engine.path_overlay().len(), 1);
    pollster::block_on(engine.end_draw_with(&gateway)).unwrap();

    assert_eq!(seen.lock().unwrap()[0].op, RefineOp::OverlapErase);
    let road = engine.surfaces().surface(0).unwrap();
    assert_eq!(road.get_pixel(50, 50)[3], 0);
    assert_eq!(*road.get_pixel(10, 10), RED);
    assert!(engine.path_overlay().is_empty());
}

#[test]
fn region_proposals_are_scaled_to_image() {
    let engine = engine();
    let (gateway, _) = gateway(Reply::Fail);
    let boxes = pollster::block_on(engine.propose_regions(&gateway, 4, 3)).unwrap();
    assert_eq!(boxes.len(), 1);
    assert!((boxes[0].width - 25.0).abs() < 1e-3);
    assert!((boxes[0].height - 50.0).abs() < 1e-3);
}

#[test]
fn pan_tool_drags_the_view_without_history() {
    let mut engine = engine();
    engine.set_tool(Tool::Pan);
    engine.pointer_down(Point2D::new(10.0, 10.0)).unwrap();
    engine.pointer_move(Point2D::new(25.0, 5.0));
    assert!(engine.pointer_up().is_none());
    assert_eq!(engine.viewport().offset(), Point2D::new(15.0, -5.0));
    assert_eq!(engine.history().undo_len(), 0);
}
