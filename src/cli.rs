// ============================================================================
// maskforge CLI: headless replay of recorded annotation sessions
// ============================================================================
//
// Usage examples:
//   maskforge --image street.png --labels labels.json --strokes session.json --output-dir masks/
//   maskforge -i street.png -l labels.json -s session.json -o masks/ --composite --edges
//
// The reference image is loaded, the recorded steps are replayed through the
// draw engine, and one PNG per label is written together with the label
// metadata. No refinement service is reachable headless, so strokes are
// always committed directly.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use serde::Deserialize;

use crate::components::tools::Tool;
use crate::engine::DrawEngine;
use crate::geometry::Point2D;
use crate::io::{self, LabelRecord};
use crate::settings::EditorSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// maskforge headless annotation replay.
#[derive(Parser, Debug)]
#[command(
    name = "maskforge",
    about = "Replay recorded mask annotation strokes and export label masks",
    long_about = "Load a reference image and a label list, replay a JSON stroke script\n\
                  through the draw engine, and write one RGBA PNG mask per label.\n\n\
                  Example:\n  \
                  maskforge --image street.png --labels labels.json --strokes session.json --output-dir masks/"
)]
pub struct CliArgs {
    /// Reference image to annotate.
    #[arg(short, long, value_name = "IMAGE")]
    pub image: PathBuf,

    /// JSON array of labels: `[{"name": "road", "color": "#ff0000"}, ...]`.
    #[arg(short, long, value_name = "LABELS.json")]
    pub labels: PathBuf,

    /// JSON stroke script to replay. Without it the masks are written empty.
    #[arg(short, long, value_name = "STROKES.json")]
    pub strokes: Option<PathBuf>,

    /// Directory for the exported masks and label metadata.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Settings file to use instead of the one in the config directory.
    #[arg(long, value_name = "SETTINGS.toml")]
    pub settings: Option<PathBuf>,

    /// Also write the combined composite of all visible labels.
    #[arg(long)]
    pub composite: bool,

    /// Write the composite as label boundaries only (implies --composite).
    #[arg(long)]
    pub edges: bool,

    /// Print per-step progress.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Stroke script
// ============================================================================

/// One recorded step. Points are client coordinates; headless there is no
/// attached view, so they map 1:1 to image pixels unless the script zooms.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    SelectLabel { name: String },
    SelectInstance { instance: usize },
    Tool { tool: Tool },
    LineWidth { width: f32 },
    EraseAll { on: bool },
    SwapMarkers { on: bool },
    InstanceMode { on: bool },
    IncrementAfterStroke { on: bool },
    Stroke { points: Vec<Point2D> },
    Wheel { delta_y: f32, x: f32, y: f32, #[serde(default)] modifier: bool },
    Undo,
    Redo,
    Clear { label: String },
    RefreshColors,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StrokeScript {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl StrokeScript {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the replay and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match run_inner(&args) {
        Ok(written) => {
            if args.verbose {
                println!(
                    "wrote {} files to {} ({:.0}ms)",
                    written,
                    args.output_dir.display(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_inner(args: &CliArgs) -> Result<usize, String> {
    let mut settings = match &args.settings {
        Some(path) => EditorSettings::load_from(path),
        None => EditorSettings::load(),
    };
    settings.tools.auto_post_process = false;

    let reference = io::load_image(&args.image)
        .map_err(|e| format!("could not load '{}': {}", args.image.display(), e))?;
    let records = io::read_label_records(&args.labels)
        .map_err(|e| format!("could not read labels '{}': {}", args.labels.display(), e))?;
    if records.is_empty() {
        return Err(format!("'{}' defines no labels", args.labels.display()));
    }

    let script = match &args.strokes {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
            StrokeScript::from_json(&text).map_err(|e| format!("bad stroke script '{}': {}", path.display(), e))?
        }
        None => StrokeScript::default(),
    };

    let mut engine = DrawEngine::new(&settings);
    engine.set_labels(records.into_iter().map(LabelRecord::into_label).collect());
    engine.set_image(reference);

    for (idx, step) in script.steps.iter().enumerate() {
        if args.verbose {
            println!("[{}/{}] {:?}", idx + 1, script.steps.len(), step);
        }
        replay_step(&mut engine, step).map_err(|e| format!("step {}: {}", idx + 1, e))?;
    }

    std::fs::create_dir_all(&args.output_dir)
        .map_err(|e| format!("could not create '{}': {}", args.output_dir.display(), e))?;
    export(&mut engine, &args.output_dir, args.composite || args.edges, args.edges)
}

/// Apply one recorded step to the engine.
pub fn replay_step(engine: &mut DrawEngine, step: &Step) -> Result<(), String> {
    match step {
        Step::SelectLabel { name } => {
            engine
                .set_active_label(Some(name.as_str()))
                .ok_or_else(|| format!("unknown label '{}'", name))?;
        }
        Step::SelectInstance { instance } => {
            engine
                .set_active_instance(*instance)
                .ok_or_else(|| format!("no instance {} on the active label", instance))?;
        }
        Step::Tool { tool } => engine.set_tool(*tool),
        Step::LineWidth { width } => engine.set_line_width(*width),
        Step::EraseAll { on } => engine.set_erase_all(*on),
        Step::SwapMarkers { on } => engine.set_swap_markers(*on),
        Step::InstanceMode { on } => engine.set_instance_mode(*on),
        Step::IncrementAfterStroke { on } => engine.set_increment_after_stroke(*on),
        Step::Stroke { points } => {
            let Some((first, rest)) = points.split_first() else {
                return Ok(());
            };
            engine.pointer_down(*first).map_err(|e| e.to_string())?;
            for p in rest {
                engine.pointer_move(*p);
            }
            if engine.pointer_up().is_some() {
                log::warn!("stroke requested refinement, which is unavailable headless");
            }
        }
        Step::Wheel {
            delta_y,
            x,
            y,
            modifier,
        } => {
            engine.wheel(*delta_y, Point2D::new(*x, *y), *modifier);
            engine.viewport_mut().settle();
        }
        Step::Undo => {
            engine.undo().map_err(|e| e.to_string())?;
        }
        Step::Redo => {
            engine.redo().map_err(|e| e.to_string())?;
        }
        Step::Clear { label } => {
            let index = engine
                .labels()
                .index_of(label)
                .ok_or_else(|| format!("unknown label '{}'", label))?;
            engine.clear_label(index).map_err(|e| e.to_string())?;
        }
        Step::RefreshColors => engine.refresh_all_colors().map_err(|e| e.to_string())?,
    }
    Ok(())
}

/// Write `<label>.png` per label, `labels.json`, and optionally the composite.
/// Returns the number of files written.
fn export(engine: &mut DrawEngine, dir: &Path, composite: bool, edges: bool) -> Result<usize, String> {
    let saved = io::export_surfaces(engine.surfaces(), engine.labels()).map_err(|e| e.to_string())?;
    let mut written = 0;
    let mut records = Vec::with_capacity(saved.len());
    for (index, entry) in saved.into_iter().enumerate() {
        let path = dir.join(mask_file_name(index, &entry.record.name));
        std::fs::write(&path, &entry.blob).map_err(|e| format!("could not write '{}': {}", path.display(), e))?;
        records.push(entry.record);
        written += 1;
    }
    io::write_label_records(&dir.join("labels.json"), &records).map_err(|e| e.to_string())?;
    written += 1;

    if composite {
        engine.set_edges_only(edges);
        let image = engine
            .composite()
            .ok_or_else(|| "no composite available".to_string())?;
        let name = if edges { "edges.png" } else { "composite.png" };
        io::save_surface_png(image, &dir.join(name)).map_err(|e| e.to_string())?;
        written += 1;
    }
    log::info!("exported {} files to {}", written, dir.display());
    Ok(written)
}

/// `03_road.png`: index-prefixed so file order matches label order, with
/// anything outside `[A-Za-z0-9_-]` replaced.
fn mask_file_name(index: usize, label: &str) -> String {
    let safe: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{:02}_{}.png", index, safe)
}
