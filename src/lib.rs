//! Interactive raster-mask annotation engine.
//!
//! A [`DrawEngine`](engine::DrawEngine) owns one RGBA surface per label and
//! turns pointer input into pen, eraser and lasso strokes on them, with
//! snapshot undo/redo, zoom/pan, and optional refinement through an external
//! [`RefinementService`](postprocess::RefinementService).

pub mod canvas;
pub mod cli;
pub mod components;
pub mod engine;
pub mod error;
pub mod events;
pub mod geometry;
pub mod io;
pub mod labels;
pub mod logger;
pub mod ops;
pub mod postprocess;
pub mod settings;
pub mod viewport;
