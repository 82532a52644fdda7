//! Error taxonomy for the annotation core.
//!
//! Precondition misses (drawing with no active label, re-entrant strokes) are
//! not errors and never reach these types; they are silent no-ops.

use std::path::PathBuf;

/// Failures reported by the draw engine to its caller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Instance mode is on but no instance has been selected yet.
    /// Indicates the caller allowed a stroke before picking an instance.
    #[error("instance segmentation is active but no instance is selected")]
    NoActiveInstance,
    /// A label colour string could not be parsed.
    #[error("invalid colour {0:?}, expected #rrggbb")]
    InvalidColor(String),
    /// Index does not address an existing label surface.
    #[error("label index {index} out of range ({len} labels)")]
    LabelOutOfRange { index: usize, len: usize },
    /// The refinement service failed; the staged stroke was discarded.
    #[error("post-processing failed: {0}")]
    PostProcess(#[from] GatewayError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Failures at the boundary with the external refinement service.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The service rejected or failed the request.
    #[error("refinement service rejected {op}: {reason}")]
    Rejected { op: &'static str, reason: String },
    /// The service answered with a buffer that does not match the request.
    #[error("malformed response for {op}: expected {expected} bytes, got {actual}")]
    MalformedResponse {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A stroke needs the reference image but none was loaded.
    #[error("no reference image loaded")]
    NoReferenceImage,
}

/// Failures while encoding or decoding label surfaces.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("could not decode surface {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: image::ImageError,
    },
    #[error("could not encode surface: {0}")]
    Encode(#[source] image::ImageError),
    #[error("surface {index} is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    SizeMismatch {
        index: usize,
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
    #[error("{blobs} blobs for {labels} labels")]
    CountMismatch { blobs: usize, labels: usize },
    #[error("label metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while persisting settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}
