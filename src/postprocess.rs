//! # Post-processing
//!
//! Boundary with the external mask-refinement service. The engine packages a
//! finished stroke into a [`PostProcessJob`], the [`PostProcessGateway`] sends
//! it to a [`RefinementService`] and decodes the answer, and the engine merges
//! the result back with [`DrawEngine::apply_post_process`].
//!
//! Every job carries the stroke generation it was created for. A result that
//! comes back after a newer stroke has started is dropped by the engine.
//!
//! [`DrawEngine::apply_post_process`]: crate::engine::DrawEngine::apply_post_process

use std::sync::atomic::{AtomicU64, Ordering};

use image::{Rgba, RgbaImage};

use crate::canvas::SurfaceTarget;
use crate::error::GatewayError;
use crate::geometry::Rect;
use crate::labels::LabelColor;
use crate::ops::raster::CompositeOp;

/// Side of the square grid the quad-tree proposal runs on.
pub const QUAD_TREE_GRID: u32 = 256;

/// Refinement operation and its parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum RefineOp {
    Otsu {
        opening: bool,
        inverse: bool,
        kernel_size: u32,
        connectedness: bool,
    },
    Crf {
        spatial_weight: f32,
        bilateral_weight: f32,
        iterations: u32,
    },
    /// Promptable segmentation from a coarse boolean mask. `extract_features`
    /// is set by the gateway, not by callers.
    SamLike { threshold: u8, extract_features: bool },
    /// Pixels of the label input that overlap the eraser mask.
    OverlapErase,
}

impl RefineOp {
    /// Command name understood by the refinement service.
    pub fn name(&self) -> &'static str {
        match self {
            RefineOp::Otsu { .. } => "otsu_segmentation",
            RefineOp::Crf { .. } => "crf_refine",
            RefineOp::SamLike { .. } => "mask_sam_segment",
            RefineOp::OverlapErase => "get_overlapping_region_with_mask",
        }
    }
}

/// One request on the wire.
///
/// `mask` is RGBA, except for [`RefineOp::SamLike`] where it is one 0/1 byte per
/// pixel. `image` is the RGBA reference crop, or for [`RefineOp::OverlapErase`]
/// the RGBA label input; it is empty when the service already holds the
/// features it needs.
#[derive(Clone, Debug)]
pub struct RefineRequest {
    pub op: RefineOp,
    pub mask: Vec<u8>,
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug)]
pub struct QuadTreeRequest {
    /// Full-frame RGBA mask.
    pub mask: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub grid_width: u32,
    pub grid_height: u32,
    pub max_depth: u32,
    pub min_size: u32,
}

/// Region proposed by the quad tree, in image pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionProposal {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// The native refinement backend.
///
/// `refine` answers with either one byte per pixel (a mask) or four (RGBA) for
/// the requested `width × height`.
#[async_trait::async_trait]
pub trait RefinementService: Send + Sync {
    async fn refine(&self, request: RefineRequest) -> Result<Vec<u8>, GatewayError>;

    /// Boxes as `[xmin, ymin, xmax, ymax]` on the request grid.
    async fn quad_tree_boxes(&self, request: QuadTreeRequest) -> Result<Vec<[u32; 4]>, GatewayError>;
}

/// Where and how a refined mask goes back into the surfaces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    /// Frame region the request covered; the response has this size.
    pub region: Rect,
    /// Result pixels outside this rect are dropped before merging.
    pub clip: Option<Rect>,
    pub target: SurfaceTarget,
    pub merge: CompositeOp,
    /// Colour used for one-byte-per-pixel responses.
    pub color: LabelColor,
}

/// A stroke handed over for refinement.
#[derive(Clone, Debug)]
pub struct PostProcessJob {
    pub generation: u64,
    /// Identifies the reference image; features are extracted once per image.
    pub image_id: u64,
    pub op: RefineOp,
    pub mask: Vec<u8>,
    /// Reference or label pixels; `None` if no reference image is loaded.
    pub image: Option<Vec<u8>>,
    pub placement: Placement,
}

/// A finished refinement, ready for [`DrawEngine::apply_post_process`].
///
/// [`DrawEngine::apply_post_process`]: crate::engine::DrawEngine::apply_post_process
#[derive(Debug)]
pub struct PostProcessResult {
    pub generation: u64,
    pub placement: Placement,
    /// Region-sized RGBA result.
    pub outcome: Result<RgbaImage, GatewayError>,
}

/// What happened to a result handed back to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostProcessOutcome {
    Applied,
    /// A newer stroke started while this one was refining.
    Stale,
}

/// Thin stateful wrapper around a [`RefinementService`].
///
/// Its only state is which image the service last extracted features for;
/// `0` means none.
pub struct PostProcessGateway {
    service: Box<dyn RefinementService>,
    features_image: AtomicU64,
}

impl PostProcessGateway {
    pub fn new(service: Box<dyn RefinementService>) -> Self {
        Self {
            service,
            features_image: AtomicU64::new(0),
        }
    }

    /// Forget cached features so the next SAM-like call resends the image.
    pub fn reset_features(&self) {
        self.features_image.store(0, Ordering::SeqCst);
    }

    pub fn features_extracted(&self, image_id: u64) -> bool {
        image_id != 0 && self.features_image.load(Ordering::SeqCst) == image_id
    }

    /// Send a job to the service and decode the answer. Never panics on bad
    /// input; failures end up in [`PostProcessResult::outcome`].
    pub async fn run(&self, job: PostProcessJob) -> PostProcessResult {
        let PostProcessJob {
            generation,
            image_id,
            op,
            mask,
            image,
            placement,
        } = job;
        let outcome = self.refine(image_id, op, mask, image, placement).await;
        if let Err(e) = &outcome {
            log::warn!("refinement for stroke {} failed: {}", generation, e);
        }
        PostProcessResult {
            generation,
            placement,
            outcome,
        }
    }

    async fn refine(
        &self,
        image_id: u64,
        op: RefineOp,
        mask: Vec<u8>,
        image: Option<Vec<u8>>,
        placement: Placement,
    ) -> Result<RgbaImage, GatewayError> {
        let Rect { width, height, .. } = placement.region;
        let (op, image) = match op {
            RefineOp::SamLike { threshold, .. } => {
                if self.features_extracted(image_id) {
                    (
                        RefineOp::SamLike {
                            threshold,
                            extract_features: false,
                        },
                        Vec::new(),
                    )
                } else {
                    (
                        RefineOp::SamLike {
                            threshold,
                            extract_features: true,
                        },
                        image.ok_or(GatewayError::NoReferenceImage)?,
                    )
                }
            }
            other => (other, image.ok_or(GatewayError::NoReferenceImage)?),
        };
        let name = op.name();
        let sam = matches!(op, RefineOp::SamLike { .. });
        log::debug!("{} on {}x{} region", name, width, height);

        let bytes = self
            .service
            .refine(RefineRequest {
                op,
                mask,
                image,
                width,
                height,
            })
            .await?;
        if sam {
            self.features_image.store(image_id, Ordering::SeqCst);
        }
        decode_response(name, &bytes, width, height, placement.color)
    }

    /// Run the quad-tree proposal on a full-frame mask and map the boxes back
    /// to image pixels.
    pub async fn propose_regions(
        &self,
        mask: Vec<u8>,
        width: u32,
        height: u32,
        min_size: u32,
        max_depth: u32,
    ) -> Result<Vec<RegionProposal>, GatewayError> {
        let boxes = self
            .service
            .quad_tree_boxes(QuadTreeRequest {
                mask,
                width,
                height,
                grid_width: QUAD_TREE_GRID,
                grid_height: QUAD_TREE_GRID,
                max_depth,
                min_size,
            })
            .await?;
        let sx = width as f32 / QUAD_TREE_GRID as f32;
        let sy = height as f32 / QUAD_TREE_GRID as f32;
        Ok(boxes
            .into_iter()
            .map(|[x0, y0, x1, y1]| RegionProposal {
                x: sx * x0 as f32,
                y: sy * y0 as f32,
                width: sx * x1.saturating_sub(x0) as f32,
                height: sy * y1.saturating_sub(y0) as f32,
            })
            .collect())
    }
}

/// Turn a service response into a `width × height` RGBA image.
///
/// One byte per pixel is a mask: non-zero becomes `color` at full alpha.
pub fn decode_response(
    op: &'static str,
    bytes: &[u8],
    width: u32,
    height: u32,
    color: LabelColor,
) -> Result<RgbaImage, GatewayError> {
    let pixels = width as usize * height as usize;
    if bytes.len() == pixels * 4 {
        return RgbaImage::from_raw(width, height, bytes.to_vec()).ok_or(GatewayError::MalformedResponse {
            op,
            expected: pixels * 4,
            actual: bytes.len(),
        });
    }
    if bytes.len() == pixels {
        let fg = color.rgba();
        let mut out = RgbaImage::new(width, height);
        for (px, &v) in out.pixels_mut().zip(bytes) {
            if v > 0 {
                *px = fg;
            }
        }
        return Ok(out);
    }
    Err(GatewayError::MalformedResponse {
        op,
        expected: pixels * 4,
        actual: bytes.len(),
    })
}

/// Coarse boolean mask: 1 where any colour channel is set.
pub fn coarse_mask(rgba: &RgbaImage) -> Vec<u8> {
    rgba.pixels()
        .map(|Rgba([r, g, b, _])| u8::from(*r > 0 || *g > 0 || *b > 0))
        .collect()
}
