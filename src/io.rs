use image::codecs::png::PngEncoder;
use image::{ImageEncoder, ImageError, ImageFormat, RgbaImage};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::canvas::LabelSurfaceManager;
use crate::error::PersistenceError;
use crate::labels::{Label, LabelColor, LabelSet};

// ============================================================================
// SURFACE BLOBS
// ============================================================================

/// Encode one surface as a PNG blob. Undo snapshots and saved annotations use
/// the same encoding.
pub fn encode_surface(image: &RgbaImage) -> Result<Vec<u8>, PersistenceError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ColorType::Rgba8,
        )
        .map_err(PersistenceError::Encode)?;
    Ok(bytes)
}

/// Decode a PNG blob into an RGBA surface.
pub fn decode_surface(bytes: &[u8]) -> Result<RgbaImage, ImageError> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_rgba8())
}

/// Load the reference image an annotation session works on.
pub fn load_image(path: &Path) -> Result<RgbaImage, ImageError> {
    Ok(image::open(path)?.to_rgba8())
}

/// Write a surface as a PNG file.
pub fn save_surface_png(image: &RgbaImage, path: &Path) -> Result<(), PersistenceError> {
    let file = File::create(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    PngEncoder::new(&mut writer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ColorType::Rgba8,
        )
        .map_err(PersistenceError::Encode)
}

// ============================================================================
// LABEL METADATA
// ============================================================================

/// Metadata stored next to each surface blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub name: String,
    pub color: LabelColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_shades: Option<Vec<LabelColor>>,
}

impl From<&Label> for LabelRecord {
    fn from(label: &Label) -> Self {
        Self {
            name: label.name.clone(),
            color: label.color,
            instance_shades: label.instance_shades.clone(),
        }
    }
}

impl LabelRecord {
    pub fn into_label(self) -> Label {
        let mut label = Label::new(self.name, self.color);
        label.instance_shades = self.instance_shades;
        label
    }
}

/// One saved label: metadata plus encoded surface.
#[derive(Clone, Debug)]
pub struct SavedSurface {
    pub record: LabelRecord,
    pub blob: Vec<u8>,
}

/// Encode every surface with its label metadata, in label order.
pub fn export_surfaces(
    surfaces: &LabelSurfaceManager,
    labels: &LabelSet,
) -> Result<Vec<SavedSurface>, PersistenceError> {
    if surfaces.len() != labels.len() {
        return Err(PersistenceError::CountMismatch {
            blobs: surfaces.len(),
            labels: labels.len(),
        });
    }
    labels
        .iter()
        .zip(surfaces.surfaces())
        .map(|(label, surface)| {
            Ok(SavedSurface {
                record: LabelRecord::from(label),
                blob: encode_surface(surface)?,
            })
        })
        .collect()
}

/// Read a JSON array of label records.
pub fn read_label_records(path: &Path) -> Result<Vec<LabelRecord>, PersistenceError> {
    let file = File::open(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Write a JSON array of label records.
pub fn write_label_records(path: &Path, records: &[LabelRecord]) -> Result<(), PersistenceError> {
    let file = File::create(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), records)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn png_blob_preserves_pixels() {
        let mut img = RgbaImage::new(5, 3);
        img.put_pixel(1, 2, Rgba([9, 8, 7, 255]));
        img.put_pixel(4, 0, Rgba([1, 2, 3, 128]));
        let blob = encode_surface(&img).unwrap();
        assert_eq!(&blob[1..4], b"PNG");
        assert_eq!(decode_surface(&blob).unwrap(), img);
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(decode_surface(b"not a png").is_err());
    }

    #[test]
    fn record_json_shape() {
        let record: LabelRecord =
            serde_json::from_str(r##"{"name":"road","color":"#00ff00"}"##).unwrap();
        assert_eq!(record.color, LabelColor([0, 255, 0]));
        assert!(record.instance_shades.is_none());
        let label = record.clone().into_label();
        assert!(label.visible);
        assert_eq!(LabelRecord::from(&label), record);
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r##"{"name":"road","color":"#00ff00"}"##
        );
    }
}
