//! Raw volume export: little-endian `f32` voxel data plus a JSON sidecar
//! describing shape, geometry and (for ODFs) the sampling directions. Slice
//! previews are saved through `image`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::preview::PreviewImage;
use crate::volume::{ImageGeometry, OdfVolume, ScalarVolume};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSidecar {
    /// Array shape in memory order, slowest axis first.
    pub shape: Vec<usize>,
    pub geometry: ImageGeometry,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directions: Vec<[f64; 3]>,
}

/// Paths written for one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub raw: PathBuf,
    pub sidecar: PathBuf,
}

fn write_raw(
    stem: &Path,
    values: &[f32],
    sidecar: &RawSidecar,
) -> Result<ExportedFiles, ExportError> {
    let raw = stem.with_extension("raw");
    let json = stem.with_extension("json");
    let bytes: Vec<u8> = if cfg!(target_endian = "little") {
        bytemuck::cast_slice::<f32, u8>(values).to_vec()
    } else {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    };
    fs::write(&raw, bytes)?;
    fs::write(&json, serde_json::to_string_pretty(sidecar)?)?;
    Ok(ExportedFiles { raw, sidecar: json })
}

pub fn write_scalar_volume(stem: &Path, volume: &ScalarVolume) -> Result<ExportedFiles, ExportError> {
    let (d, h, w) = volume.dim();
    let data = volume.data().as_standard_layout();
    let values: Vec<f32> = data.iter().copied().collect();
    write_raw(
        stem,
        &values,
        &RawSidecar {
            shape: vec![d, h, w],
            geometry: *volume.geometry(),
            directions: Vec::new(),
        },
    )
}

pub fn write_odf_volume(stem: &Path, volume: &OdfVolume) -> Result<ExportedFiles, ExportError> {
    let (d, h, w, n) = volume.dim();
    let data = volume.data().as_standard_layout();
    let values: Vec<f32> = data.iter().copied().collect();
    write_raw(
        stem,
        &values,
        &RawSidecar {
            shape: vec![d, h, w, n],
            geometry: *volume.geometry(),
            directions: volume.directions().iter().map(|v| [v.x, v.y, v.z]).collect(),
        },
    )
}

/// Save a slice preview; the format follows the extension of `path`.
pub fn write_preview(path: &Path, image: &PreviewImage) -> Result<(), ExportError> {
    image.save(path)?;
    Ok(())
}

/// Read back a volume written by this module.
pub fn read_raw(stem: &Path) -> Result<(Vec<f32>, RawSidecar), ExportError> {
    let sidecar: RawSidecar = serde_json::from_str(&fs::read_to_string(stem.with_extension("json"))?)?;
    let bytes = fs::read(stem.with_extension("raw"))?;
    let values = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((values, sidecar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn scalar_volume_round_trip_through_disk() {
        let dir = std::env::temp_dir().join(format!("qball-export-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let geometry = ImageGeometry {
            spacing: (2.0, 2.0, 2.0),
            origin: [1.0, 2.0, 3.0],
            ..Default::default()
        };
        let volume = ScalarVolume::new(
            Array3::from_shape_fn((2, 2, 3), |(z, y, x)| (z * 6 + y * 3 + x) as f32 * 0.5),
            geometry,
        );
        let files = write_scalar_volume(&dir.join("baseline"), &volume).unwrap();
        assert!(files.raw.ends_with("baseline.raw"));

        let (values, sidecar) = read_raw(&dir.join("baseline")).unwrap();
        assert_eq!(sidecar.shape, vec![2, 2, 3]);
        assert_eq!(sidecar.geometry, geometry);
        assert!(sidecar.directions.is_empty());
        assert_eq!(values, volume.data().iter().copied().collect::<Vec<_>>());
        fs::remove_dir_all(&dir).ok();
    }
}
