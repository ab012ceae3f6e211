//! JSON run configuration for the `qball-volume` binary.

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::{Interpolation, Orientation, SortBy};
use crate::filter::ReconstructionConfig;
use crate::gradients::{GradientDirection, GradientTable};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{channels} channel directories for {gradients} gradient entries")]
    ChannelCount { channels: usize, gradients: usize },
}

/// One gradient-table entry; a zero direction marks a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientEntry {
    pub direction: [f64; 3],
    pub b_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Slice index; the centre slice when absent.
    pub slice: Option<usize>,
    pub orientation: Orientation,
    pub interpolation: Interpolation,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            slice: None,
            orientation: Orientation::Axial,
            interpolation: Interpolation::Bilinear,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    #[serde(default)]
    pub write_gfa: bool,
    #[serde(default)]
    pub preview: Option<PreviewConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// One DICOM series directory per gradient entry, in table order.
    pub channels: Vec<PathBuf>,
    #[serde(default)]
    pub sort_by: SortBy,
    pub gradients: Vec<GradientEntry>,
    #[serde(default)]
    pub reconstruction: ReconstructionConfig,
    pub output: OutputConfig,
}

impl RunConfig {
    pub fn gradient_table(&self) -> GradientTable {
        GradientTable::new(self.gradients.iter().map(|g| {
            GradientDirection::new(Vector3::from(g.direction), g.b_value)
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.len() != self.gradients.len() {
            return Err(ConfigError::ChannelCount {
                channels: self.channels.len(),
                gradients: self.gradients.len(),
            });
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: RunConfig = serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}
