//! Reconstruction filter: one single-threaded setup phase, then a
//! region-parallel pass over the volume.
//!
//! [`QBallReconstructionFilter::prepare`] classifies the gradient table and
//! builds the [`ReconstructionMatrices`]; every configuration error surfaces
//! there. [`PreparedReconstruction::run`] then splits the flattened voxel
//! index space into contiguous regions and reconstructs them on the rayon
//! pool. Regions share only read-only state and write disjoint output
//! slices, so the result does not depend on the region count.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::enums::ReconstructionMode;
use crate::error::ReconstructionError;
use crate::gradients::{Classification, GradientTable, ShellMap, ShellSampling, classify};
use crate::matrices::{MatrixParams, ReconstructionMatrices};
use crate::single_shell::SingleShellReconstructor;
use crate::three_shell::ThreeShellReconstructor;
use crate::volume::{DwiVolume, OdfVolume, ScalarVolume};

/// Per-voxel reconstruction algorithm.
///
/// `reconstruct` writes the ODF amplitudes of one voxel into `odf` and
/// returns the averaged baseline. The workspace is owned by a single region.
pub trait VoxelReconstructor: Sync {
    type Workspace: Send;

    fn workspace(&self) -> Self::Workspace;

    fn reconstruct(&self, voxel: &[f32], ws: &mut Self::Workspace, odf: &mut [f32]) -> f64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Even spherical harmonic order `L`.
    pub order: usize,
    /// Number of canonical ODF directions `N`.
    pub odf_directions: usize,
    /// Laplace-Beltrami regularization weight.
    pub lambda: f64,
    /// Voxels whose averaged baseline is below this value are left empty.
    pub threshold: f64,
    /// Explicit shell assignment; derived from the table when absent.
    pub shells: Option<BTreeMap<u32, Vec<usize>>>,
    /// Number of regions; defaults to the size of the rayon pool.
    pub regions: Option<usize>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            order: 4,
            odf_directions: 252,
            lambda: 0.0,
            threshold: f64::MIN,
            shells: None,
            regions: None,
        }
    }
}

impl ReconstructionConfig {
    fn matrix_params(&self) -> MatrixParams {
        MatrixParams {
            order: self.order,
            odf_directions: self.odf_directions,
            lambda: self.lambda,
        }
    }
}

pub struct ReconstructionOutput {
    pub odf: OdfVolume,
    pub baseline: ScalarVolume,
}

pub struct QBallReconstructionFilter {
    table: GradientTable,
    config: ReconstructionConfig,
}

impl QBallReconstructionFilter {
    pub fn new(table: GradientTable, config: ReconstructionConfig) -> Self {
        Self { table, config }
    }

    pub fn table(&self) -> &GradientTable {
        &self.table
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Setup phase for an input with `channels` components.
    ///
    /// # Errors
    ///
    /// Any configuration error of the table, the shell map or the matrix
    /// construction, and `UnsupportedMode` for shell layouts without an
    /// analytical solution.
    pub fn prepare(&self, channels: usize) -> Result<PreparedReconstruction, ReconstructionError> {
        let start = Instant::now();
        let explicit = self.config.shells.clone().map(ShellMap::from_shells);
        let classification = classify(&self.table, explicit.as_ref(), self.config.order, channels)?;

        if classification.mode == ReconstructionMode::NumericalMultiShell {
            return Err(ReconstructionError::UnsupportedMode {
                shells: classification.shell_map.gradient_shells().count(),
                b_values: classification.shell_map.b_values(),
            });
        }

        let samplings = classification.samplings(&self.table);
        let primary = samplings.first().ok_or(ReconstructionError::InsufficientDirections {
            order: self.config.order,
            required: crate::sphere::coefficient_count(self.config.order),
            available: 0,
        })?;
        let mut matrices = ReconstructionMatrices::build(&primary.directions, self.config.matrix_params())?;
        if classification.mode == ReconstructionMode::AnalyticalThreeShell {
            let extra: Vec<&[_]> = samplings[1..].iter().map(|s| s.directions.as_slice()).collect();
            matrices = matrices.with_resampled_shells(&extra)?;
        }

        info!(
            "Reconstruction setup ({:?}, {} shells) in {:.3} ms",
            classification.mode,
            samplings.len(),
            start.elapsed().as_secs_f64() * 1e3
        );

        Ok(PreparedReconstruction {
            classification,
            samplings,
            matrices: Arc::new(matrices),
            threshold: self.config.threshold,
            regions: self.config.regions,
        })
    }

    /// Prepare for `input` and reconstruct it.
    pub fn run(&self, input: &DwiVolume) -> Result<ReconstructionOutput, ReconstructionError> {
        self.prepare(input.channels())?.run(input)
    }
}

/// Immutable result of the setup phase.
pub struct PreparedReconstruction {
    classification: Classification,
    samplings: Vec<ShellSampling>,
    matrices: Arc<ReconstructionMatrices>,
    threshold: f64,
    regions: Option<usize>,
}

impl PreparedReconstruction {
    pub fn mode(&self) -> ReconstructionMode {
        self.classification.mode
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn matrices(&self) -> Arc<ReconstructionMatrices> {
        Arc::clone(&self.matrices)
    }

    /// Reconstruct with the configured region count.
    pub fn run(&self, input: &DwiVolume) -> Result<ReconstructionOutput, ReconstructionError> {
        let regions = self.regions.unwrap_or_else(rayon::current_num_threads);
        self.run_with_regions(input, regions)
    }

    pub fn run_with_regions(
        &self,
        input: &DwiVolume,
        regions: usize,
    ) -> Result<ReconstructionOutput, ReconstructionError> {
        let channels = self.classification.baseline_count + self.classification.gradient_count;
        if input.channels() != channels {
            return Err(ReconstructionError::ChannelCountMismatch {
                gradients: self.classification.gradient_count,
                baselines: self.classification.baseline_count,
                channels: input.channels(),
            });
        }

        let data = input.data().as_standard_layout();
        let voxels = data.as_slice().ok_or_else(|| {
            ReconstructionError::InvalidInputShape("input data is not contiguous".to_string())
        })?;

        let start = Instant::now();
        let baseline = self.classification.shell_map.baseline();
        let odf_len = self.matrices.odf_len();
        let (odf, b0) = match self.classification.mode {
            ReconstructionMode::SingleShell => {
                let rec = SingleShellReconstructor::new(
                    &self.matrices,
                    baseline,
                    &self.samplings[0],
                    self.threshold,
                );
                dispatch(&rec, voxels, channels, odf_len, regions)
            }
            ReconstructionMode::AnalyticalThreeShell => {
                let rec = ThreeShellReconstructor::new(
                    &self.matrices,
                    baseline,
                    [&self.samplings[0], &self.samplings[1], &self.samplings[2]],
                    self.threshold,
                );
                dispatch(&rec, voxels, channels, odf_len, regions)
            }
            ReconstructionMode::NumericalMultiShell => {
                return Err(ReconstructionError::UnsupportedMode {
                    shells: self.samplings.len(),
                    b_values: self.classification.shell_map.b_values(),
                });
            }
        };
        info!(
            "Reconstructed {} voxels in {:.3} ms",
            input.voxel_count(),
            start.elapsed().as_secs_f64() * 1e3
        );

        let geometry = *input.geometry();
        let (depth, height, width) = input.dim();
        Ok(ReconstructionOutput {
            odf: OdfVolume::from_raw(
                (depth, height, width),
                odf,
                self.matrices.odf_directions().to_vec(),
                geometry,
            )?,
            baseline: ScalarVolume::from_raw((depth, height, width), b0, geometry)?,
        })
    }
}

/// Split `voxel_count` voxels into `regions` contiguous runs and reconstruct
/// them in parallel. Returns the flattened ODF and baseline buffers.
fn dispatch<R: VoxelReconstructor>(
    reconstructor: &R,
    voxels: &[f32],
    channels: usize,
    odf_len: usize,
    regions: usize,
) -> (Vec<f32>, Vec<f32>) {
    let voxel_count = if channels == 0 { 0 } else { voxels.len() / channels };
    let region_len = voxel_count.div_ceil(regions.max(1)).max(1);
    debug!("dispatching {voxel_count} voxels as regions of {region_len}");

    let mut odf = vec![0.0f32; voxel_count * odf_len];
    let mut b0 = vec![0.0f32; voxel_count];

    odf.par_chunks_mut(region_len * odf_len)
        .zip(b0.par_chunks_mut(region_len))
        .enumerate()
        .for_each(|(region, (odf_region, b0_region))| {
            let mut ws = reconstructor.workspace();
            let first = region * region_len;
            for (offset, (odf_voxel, b0_voxel)) in odf_region
                .chunks_mut(odf_len)
                .zip(b0_region.iter_mut())
                .enumerate()
            {
                let v = first + offset;
                let voxel = &voxels[v * channels..(v + 1) * channels];
                *b0_voxel = reconstructor.reconstruct(voxel, &mut ws, odf_voxel) as f32;
            }
        });

    (odf, b0)
}
