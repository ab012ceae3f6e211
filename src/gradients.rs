//! Gradient table classification.
//!
//! A [`GradientTable`] is split into a baseline group and one entry per
//! b-value shell ([`ShellMap`]). [`classify`] validates the table against the
//! requested harmonic order and the channel count of the input volume,
//! reports duplicate directions, detects one-sided (hemispherical) sampling
//! and picks the [`ReconstructionMode`].

use std::collections::BTreeMap;

use log::{debug, warn};
use nalgebra::Vector3;

use crate::enums::ReconstructionMode;
use crate::error::ReconstructionError;
use crate::sphere::coefficient_count;

/// Shell key reserved for baseline (b=0) channels.
pub const BASELINE_SHELL: u32 = 0;

/// Centroid magnitude above which sampling is considered one-sided.
const HEMISPHERE_CENTROID_TOLERANCE: f64 = 0.1;

/// Lower bound on directions per shell regardless of order.
const MIN_SHELL_DIRECTIONS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientDirection {
    pub vector: Vector3<f64>,
    pub b_value: f64,
}

impl GradientDirection {
    pub fn new(vector: Vector3<f64>, b_value: f64) -> Self {
        Self { vector, b_value }
    }

    pub fn baseline() -> Self {
        Self::new(Vector3::zeros(), 0.0)
    }

    pub fn is_baseline(&self) -> bool {
        self.vector.norm() <= 0.0
    }

    /// Shell the direction belongs to. Non-baseline directions never share
    /// the baseline key, even with a zero b-value.
    pub fn shell_key(&self) -> u32 {
        if self.is_baseline() {
            BASELINE_SHELL
        } else {
            (self.b_value.max(0.0).round() as u32).max(1)
        }
    }
}

/// Immutable, acquisition-ordered gradient table. Non-baseline vectors are
/// normalized to unit length on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTable {
    directions: Vec<GradientDirection>,
}

impl GradientTable {
    pub fn new(directions: impl IntoIterator<Item = GradientDirection>) -> Self {
        let directions = directions
            .into_iter()
            .map(|mut d| {
                if !d.is_baseline() {
                    d.vector /= d.vector.norm();
                }
                d
            })
            .collect();
        Self { directions }
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&GradientDirection> {
        self.directions.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GradientDirection> {
        self.directions.iter()
    }

    pub fn baseline_count(&self) -> usize {
        self.directions.iter().filter(|d| d.is_baseline()).count()
    }

    pub fn gradient_count(&self) -> usize {
        self.len() - self.baseline_count()
    }

    /// True when the centroid of all unit gradient vectors lies away from
    /// the origin, i.e. only one half of the sphere was sampled.
    pub fn is_hemispherical(&self) -> bool {
        let (sum, count) = self
            .directions
            .iter()
            .filter(|d| !d.is_baseline())
            .fold((Vector3::zeros(), 0usize), |(sum, count), d| {
                (sum + d.vector, count + 1)
            });
        if count == 0 {
            return false;
        }
        (sum / count as f64).norm() > HEMISPHERE_CENTROID_TOLERANCE
    }

    /// First pair of distinct indices holding the same direction on the same
    /// shell, if any. Multi-shell schemes repeat their directions on every
    /// shell, so equal vectors on different shells are not duplicates.
    pub fn find_duplicate(&self) -> Option<(usize, usize)> {
        for (i, a) in self.directions.iter().enumerate() {
            if a.is_baseline() {
                continue;
            }
            for (j, b) in self.directions.iter().enumerate().skip(i + 1) {
                if !b.is_baseline() && a.shell_key() == b.shell_key() && a.vector == b.vector {
                    return Some((i, j));
                }
            }
        }
        None
    }
}

/// Ordered mapping from shell key to gradient-table indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellMap {
    shells: BTreeMap<u32, Vec<usize>>,
}

impl ShellMap {
    /// Group every table entry under its shell key.
    pub fn from_table(table: &GradientTable) -> Self {
        let mut shells: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (index, direction) in table.iter().enumerate() {
            shells.entry(direction.shell_key()).or_default().push(index);
        }
        Self { shells }
    }

    /// Wrap a caller supplied mapping. Use [`ShellMap::validate`] before
    /// relying on it.
    pub fn from_shells(shells: BTreeMap<u32, Vec<usize>>) -> Self {
        Self { shells }
    }

    /// Check that the map partitions `table` and that baselines and
    /// gradients are not mixed.
    pub fn validate(&self, table: &GradientTable) -> Result<(), ReconstructionError> {
        let mut seen = vec![false; table.len()];
        for (&key, indices) in &self.shells {
            for &index in indices {
                let direction = table.get(index).ok_or_else(|| {
                    ReconstructionError::InvalidShellMap(format!(
                        "index {index} out of range for {} gradients",
                        table.len()
                    ))
                })?;
                if std::mem::replace(&mut seen[index], true) {
                    return Err(ReconstructionError::InvalidShellMap(format!(
                        "index {index} listed more than once"
                    )));
                }
                if (key == BASELINE_SHELL) != direction.is_baseline() {
                    return Err(ReconstructionError::InvalidShellMap(format!(
                        "index {index} does not belong to shell {key}"
                    )));
                }
            }
        }
        if let Some(missing) = seen.iter().position(|&s| !s) {
            return Err(ReconstructionError::InvalidShellMap(format!(
                "index {missing} is not assigned to any shell"
            )));
        }
        Ok(())
    }

    /// Number of entries, baseline included.
    pub fn len(&self) -> usize {
        self.shells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }

    pub fn baseline(&self) -> &[usize] {
        self.shells
            .get(&BASELINE_SHELL)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Diffusion-weighted shells in ascending b-value order.
    pub fn gradient_shells(&self) -> impl Iterator<Item = (u32, &[usize])> {
        self.shells
            .iter()
            .filter(|(key, _)| **key != BASELINE_SHELL)
            .map(|(key, indices)| (*key, indices.as_slice()))
    }

    pub fn b_values(&self) -> Vec<u32> {
        self.gradient_shells().map(|(b, _)| b).collect()
    }

    pub fn mode(&self) -> ReconstructionMode {
        match self.b_values().as_slice() {
            [] | [_] => ReconstructionMode::SingleShell,
            &[b1, b2, b3] if b2 - b1 == b1 && b3 - b2 == b1 => {
                ReconstructionMode::AnalyticalThreeShell
            }
            _ => ReconstructionMode::NumericalMultiShell,
        }
    }
}

/// Channel indices and sampling directions of one shell, extended with the
/// antipodal partners when the acquisition is hemispherical.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellSampling {
    pub b_value: u32,
    pub channels: Vec<usize>,
    pub directions: Vec<Vector3<f64>>,
}

impl ShellSampling {
    fn new(table: &GradientTable, b_value: u32, indices: &[usize], hemispherical: bool) -> Self {
        let base: Vec<Vector3<f64>> = indices
            .iter()
            .filter_map(|&i| table.get(i).map(|d| d.vector))
            .collect();
        let mut channels = indices.to_vec();
        let mut directions = base.clone();
        if hemispherical {
            channels.extend_from_slice(indices);
            directions.extend(base.iter().map(|v| -v));
        }
        Self {
            b_value,
            channels,
            directions,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Result of classifying a gradient table.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub shell_map: ShellMap,
    pub baseline_count: usize,
    pub gradient_count: usize,
    pub hemispherical: bool,
    pub has_duplicates: bool,
    pub mode: ReconstructionMode,
}

impl Classification {
    /// Samplings of the diffusion-weighted shells, ascending by b-value.
    pub fn samplings(&self, table: &GradientTable) -> Vec<ShellSampling> {
        self.shell_map
            .gradient_shells()
            .map(|(b, indices)| ShellSampling::new(table, b, indices, self.hemispherical))
            .collect()
    }
}

/// Classify `table` for reconstruction at harmonic `order` from an input
/// with `channels` components.
///
/// # Errors
///
/// Returns a configuration error if a shell map is inconsistent, there is no
/// baseline, the channel count differs from the table, or fewer than
/// `(L+1)(L+2)/2` directions are available.
pub fn classify(
    table: &GradientTable,
    explicit: Option<&ShellMap>,
    order: usize,
    channels: usize,
) -> Result<Classification, ReconstructionError> {
    let shell_map = match explicit {
        Some(map) => {
            map.validate(table)?;
            map.clone()
        }
        None => ShellMap::from_table(table),
    };

    let baseline_count = shell_map.baseline().len();
    let gradient_count = table.len() - baseline_count;

    if baseline_count + gradient_count != channels {
        return Err(ReconstructionError::ChannelCountMismatch {
            gradients: gradient_count,
            baselines: baseline_count,
            channels,
        });
    }
    if baseline_count == 0 {
        return Err(ReconstructionError::MissingBaseline);
    }

    let required = coefficient_count(order);
    if gradient_count < required {
        return Err(ReconstructionError::InsufficientDirections {
            order,
            required,
            available: gradient_count,
        });
    }

    let mode = shell_map.mode();
    if mode != ReconstructionMode::NumericalMultiShell {
        let required = required.max(MIN_SHELL_DIRECTIONS);
        for (_, indices) in shell_map.gradient_shells() {
            if indices.len() < required {
                return Err(ReconstructionError::InsufficientDirections {
                    order,
                    required,
                    available: indices.len(),
                });
            }
        }
    }

    let duplicate = table.find_duplicate();
    if let Some((a, b)) = duplicate {
        warn!(
            "Gradient directions {a} and {b} are equal. Corresponding image data should be averaged before reconstruction."
        );
    }

    let hemispherical = table.is_hemispherical();
    debug!(
        "classified {baseline_count} baselines, {gradient_count} gradients, shells {:?}, hemispherical={hemispherical}, mode={mode:?}",
        shell_map.b_values()
    );

    Ok(Classification {
        shell_map,
        baseline_count,
        gradient_count,
        hemispherical,
        has_duplicates: duplicate.is_some(),
        mode,
    })
}
