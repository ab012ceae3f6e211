//! Synthetic diffusion data for the integration tests.

#![allow(dead_code)]

use nalgebra::Vector3;
use ndarray::Array4;
use qball_volume::point_shell::distribute_point_shell;
use qball_volume::{DwiVolume, GradientDirection, GradientTable, ImageGeometry};

pub const B0: f32 = 1000.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One baseline followed by `count` spiral directions on every shell.
pub fn shell_table(b_values: &[f64], count: usize) -> GradientTable {
    let directions = distribute_point_shell(count);
    GradientTable::new(
        std::iter::once(GradientDirection::baseline()).chain(
            b_values
                .iter()
                .flat_map(|&b| directions.iter().map(move |v| GradientDirection::new(*v, b))),
        ),
    )
}

/// Directions of the upper half of a spiral point shell only.
pub fn hemisphere_table(b_value: f64, count: usize) -> GradientTable {
    let directions: Vec<_> = distribute_point_shell(2 * count + 1)
        .into_iter()
        .filter(|v| v.z > 0.0)
        .collect();
    GradientTable::new(
        std::iter::once(GradientDirection::baseline())
            .chain(directions.into_iter().map(|v| GradientDirection::new(v, b_value))),
    )
}

/// Axially symmetric tensor: diffusivity `parallel` along `fiber`,
/// `perpendicular` across it (mm^2/s).
#[derive(Debug, Clone, Copy)]
pub struct Tensor {
    pub fiber: Vector3<f64>,
    pub parallel: f64,
    pub perpendicular: f64,
}

impl Tensor {
    pub fn isotropic(d: f64) -> Self {
        Self {
            fiber: Vector3::z(),
            parallel: d,
            perpendicular: d,
        }
    }

    pub fn signal(&self, gradient: &GradientDirection) -> f32 {
        if gradient.is_baseline() {
            return B0;
        }
        let c = gradient.vector.dot(&self.fiber);
        let d = self.perpendicular + (self.parallel - self.perpendicular) * c * c;
        B0 * (-gradient.b_value * d).exp() as f32
    }
}

/// `dim` voxels all following `tensor`.
pub fn uniform_volume(table: &GradientTable, dim: (usize, usize, usize), tensor: Tensor) -> DwiVolume {
    let (d, h, w) = dim;
    let voxel: Vec<f32> = table.iter().map(|g| tensor.signal(g)).collect();
    let data = Array4::from_shape_fn((d, h, w, table.len()), |(_, _, _, c)| voxel[c]);
    DwiVolume::new(data, ImageGeometry::default())
}

/// Voxels with fibers rotating through the volume and a few empty ones with
/// zero baseline.
pub fn mixed_volume(table: &GradientTable, dim: (usize, usize, usize)) -> DwiVolume {
    let (d, h, w) = dim;
    let mut data = Array4::<f32>::zeros((d, h, w, table.len()));
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let index = (z * h + y) * w + x;
                if index % 5 == 3 {
                    continue;
                }
                let angle = index as f64 * 0.37;
                let tensor = Tensor {
                    fiber: Vector3::new(angle.cos(), angle.sin(), 0.3 * (index % 3) as f64).normalize(),
                    parallel: 1.7e-3,
                    perpendicular: 0.3e-3 + 0.05e-3 * (index % 4) as f64,
                };
                for (c, g) in table.iter().enumerate() {
                    data[[z, y, x, c]] = tensor.signal(g);
                }
            }
        }
    }
    DwiVolume::new(data, ImageGeometry::default())
}

/// Index of the direction closest to `target` (up to sign).
pub fn nearest_direction(directions: &[Vector3<f64>], target: Vector3<f64>) -> usize {
    directions
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.dot(&target).abs().total_cmp(&b.dot(&target).abs()))
        .map(|(i, _)| i)
        .unwrap()
}
