use crate::enums::Orientation;
use crate::error::ReconstructionError;

use nalgebra::Vector3;
use ndarray::Array3;
use ndarray::Array4;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::Zip;
use ndarray::s;
use serde::{Deserialize, Serialize};

/// Physical placement of a voxel grid, propagated unchanged from the input
/// to every output volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    /// Voxel size along (x, y, z).
    pub spacing: (f32, f32, f32),
    pub origin: [f64; 3],
    /// Row-major direction cosines, one axis per column.
    pub direction: [[f64; 3]; 3],
}

impl Default for ImageGeometry {
    fn default() -> Self {
        Self {
            spacing: (1.0, 1.0, 1.0),
            origin: [0.0; 3],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

/// Diffusion-weighted input: (depth, height, width, channels), one channel
/// per gradient-table entry.
#[derive(Debug, Clone, Default)]
pub struct DwiVolume {
    data: Array4<f32>,
    geometry: ImageGeometry,
}

impl DwiVolume {
    pub fn new(data: Array4<f32>, geometry: ImageGeometry) -> Self {
        Self { data, geometry }
    }

    /// Get the spatial dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        let (d, h, w, _) = self.data.dim();
        (d, h, w)
    }

    pub fn channels(&self) -> usize {
        self.data.dim().3
    }

    pub fn voxel_count(&self) -> usize {
        let (d, h, w) = self.dim();
        d * h * w
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array4<f32> {
        &mut self.data
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    /// Signal vector of one voxel.
    pub fn voxel(&self, z: usize, y: usize, x: usize) -> ArrayView1<'_, f32> {
        self.data.slice(s![z, y, x, ..])
    }
}

/// ODF amplitudes per voxel over a fixed set of unit directions.
#[derive(Debug, Clone)]
pub struct OdfVolume {
    data: Array4<f32>,
    directions: Vec<Vector3<f64>>,
    geometry: ImageGeometry,
}

impl OdfVolume {
    pub fn from_raw(
        dim: (usize, usize, usize),
        data: Vec<f32>,
        directions: Vec<Vector3<f64>>,
        geometry: ImageGeometry,
    ) -> Result<Self, ReconstructionError> {
        let (d, h, w) = dim;
        let data = Array4::from_shape_vec((d, h, w, directions.len()), data)
            .map_err(|e| ReconstructionError::InvalidInputShape(e.to_string()))?;
        Ok(Self {
            data,
            directions,
            geometry,
        })
    }

    /// (depth, height, width, directions)
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn directions(&self) -> &[Vector3<f64>] {
        &self.directions
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    pub fn odf(&self, z: usize, y: usize, x: usize) -> ArrayView1<'_, f32> {
        self.data.slice(s![z, y, x, ..])
    }

    /// Generalized fractional anisotropy of every voxel.
    pub fn gfa(&self) -> ScalarVolume {
        ScalarVolume {
            data: Zip::from(self.data.lanes(Axis(3))).par_map_collect(|odf| gfa(&odf) as f32),
            geometry: self.geometry,
        }
    }
}

/// `std / rms` of the amplitudes; zero for empty or all-zero ODFs.
pub fn gfa(odf: &ArrayView1<'_, f32>) -> f64 {
    let n = odf.len();
    if n < 2 {
        return 0.0;
    }
    let mean = odf.iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64;
    let squares: f64 = odf.iter().map(|&v| f64::from(v).powi(2)).sum();
    if squares <= 0.0 {
        return 0.0;
    }
    let deviation: f64 = odf.iter().map(|&v| (f64::from(v) - mean).powi(2)).sum();
    ((n as f64 * deviation) / ((n - 1) as f64 * squares)).sqrt()
}

/// One value per voxel, e.g. the averaged baseline.
#[derive(Debug, Clone, Default)]
pub struct ScalarVolume {
    data: Array3<f32>,
    geometry: ImageGeometry,
}

impl ScalarVolume {
    pub fn new(data: Array3<f32>, geometry: ImageGeometry) -> Self {
        Self { data, geometry }
    }

    pub fn from_raw(
        dim: (usize, usize, usize),
        data: Vec<f32>,
        geometry: ImageGeometry,
    ) -> Result<Self, ReconstructionError> {
        let data = Array3::from_shape_vec(dim, data)
            .map_err(|e| ReconstructionError::InvalidInputShape(e.to_string()))?;
        Ok(Self { data, geometry })
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice = match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![.., .., index]),
        };
        Some(slice)
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}
