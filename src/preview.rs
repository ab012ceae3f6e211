//! 8-bit slice previews of scalar maps (baseline, GFA) for quality control.

use crate::enums::{Interpolation, Orientation};
use crate::interpolator::Interpolator;
use crate::volume::ScalarVolume;

use image::ImageBuffer;
use image::Luma;
use ndarray::ArrayView2;
use rayon::prelude::*;

pub type PreviewImage = ImageBuffer<Luma<u8>, Vec<u8>>;

/// Linear intensity window mapped onto `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub low: f32,
    pub high: f32,
}

impl Window {
    /// Window spanning the finite values of `data`.
    pub fn from_values<'a>(data: impl IntoIterator<Item = &'a f32>) -> Self {
        let (low, high) = data
            .into_iter()
            .filter(|v| v.is_finite())
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if low > high {
            return Self { low: 0.0, high: 1.0 };
        }
        Self { low, high }
    }

    #[inline]
    fn to_u8(self, value: f32) -> u8 {
        let range = self.high - self.low;
        if range <= 0.0 || !value.is_finite() {
            return 0;
        }
        (((value - self.low) / range) * 255.0).clamp(0.0, 255.0) as u8
    }
}

impl ScalarVolume {
    /// Render the slice at `index` along `orientation`. The window spans the
    /// whole volume so that slices of one map are comparable.
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        interpolation: Interpolation,
    ) -> Option<PreviewImage> {
        let slice = self.get_slice_from_axis(index, &orientation)?;
        let window = Window::from_values(self.data().iter());

        match interpolation {
            Interpolation::None => slice_to_image(&slice, window),
            Interpolation::Bilinear => {
                let (width, height) = Interpolator::isotropic_slice_size(
                    self.geometry().spacing,
                    slice.dim(),
                    orientation,
                );
                interpolate_slice(&slice, width, height, window)
            }
        }
    }
}

fn slice_to_image(slice: &ArrayView2<'_, f32>, window: Window) -> Option<PreviewImage> {
    let (height, width) = slice.dim();
    let pixels: Vec<u8> = slice.iter().map(|&v| window.to_u8(v)).collect();
    ImageBuffer::from_raw(width as u32, height as u32, pixels)
}

fn interpolate_slice(
    slice: &ArrayView2<'_, f32>,
    width: u32,
    height: u32,
    window: Window,
) -> Option<PreviewImage> {
    let (rows, cols) = slice.dim();
    if rows == 0 || cols == 0 {
        return ImageBuffer::from_raw(width, height, vec![0; width as usize * height as usize]);
    }
    let row_scale = rows as f32 / height as f32;
    let col_scale = cols as f32 / width as f32;

    let pixels: Vec<u8> = (0..height)
        .into_par_iter()
        .flat_map_iter(|y| {
            // pixel centres mapped back into source coordinates
            let row = (y as f32 + 0.5) * row_scale - 0.5;
            (0..width).map(move |x| {
                let col = (x as f32 + 0.5) * col_scale - 0.5;
                window.to_u8(Interpolator::bilinear(slice, row, col))
            })
        })
        .collect();

    ImageBuffer::from_raw(width, height, pixels)
}
