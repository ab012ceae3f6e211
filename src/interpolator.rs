use crate::enums::Orientation;

use ndarray::ArrayView2;

pub(crate) struct Interpolator;

impl Interpolator {
    /// (width, height) of a slice resampled so that one output pixel covers
    /// the smallest in-plane spacing in both directions.
    pub(crate) fn isotropic_slice_size(
        spacing: (f32, f32, f32),
        slice_dim: (usize, usize),
        orientation: Orientation,
    ) -> (u32, u32) {
        let (sx, sy, sz) = spacing;
        // slice rows run along the first remaining axis, columns along the second
        let (row_spacing, col_spacing) = match orientation {
            Orientation::Axial => (sy, sx),
            Orientation::Coronal => (sz, sx),
            Orientation::Sagittal => (sz, sy),
        };
        let pixel = row_spacing.min(col_spacing);
        if pixel.is_nan() || pixel <= 0.0 {
            return (slice_dim.1 as u32, slice_dim.0 as u32);
        }
        let (rows, cols) = slice_dim;
        let width = (cols as f32 * col_spacing / pixel).round().max(1.0) as u32;
        let height = (rows as f32 * row_spacing / pixel).round().max(1.0) as u32;
        (width, height)
    }

    /// Sample `slice` at fractional (row, col), clamped to the slice bounds.
    #[inline]
    pub(crate) fn bilinear(slice: &ArrayView2<f32>, row: f32, col: f32) -> f32 {
        let (rows, cols) = slice.dim();
        let row = row.clamp(0.0, (rows - 1) as f32);
        let col = col.clamp(0.0, (cols - 1) as f32);

        let r0 = row.floor() as usize;
        let c0 = col.floor() as usize;
        let r1 = (r0 + 1).min(rows - 1);
        let c1 = (c0 + 1).min(cols - 1);
        let fr = row - r0 as f32;
        let fc = col - c0 as f32;

        let top = slice[[r0, c0]] + (slice[[r0, c1]] - slice[[r0, c0]]) * fc;
        let bottom = slice[[r1, c0]] + (slice[[r1, c1]] - slice[[r1, c0]]) * fc;
        top + (bottom - top) * fr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn isotropic_size_stretches_thick_slices() {
        let size = Interpolator::isotropic_slice_size((1.0, 1.0, 3.0), (10, 20), Orientation::Coronal);
        assert_eq!(size, (20, 30));
        let axial = Interpolator::isotropic_slice_size((1.0, 1.0, 3.0), (10, 20), Orientation::Axial);
        assert_eq!(axial, (20, 10));
    }

    #[test]
    fn bilinear_midpoint_and_clamping() {
        let slice = arr2(&[[0.0f32, 2.0], [4.0, 6.0]]);
        let view = slice.view();
        assert_eq!(Interpolator::bilinear(&view, 0.5, 0.5), 3.0);
        assert_eq!(Interpolator::bilinear(&view, -1.0, 5.0), 2.0);
    }
}
