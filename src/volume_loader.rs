use crate::{
    enums::SortBy,
    volume::{DwiVolume, ImageGeometry},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use log::debug;
use ndarray::{Array2, Array3, Array4, s};
use rayon::prelude::*;
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("No gradient channels given")]
    NoChannels,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// One gradient channel: a sorted stack of slices and its geometry.
struct ChannelSeries {
    data: Array3<f32>,
    geometry: ImageGeometry,
}

struct SliceImage {
    order: Option<f32>,
    image: Array2<f32>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Stack one DICOM series per gradient-table entry into a diffusion
    /// volume. Channel `i` of the result is read from `directories[i]`;
    /// channels are loaded in parallel.
    ///
    /// # Errors
    ///
    /// Returns error if a directory holds no images or the channel series
    /// disagree in their dimensions
    pub fn load_dwi_from_directories(
        directories: &[impl AsRef<Path> + Sync],
        sort_by: SortBy,
    ) -> Result<DwiVolume, VolumeLoaderError> {
        if directories.is_empty() {
            return Err(VolumeLoaderError::NoChannels);
        }
        let series: Vec<ChannelSeries> = directories
            .par_iter()
            .map(|dir| Self::load_series_from_directory(dir, sort_by))
            .collect::<Result<_, _>>()?;
        Self::stack_channels(series)
    }

    /// Build a diffusion volume from per-channel DICOM objects.
    pub fn load_dwi_from_dicom_objects(
        channels: &[Vec<FileDicomObject<InMemDicomObject>>],
        sort_by: SortBy,
    ) -> Result<DwiVolume, VolumeLoaderError> {
        if channels.is_empty() {
            return Err(VolumeLoaderError::NoChannels);
        }
        let series: Vec<ChannelSeries> = channels
            .iter()
            .map(|objects| Self::load_series(objects, sort_by))
            .collect::<Result<_, _>>()?;
        Self::stack_channels(series)
    }

    fn stack_channels(series: Vec<ChannelSeries>) -> Result<DwiVolume, VolumeLoaderError> {
        let (depth, height, width) = series[0].data.dim();
        if series.iter().any(|c| c.data.dim() != (depth, height, width)) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        let mut data = Array4::<f32>::zeros((depth, height, width, series.len()));
        for (channel, c) in series.iter().enumerate() {
            data.slice_mut(s![.., .., .., channel]).assign(&c.data);
        }
        debug!(
            "stacked {} channels of {depth}x{height}x{width}",
            series.len()
        );
        Ok(DwiVolume::new(data, series[0].geometry))
    }

    fn load_series_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<ChannelSeries, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        let objects: Result<Vec<_>, _> = paths.iter().map(open_file).collect();
        Self::load_series(&objects?, sort_by)
    }

    fn load_series(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<ChannelSeries, VolumeLoaderError> {
        let mut slices: Vec<SliceImage> = dicom_objects
            .iter()
            .filter_map(|dicom_object| {
                let order = Self::get_sort_order(dicom_object, &sort_by)?;
                let image = Self::decode_image(dicom_object)?;
                Some(SliceImage { order, image })
            })
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        sort_slices(&mut slices, sort_by);
        let images: Vec<Array2<f32>> = slices.into_iter().map(|s| s.image).collect();
        let data = build_volume_array(&images)?;

        let spacing = Self::get_spacing(dicom_objects).ok_or(VolumeLoaderError::MissingSpacing)?;
        let mut geometry = ImageGeometry {
            spacing,
            ..Default::default()
        };
        if let Some((origin, direction)) = Self::get_position(dicom_objects) {
            geometry.origin = origin;
            geometry.direction = direction;
        }
        Ok(ChannelSeries { data, geometry })
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    /// First frame as modality values; no VOI windowing so the signal stays
    /// quantitative.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn get_spacing(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<(f32, f32, f32)> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()?
                .to_float32()
                .ok()?;

            Some((pixel_spacing[0], pixel_spacing[1], slice_thickness))
        })
    }

    /// Origin and direction cosines of the series, taken from the first
    /// object that carries both position and orientation.
    fn get_position(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Option<([f64; 3], [[f64; 3]; 3])> {
        dicom_objects.iter().find_map(|dicom_object| {
            let position = dicom_object
                .element(tags::IMAGE_POSITION_PATIENT)
                .ok()?
                .to_multi_float64()
                .ok()?;
            let cosines = dicom_object
                .element(tags::IMAGE_ORIENTATION_PATIENT)
                .ok()?
                .to_multi_float64()
                .ok()?;
            if position.len() < 3 || cosines.len() < 6 {
                return None;
            }
            Some((
                [position[0], position[1], position[2]],
                direction_from_cosines(&cosines),
            ))
        })
    }
}

/// Columns are the row direction, the column direction and their normal.
fn direction_from_cosines(cosines: &[f64]) -> [[f64; 3]; 3] {
    let row = nalgebra::Vector3::new(cosines[0], cosines[1], cosines[2]);
    let col = nalgebra::Vector3::new(cosines[3], cosines[4], cosines[5]);
    let normal = row.cross(&col);
    [
        [row.x, col.x, normal.x],
        [row.y, col.y, normal.y],
        [row.z, col.z, normal.z],
    ]
}

fn sort_slices(slices: &mut [SliceImage], sort_by: SortBy) {
    if !matches!(sort_by, SortBy::None) {
        slices.sort_by(|a, b| a.order.partial_cmp(&b.order).unwrap_or(std::cmp::Ordering::Equal));
    }

    if matches!(sort_by, SortBy::ImagePositionPatient) {
        slices.reverse();
    }
}

fn build_volume_array(images: &[Array2<f32>]) -> Result<Array3<f32>, VolumeLoaderError> {
    let (height, width) = images[0].dim();
    if images.iter().any(|img| img.dim() != (height, width)) {
        return Err(VolumeLoaderError::InconsistentDimensions);
    }
    let mut volume = Array3::<f32>::zeros((images.len(), height, width));
    for (i, image) in images.iter().enumerate() {
        volume.slice_mut(s![i, .., ..]).assign(image);
    }
    Ok(volume)
}
