//! # Q-ball volume library
//!
//! This crate reconstructs orientation distribution functions (ODFs) from
//! diffusion-weighted MR volumes using the constant solid angle Q-ball
//! method expressed in a real, even spherical harmonic basis.
//!
//! A [`GradientTable`] lists one gradient direction and b-value per input
//! channel. The table is classified into a baseline group and b-value
//! shells, which selects the reconstruction:
//!  - Single shell: Laplace-Beltrami regularized fit of `ln(-ln E)`
//!  - Three shells with b-values `b, 2b, 3b`: analytical bi-exponential
//!    solution with constrained projections of the attenuations
//!  - Any other multi-shell layout is reported as unsupported
//!
//! All matrices are built once during a single-threaded setup phase. The
//! volume is then split into contiguous regions that are reconstructed in
//! parallel using rayon; the result does not depend on the region count.
//!
//! Input volumes can be stacked from one DICOM series per gradient channel.
//! Results can be written as raw `f32` buffers with JSON sidecars, and
//! scalar maps (baseline, GFA) can be rendered as 8-bit slice previews,
//! optionally interpolated to preserve the aspect ratio.
//!
//! # Examples
//!
//! ## Reconstructing a stacked DICOM volume
//!
//! ```no_run
//! # use qball_volume::{
//! #     GradientDirection, GradientTable, QBallReconstructionFilter, ReconstructionConfig,
//! #     SortBy, VolumeLoader, point_shell::distribute_point_shell,
//! # };
//! // one baseline followed by 30 directions at b=1000
//! let directories: Vec<String> = (0..=30).map(|i| format!("dwi/{i:02}")).collect();
//! let volume = VolumeLoader::load_dwi_from_directories(&directories, SortBy::InstanceNumber)
//!     .expect("should have loaded the channel series");
//! let table = GradientTable::new(
//!     std::iter::once(GradientDirection::baseline()).chain(
//!         distribute_point_shell(30)
//!             .into_iter()
//!             .map(|v| GradientDirection::new(v, 1000.0)),
//!     ),
//! );
//! let filter = QBallReconstructionFilter::new(table, ReconstructionConfig::default());
//! let output = filter.run(&volume).expect("should have reconstructed the volume");
//! let gfa = output.odf.gfa();
//! ```

pub mod config;
pub mod enums;
pub mod error;
pub mod export;
pub mod filter;
pub mod gradients;
mod interpolator;
pub mod matrices;
pub mod point_shell;
pub mod preview;
pub mod signal;
pub mod single_shell;
pub mod sphere;
pub mod three_shell;
pub mod volume;
pub mod volume_loader;

pub use enums::{Interpolation, Orientation, ReconstructionMode, SortBy};
pub use error::ReconstructionError;
pub use filter::{
    PreparedReconstruction, QBallReconstructionFilter, ReconstructionConfig, ReconstructionOutput,
    VoxelReconstructor,
};
pub use gradients::{GradientDirection, GradientTable, ShellMap};
pub use matrices::ReconstructionMatrices;
pub use volume::{DwiVolume, ImageGeometry, OdfVolume, ScalarVolume};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
