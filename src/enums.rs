use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Bilinear,
    #[default]
    None,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// Reconstruction algorithm chosen from the shell layout of a gradient table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconstructionMode {
    /// Baseline plus at most one diffusion-weighted shell.
    SingleShell,
    /// Three shells with b-values `b, 2b, 3b`.
    AnalyticalThreeShell,
    /// Any other multi-shell layout. Classified but not reconstructed.
    NumericalMultiShell,
}
