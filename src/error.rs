use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ReconstructionError {
    #[error("At least {required} gradient directions are required for order {order}, got {available}")]
    InsufficientDirections {
        order: usize,
        required: usize,
        available: usize,
    },

    #[error(
        "{gradients} gradients + {baselines} baselines = {} directions specified but image has {channels} components",
        gradients + baselines
    )]
    ChannelCountMismatch {
        gradients: usize,
        baselines: usize,
        channels: usize,
    },

    #[error("Gradient table contains no baseline (b=0) entries")]
    MissingBaseline,

    #[error("Invalid shell map: {0}")]
    InvalidShellMap(String),

    #[error("Harmonic order must be even and positive, got {0}")]
    InvalidOrder(usize),

    #[error("Number of output directions must be positive")]
    InvalidOutputDirections,

    #[error("Regularized system matrix is singular; gradient sampling is degenerate")]
    SingularSystem,

    #[error("Input volume shape does not match: {0}")]
    InvalidInputShape(String),

    #[error("Reconstruction of {shells} shells with b-values {b_values:?} is not supported")]
    UnsupportedMode { shells: usize, b_values: Vec<u32> },
}
