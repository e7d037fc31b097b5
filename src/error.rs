use alloc::string::String;
use thiserror::Error;

/// Errors raised while configuring or building a network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Number of classes must be positive")]
    ZeroClasses,

    #[error("Input shape must be non-empty, got {height}x{width}x{channels}")]
    EmptyInputShape {
        height: usize,
        width: usize,
        channels: usize,
    },

    #[error("Same padding requires an odd kernel size, got {0}")]
    EvenKernel(usize),

    #[error("Convolution stride must be positive")]
    ZeroStride,

    #[error("Convolution filter count must be positive")]
    ZeroFilters,

    #[error("Unknown activation: {0}")]
    UnknownActivation(String),
}

pub type Result<T> = core::result::Result<T, ModelError>;
