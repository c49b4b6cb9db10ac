use thiserror::Error;

/// Recoverable failures: descriptor initialisation, configuration and
/// construction-time input validation.
///
/// Misuse of an already constructed object (size or backend mismatch, calls
/// out of order) is not reported through this type; see [`crate::contract`].
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Accelerator initialization failed: {0}")]
    AcceleratorInit(String),

    #[error("WGPU error: {0}")]
    WgpuError(String),

    #[error("Invalid matrix dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Invalid backend configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
