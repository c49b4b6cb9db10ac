//! # hetla core
//!
//! Vectors and operators that live either on the host (rayon) or on an
//! accelerator (wgpu compute, or an emulated device memory), plus the
//! migration layer that moves them between the two.
//!
//! Everything hangs off a shared [`BackendDescriptor`]. Operations check that
//! their operands agree on size and memory space before running; a mismatch
//! is a [`ContractViolation`].

#[macro_use]
pub mod contract;

pub mod backend;
pub(crate) mod context;
pub mod dense_matrix;
pub mod device;
pub mod error;
mod host_ops;
pub mod matrix;
pub(crate) mod memory;
pub mod migration;
mod ops;
pub mod scalar;
pub mod sparse_matrix;
pub mod traits;
pub mod vector;

pub use backend::{AcceleratorChoice, BackendConfig, BackendDescriptor, BackendTag, KernelTuning};
pub use contract::{ContractViolation, ViolationKind};
pub use dense_matrix::DenseMatrix;
pub use device::{AcceleratorDevice, TransferStats};
pub use error::CoreError;
pub use matrix::{LocalMatrix, MatrixFormat};
pub use memory::Placement;
pub use migration::Migrate;
pub use scalar::{Real, Scalar, ScalarKind};
pub use sparse_matrix::{CsrMatrix, Triplet};
pub use traits::Dimensions;
pub use vector::Vector;
