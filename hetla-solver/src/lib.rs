//! `hetla-solver`: Krylov, Chebyshev, stationary and multigrid solvers for
//! systems `A x = b` built from `hetla-core` operators.
//!
//! Solvers run on whatever placement the operator and vectors live on; the
//! work data they allocate at `build` follows the operator.

pub mod algorithms;
pub mod control;
pub mod error;
pub mod multigrid;

pub use algorithms::{
    BiCGStab, Chebyshev, ConjugateGradient, DirectLu, FixedPoint, Gmres, IterativeSolver, Jacobi,
    QmrCgStab, Solver,
};
pub use control::{
    ControlConfig, Criterion, IterationControl, SolveReport, SolverMode, SolverStatus,
};
pub use error::SolverError;
pub use multigrid::{Cycle, Multigrid};

// Re-export the core types needed to set up a solve
pub use hetla_core::{
    AcceleratorChoice, BackendConfig, BackendDescriptor, CoreError, CsrMatrix, DenseMatrix,
    LocalMatrix, MatrixFormat, Migrate, Real, Triplet, Vector,
};
