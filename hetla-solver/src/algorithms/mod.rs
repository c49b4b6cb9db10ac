//! Iterative and direct solvers over [`LocalMatrix`] operators.
//!
//! Every solver follows the same lifecycle: `set_operator`, optional
//! configuration (tolerances, preconditioner), `build`, any number of
//! `solve` calls, then `clear` before the next `build`. Calls out of this
//! order are contract violations.

use crate::control::{IterationControl, SolveReport, SolverMode, SolverStatus};
use hetla_core::{require, Dimensions, LocalMatrix, Migrate, Real, Vector};
use log::{info, warn};
use std::fmt;

/// Methods every solver shares with [`IterativeBase`]-backed implementations.
macro_rules! delegate_to_base {
    () => {
        fn set_operator(&mut self, op: &'a hetla_core::LocalMatrix<T>) {
            let name = $crate::algorithms::Solver::name(self);
            self.base.set_operator(op, name);
        }

        fn is_built(&self) -> bool {
            self.base.is_built()
        }

        fn set_mode(&mut self, mode: $crate::control::SolverMode) {
            self.base.set_mode(mode);
        }

        fn move_to_accelerator(&mut self) {
            self.base.move_to_accelerator();
        }

        fn move_to_host(&mut self) {
            self.base.move_to_host();
        }
    };
}

macro_rules! impl_iterative_solver {
    ($solver:ident) => {
        impl<'a, T: hetla_core::Real> $crate::algorithms::IterativeSolver<'a, T> for $solver<'a, T> {
            fn control(&self) -> &$crate::control::IterationControl<T> {
                self.base.control()
            }

            fn control_mut(&mut self) -> &mut $crate::control::IterationControl<T> {
                self.base.control_mut()
            }

            fn set_preconditioner(
                &mut self,
                precond: Box<dyn $crate::algorithms::Solver<'a, T> + 'a>,
            ) {
                let name = $crate::algorithms::Solver::name(self);
                self.base.set_preconditioner(precond, name);
            }
        }
    };
}

pub mod bicgstab;
pub mod cg;
pub mod chebyshev;
pub mod direct_lu;
pub mod fixed_point;
pub mod gmres;
pub mod jacobi;
pub mod qmrcgstab;

pub use bicgstab::BiCGStab;
pub use cg::ConjugateGradient;
pub use chebyshev::Chebyshev;
pub use direct_lu::DirectLu;
pub use fixed_point::FixedPoint;
pub use gmres::Gmres;
pub use jacobi::Jacobi;
pub use qmrcgstab::QmrCgStab;

/// A solver for `A x = b` with `A` borrowed for the lifetime `'a`.
pub trait Solver<'a, T: Real>: fmt::Debug {
    fn name(&self) -> &'static str;

    fn set_operator(&mut self, op: &'a LocalMatrix<T>);

    /// Prepares work data on the operator's placement.
    fn build(&mut self);

    /// Releases work data; the operator and configuration are kept.
    fn clear(&mut self);

    fn is_built(&self) -> bool;

    /// Solves starting from the current content of `x`.
    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T>;

    /// Solves starting from `x = 0`.
    fn solve_zero_sol(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        x.zeros();
        self.solve(rhs, x)
    }

    fn set_mode(&mut self, mode: SolverMode);

    /// Moves the work data; the operator is moved by its owner.
    fn move_to_accelerator(&mut self);

    fn move_to_host(&mut self);
}

/// Solvers driven by an [`IterationControl`] that accept a preconditioner.
pub trait IterativeSolver<'a, T: Real>: Solver<'a, T> {
    fn control(&self) -> &IterationControl<T>;

    fn control_mut(&mut self) -> &mut IterationControl<T>;

    /// Attaches `M`, applied as `z = M^-1 r`. Must precede `build`.
    fn set_preconditioner(&mut self, precond: Box<dyn Solver<'a, T> + 'a>);
}

/// A zero vector with `op.rows()` elements on the operator's placement.
pub(crate) fn work_vector<T: Real>(op: &LocalMatrix<T>, name: &str) -> Vector<T> {
    let mut v = Vector::new(op.backend());
    if op.is_accelerator() {
        // empty, so nothing is transferred
        v.move_to_accelerator();
    }
    v.allocate(name, op.rows());
    v
}

/// State shared by the iterative solvers.
#[derive(Debug)]
pub(crate) struct IterativeBase<'a, T: Real> {
    op: Option<&'a LocalMatrix<T>>,
    precond: Option<Box<dyn Solver<'a, T> + 'a>>,
    control: IterationControl<T>,
    work: Vec<Vector<T>>,
    built: bool,
}

impl<'a, T: Real> Default for IterativeBase<'a, T> {
    fn default() -> Self {
        Self {
            op: None,
            precond: None,
            control: IterationControl::default(),
            work: Vec::new(),
            built: false,
        }
    }
}

impl<'a, T: Real> IterativeBase<'a, T> {
    pub(crate) fn set_operator(&mut self, op: &'a LocalMatrix<T>, solver: &str) {
        require!(
            !self.built,
            "{}: the operator cannot change after Build; call Clear first",
            solver
        );
        self.op = Some(op);
    }

    pub(crate) fn set_preconditioner(&mut self, precond: Box<dyn Solver<'a, T> + 'a>, solver: &str) {
        require!(
            !self.built,
            "{}: the preconditioner must be attached before Build",
            solver
        );
        self.precond = Some(precond);
    }

    pub(crate) fn has_preconditioner(&self) -> bool {
        self.precond.is_some()
    }

    pub(crate) fn is_built(&self) -> bool {
        self.built
    }

    pub(crate) fn control(&self) -> &IterationControl<T> {
        &self.control
    }

    pub(crate) fn control_mut(&mut self) -> &mut IterationControl<T> {
        &mut self.control
    }

    pub(crate) fn set_mode(&mut self, mode: SolverMode) {
        self.control.set_mode(mode);
    }

    /// Builds the preconditioner on the operator and allocates one work
    /// vector per name.
    pub(crate) fn build(&mut self, solver: &str, work: &[&str]) -> &'a LocalMatrix<T> {
        require!(
            !self.built,
            "{}: Build called twice without Clear",
            solver
        );
        let Some(op) = self.op else {
            hetla_core::contract_violation!(
                Precondition,
                "{}: Build requires an operator (call set_operator first)",
                solver
            );
        };
        require!(
            op.is_square(),
            "{}: operator '{}' is {}x{}, expected a square matrix",
            solver,
            op.name(),
            op.rows(),
            op.cols()
        );
        if let Some(precond) = self.precond.as_mut() {
            precond.set_operator(op);
            precond.set_mode(SolverMode::Preconditioner);
            precond.build();
        }
        self.work = work.iter().map(|name| work_vector(op, name)).collect();
        self.built = true;
        info!(
            "{} built for '{}' ({} unknowns, placement {}, preconditioner: {})",
            solver,
            op.name(),
            op.rows(),
            op.placement(),
            self.precond.as_ref().map_or("none", |p| p.name())
        );
        op
    }

    pub(crate) fn clear(&mut self) {
        self.work.clear();
        if let Some(precond) = self.precond.as_mut() {
            precond.clear();
        }
        self.built = false;
    }

    /// Validates the lifecycle and the operand sizes of a solve call.
    pub(crate) fn begin_solve(
        &self,
        solver: &str,
        rhs: &Vector<T>,
        x: &Vector<T>,
    ) -> &'a LocalMatrix<T> {
        require!(self.built, "{}: Solve called before Build", solver);
        let Some(op) = self.op else {
            hetla_core::contract_violation!(Precondition, "{}: no operator", solver);
        };
        require!(
            rhs.size() == op.rows() && x.size() == op.rows(),
            "{}: rhs ({}) and solution ({}) must have {} elements",
            solver,
            rhs.size(),
            x.size(),
            op.rows()
        );
        op
    }

    /// Disjoint access to the control, the preconditioner and `N` work
    /// vectors.
    #[allow(clippy::type_complexity)]
    pub(crate) fn parts<const N: usize>(
        &mut self,
    ) -> (
        &mut IterationControl<T>,
        Option<&mut (dyn Solver<'a, T> + 'a)>,
        &mut [Vector<T>; N],
    ) {
        let count = self.work.len();
        let Ok(work) = <&mut [Vector<T>; N]>::try_from(self.work.as_mut_slice()) else {
            hetla_core::contract_violation!(
                Precondition,
                "solver holds {} work vectors, {} requested",
                count,
                N
            );
        };
        (&mut self.control, self.precond.as_deref_mut(), work)
    }

    pub(crate) fn finish(&self, solver: &str) -> SolveReport<T> {
        finish(solver, &self.control)
    }

    pub(crate) fn move_to_accelerator(&mut self) {
        self.work.iter_mut().for_each(Migrate::move_to_accelerator);
        if let Some(precond) = self.precond.as_mut() {
            precond.move_to_accelerator();
        }
    }

    pub(crate) fn move_to_host(&mut self) {
        self.work.iter_mut().for_each(Migrate::move_to_host);
        if let Some(precond) = self.precond.as_mut() {
            precond.move_to_host();
        }
    }
}

/// `r = b - A x`
pub(crate) fn residual<T: Real>(op: &LocalMatrix<T>, rhs: &Vector<T>, x: &Vector<T>, r: &mut Vector<T>) {
    op.apply(x, r);
    r.scale_add(-T::one(), rhs);
}

/// Logs the outcome of a solve and returns its report.
pub(crate) fn finish<T: Real>(solver: &str, control: &IterationControl<T>) -> SolveReport<T> {
    let report = control.report();
    if !control.uses_residuals() {
        return report;
    }
    match report.status {
        SolverStatus::Converged(criterion) => info!(
            "{} converged ({:?}) in {} iterations: residual {:e} -> {:e}",
            solver,
            criterion,
            report.iterations,
            report.initial_residual.to_f64_lossy(),
            report.final_residual.to_f64_lossy()
        ),
        SolverStatus::Diverged => warn!(
            "{} diverged after {} iterations (residual {:e})",
            solver,
            report.iterations,
            report.final_residual.to_f64_lossy()
        ),
        SolverStatus::MaxIterationsReached => warn!(
            "{} reached the iteration limit ({}) with residual {:e}",
            solver,
            report.iterations,
            report.final_residual.to_f64_lossy()
        ),
    }
    report
}
