use super::{residual, IterativeBase, Solver};
use crate::control::SolveReport;
use hetla_core::{require, Real, Vector};

/// Stationary iteration `x += omega M^-1 (b - A x)`.
///
/// `M` is the attached preconditioner and is mandatory; with
/// [`super::Jacobi`] this is damped Jacobi, the default multigrid smoother.
#[derive(Debug)]
pub struct FixedPoint<'a, T: Real> {
    base: IterativeBase<'a, T>,
    omega: T,
}

impl<'a, T: Real> Default for FixedPoint<'a, T> {
    fn default() -> Self {
        Self {
            base: IterativeBase::default(),
            omega: T::one(),
        }
    }
}

impl<'a, T: Real> FixedPoint<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_relaxation(&mut self, omega: T) {
        require!(
            !self.base.is_built(),
            "FixedPoint: the relaxation cannot change after Build"
        );
        self.omega = omega;
    }

    pub fn relaxation(&self) -> T {
        self.omega
    }
}

impl<'a, T: Real> Solver<'a, T> for FixedPoint<'a, T> {
    fn name(&self) -> &'static str {
        "FixedPoint"
    }

    fn build(&mut self) {
        require!(
            self.base.has_preconditioner(),
            "FixedPoint: a preconditioner is required before Build"
        );
        self.base.build("FixedPoint", &["r", "z"]);
    }

    fn clear(&mut self) {
        self.base.clear();
    }

    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        let op = self.base.begin_solve("FixedPoint", rhs, x);
        let omega = self.omega;
        let (control, precond, [r, z]) = self.base.parts::<2>();
        if let Some(precond) = precond {
            residual(op, rhs, x, r);
            if !control.start(|| r.norm()) {
                loop {
                    precond.solve_zero_sol(r, z);
                    x.add_scale(z, omega);
                    residual(op, rhs, x, r);
                    if control.step(|| r.norm()) {
                        break;
                    }
                }
            }
        }
        self.base.finish("FixedPoint")
    }

    delegate_to_base!();
}

impl_iterative_solver!(FixedPoint);
