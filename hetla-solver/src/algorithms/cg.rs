use super::{residual, IterativeBase, Solver};
use crate::control::SolveReport;
use hetla_core::{LocalMatrix, Real, Vector};

/// Conjugate Gradient for symmetric positive definite operators.
#[derive(Debug)]
pub struct ConjugateGradient<'a, T: Real> {
    base: IterativeBase<'a, T>,
}

impl<'a, T: Real> Default for ConjugateGradient<'a, T> {
    fn default() -> Self {
        Self {
            base: IterativeBase::default(),
        }
    }
}

impl<'a, T: Real> ConjugateGradient<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a solver with the given relative tolerance and iteration limit.
    pub fn with_params(rel_tol: T, max_iterations: usize) -> Self {
        let mut cg = Self::default();
        let control = cg.base.control_mut();
        control.set_tolerances(control.abs_tol(), rel_tol, control.div_tol());
        control.set_max_iterations(max_iterations);
        cg
    }

    fn solve_non_precond(&mut self, op: &LocalMatrix<T>, rhs: &Vector<T>, x: &mut Vector<T>) {
        let (control, _, [r, p, q]) = self.base.parts::<3>();
        residual(op, rhs, x, r);
        p.copy_from(r);
        let mut rho = r.dot(r);
        if control.start(|| rho.sqrt()) {
            return;
        }

        loop {
            op.apply(p, q);
            let pq = p.dot(q);
            if pq.is_zero() {
                control.breakdown("CG", "p.Ap");
                return;
            }
            let alpha = rho / pq;
            x.add_scale(p, alpha);
            r.add_scale(q, -alpha);

            let rho_new = r.dot(r);
            if control.step(|| rho_new.sqrt()) {
                return;
            }
            // p = r + beta p
            p.scale_add(rho_new / rho, r);
            rho = rho_new;
        }
    }

    fn solve_precond(&mut self, op: &LocalMatrix<T>, rhs: &Vector<T>, x: &mut Vector<T>) {
        let (control, precond, [r, z, p, q]) = self.base.parts::<4>();
        let Some(precond) = precond else { return };
        residual(op, rhs, x, r);
        if control.start(|| r.norm()) {
            return;
        }
        precond.solve_zero_sol(r, z);
        p.copy_from(z);
        let mut rho = r.dot(z);

        loop {
            op.apply(p, q);
            let pq = p.dot(q);
            if pq.is_zero() {
                control.breakdown("PCG", "p.Ap");
                return;
            }
            let alpha = rho / pq;
            x.add_scale(p, alpha);
            r.add_scale(q, -alpha);
            if control.step(|| r.norm()) {
                return;
            }

            precond.solve_zero_sol(r, z);
            let rho_new = r.dot(z);
            if rho.is_zero() {
                control.breakdown("PCG", "r.z");
                return;
            }
            p.scale_add(rho_new / rho, z);
            rho = rho_new;
        }
    }
}

impl<'a, T: Real> Solver<'a, T> for ConjugateGradient<'a, T> {
    fn name(&self) -> &'static str {
        "CG"
    }

    fn build(&mut self) {
        let work: &[&str] = if self.base.has_preconditioner() {
            &["CG r", "CG z", "CG p", "CG q"]
        } else {
            &["CG r", "CG p", "CG q"]
        };
        self.base.build("CG", work);
    }

    fn clear(&mut self) {
        self.base.clear();
    }

    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        let op = self.base.begin_solve("CG", rhs, x);
        if self.base.has_preconditioner() {
            self.solve_precond(op, rhs, x);
        } else {
            self.solve_non_precond(op, rhs, x);
        }
        self.base.finish("CG")
    }

    delegate_to_base!();
}

impl_iterative_solver!(ConjugateGradient);
