use super::{residual, IterativeBase, Solver};
use crate::control::{IterationControl, SolveReport};
use hetla_core::{LocalMatrix, Real, Vector};

/// BiConjugate Gradient Stabilized, for general non-singular operators.
#[derive(Debug)]
pub struct BiCGStab<'a, T: Real> {
    base: IterativeBase<'a, T>,
}

impl<'a, T: Real> Default for BiCGStab<'a, T> {
    fn default() -> Self {
        Self {
            base: IterativeBase::default(),
        }
    }
}

/// Handles the case `t = A s = 0`: `s` itself must vanish, so the half step
/// already solved the system. Returns true when the solve is over.
fn finish_on_zero_t<T: Real>(
    control: &mut IterationControl<T>,
    s: &Vector<T>,
    what: &str,
) -> bool {
    if !control.step(|| s.norm()) {
        control.breakdown("BiCGStab", what);
    }
    true
}

impl<'a, T: Real> BiCGStab<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn solve_non_precond(&mut self, op: &LocalMatrix<T>, rhs: &Vector<T>, x: &mut Vector<T>) {
        let (control, _, [r0, r, p, v, t]) = self.base.parts::<5>();
        residual(op, rhs, x, r);
        if control.start(|| r.norm()) {
            return;
        }
        r0.copy_from(r);
        p.copy_from(r);
        let mut rho = r0.dot(r);

        loop {
            op.apply(p, v);
            let r0v = r0.dot(v);
            if r0v.is_zero() {
                control.breakdown("BiCGStab", "r0.v");
                return;
            }
            let alpha = rho / r0v;
            // s = r - alpha v, stored in r
            r.add_scale(v, -alpha);
            op.apply(r, t);
            let tt = t.dot(t);
            if tt.is_zero() {
                x.add_scale(p, alpha);
                finish_on_zero_t(control, r, "t.t");
                return;
            }
            let omega = t.dot(r) / tt;
            x.scale_add2(T::one(), p, alpha, r, omega);
            r.add_scale(t, -omega);
            if control.step(|| r.norm()) {
                return;
            }

            let rho_new = r0.dot(r);
            if rho_new.is_zero() || omega.is_zero() {
                control.breakdown("BiCGStab", if omega.is_zero() { "omega" } else { "r0.r" });
                return;
            }
            let beta = (rho_new / rho) * (alpha / omega);
            // p = r + beta (p - omega v)
            p.scale_add2(beta, v, -beta * omega, r, T::one());
            rho = rho_new;
        }
    }

    fn solve_precond(&mut self, op: &LocalMatrix<T>, rhs: &Vector<T>, x: &mut Vector<T>) {
        let (control, precond, [r0, r, p, v, t, phat, shat]) = self.base.parts::<7>();
        let Some(precond) = precond else { return };
        residual(op, rhs, x, r);
        if control.start(|| r.norm()) {
            return;
        }
        r0.copy_from(r);
        p.copy_from(r);
        let mut rho = r0.dot(r);

        loop {
            precond.solve_zero_sol(p, phat);
            op.apply(phat, v);
            let r0v = r0.dot(v);
            if r0v.is_zero() {
                control.breakdown("BiCGStab", "r0.v");
                return;
            }
            let alpha = rho / r0v;
            r.add_scale(v, -alpha);
            precond.solve_zero_sol(r, shat);
            op.apply(shat, t);
            let tt = t.dot(t);
            if tt.is_zero() {
                x.add_scale(phat, alpha);
                finish_on_zero_t(control, r, "t.t");
                return;
            }
            let omega = t.dot(r) / tt;
            x.scale_add2(T::one(), phat, alpha, shat, omega);
            r.add_scale(t, -omega);
            if control.step(|| r.norm()) {
                return;
            }

            let rho_new = r0.dot(r);
            if rho_new.is_zero() || omega.is_zero() {
                control.breakdown("BiCGStab", if omega.is_zero() { "omega" } else { "r0.r" });
                return;
            }
            let beta = (rho_new / rho) * (alpha / omega);
            p.scale_add2(beta, v, -beta * omega, r, T::one());
            rho = rho_new;
        }
    }
}

impl<'a, T: Real> Solver<'a, T> for BiCGStab<'a, T> {
    fn name(&self) -> &'static str {
        "BiCGStab"
    }

    fn build(&mut self) {
        let work: &[&str] = if self.base.has_preconditioner() {
            &["r0", "r", "p", "v", "t", "phat", "shat"]
        } else {
            &["r0", "r", "p", "v", "t"]
        };
        self.base.build("BiCGStab", work);
    }

    fn clear(&mut self) {
        self.base.clear();
    }

    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        let op = self.base.begin_solve("BiCGStab", rhs, x);
        if self.base.has_preconditioner() {
            self.solve_precond(op, rhs, x);
        } else {
            self.solve_non_precond(op, rhs, x);
        }
        self.base.finish("BiCGStab")
    }

    delegate_to_base!();
}

impl_iterative_solver!(BiCGStab);
