use super::{residual, IterativeBase, Solver};
use crate::control::SolveReport;
use hetla_core::{LocalMatrix, Real, Vector};

/// Quasi-Minimal Residual variant of BiCGStab.
///
/// Each iteration performs the two BiCGStab half steps and smooths the
/// iterate with a quasi-minimization after each of them. The stopping rule
/// is applied to the quasi-residual bound `tau * sqrt(j + 1)`, `j` being the
/// number of half steps, which bounds the true residual norm.
///
/// A preconditioner is applied from the right: the recurrences run on
/// `A M^-1` and the accumulated correction is mapped back through `M^-1`
/// once at the end.
#[derive(Debug)]
pub struct QmrCgStab<'a, T: Real> {
    base: IterativeBase<'a, T>,
}

impl<'a, T: Real> Default for QmrCgStab<'a, T> {
    fn default() -> Self {
        Self {
            base: IterativeBase::default(),
        }
    }
}

/// Parameters of one quasi-minimization step.
struct QuasiMin<T> {
    theta: T,
    tau: T,
    eta: T,
}

fn quasi_minimize<T: Real>(norm: T, tau: T, step: T) -> QuasiMin<T> {
    let theta = norm / tau;
    let c = T::one() / (T::one() + theta * theta).sqrt();
    QuasiMin {
        theta,
        tau: tau * theta * c,
        eta: c * c * step,
    }
}

/// `y = A M^-1 w`
fn apply_right<'a, T: Real>(
    op: &LocalMatrix<T>,
    precond: Option<&mut (dyn Solver<'a, T> + 'a)>,
    scratch: &mut Vector<T>,
    w: &Vector<T>,
    y: &mut Vector<T>,
) {
    match precond {
        Some(m) => {
            m.solve_zero_sol(w, scratch);
            op.apply(scratch, y);
        }
        None => op.apply(w, y),
    }
}

impl<'a, T: Real> QmrCgStab<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn iterate(&mut self, op: &LocalMatrix<T>, rhs: &Vector<T>, x: &mut Vector<T>) {
        const NAME: &str = "QMRCGStab";
        let (control, mut precond, [r0, r, p, v, s, t, d, scratch, update]) =
            self.base.parts::<9>();

        residual(op, rhs, x, r);
        if control.start(|| r.norm()) {
            return;
        }

        r0.copy_from(r);
        p.copy_from(r);
        d.zeros();
        update.zeros();
        let mut tau = r.norm();
        let mut theta = T::zero();
        let mut eta = T::zero();
        let mut rho = r0.dot(r);
        let mut half_steps = 0usize;
        let bound = |tau: T, half_steps: usize| tau * T::from_f64((half_steps + 1) as f64).sqrt();

        loop {
            apply_right(op, precond.as_deref_mut(), scratch, p, v);
            let r0v = r0.dot(v);
            if r0v.is_zero() {
                control.breakdown(NAME, "r0.v");
                break;
            }
            let alpha = rho / r0v;
            s.copy_from(r);
            s.add_scale(v, -alpha);

            // First quasi-minimization
            let first = quasi_minimize(s.norm(), tau, alpha);
            d.scale_add(theta * theta * eta / alpha, p);
            update.add_scale(d, first.eta);
            half_steps += 1;
            if first.tau.is_zero() {
                control.step(|| bound(first.tau, half_steps));
                break;
            }

            apply_right(op, precond.as_deref_mut(), scratch, s, t);
            let tt = t.dot(t);
            if tt.is_zero() {
                control.breakdown(NAME, "t.t");
                break;
            }
            let omega = t.dot(s) / tt;
            if omega.is_zero() {
                control.breakdown(NAME, "omega");
                break;
            }
            r.copy_from(s);
            r.add_scale(t, -omega);

            // Second quasi-minimization
            let second = quasi_minimize(r.norm(), first.tau, omega);
            d.scale_add(first.theta * first.theta * first.eta / omega, s);
            update.add_scale(d, second.eta);
            half_steps += 1;
            theta = second.theta;
            tau = second.tau;
            eta = second.eta;
            if control.step(|| bound(tau, half_steps)) {
                break;
            }

            let rho_new = r0.dot(r);
            if rho_new.is_zero() {
                control.breakdown(NAME, "r0.r");
                break;
            }
            let beta = (rho_new / rho) * (alpha / omega);
            // p = r + beta (p - omega v)
            p.scale_add2(beta, v, -beta * omega, r, T::one());
            rho = rho_new;
        }

        match precond {
            Some(m) => {
                m.solve_zero_sol(update, scratch);
                x.add_scale(scratch, T::one());
            }
            None => x.add_scale(update, T::one()),
        }
    }
}

impl<'a, T: Real> Solver<'a, T> for QmrCgStab<'a, T> {
    fn name(&self) -> &'static str {
        "QMRCGStab"
    }

    fn build(&mut self) {
        self.base.build(
            "QMRCGStab",
            &["r0", "r", "p", "v", "s", "t", "d", "scratch", "update"],
        );
    }

    fn clear(&mut self) {
        self.base.clear();
    }

    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        let op = self.base.begin_solve("QMRCGStab", rhs, x);
        self.iterate(op, rhs, x);
        self.base.finish("QMRCGStab")
    }

    delegate_to_base!();
}

impl_iterative_solver!(QmrCgStab);
