use super::{residual, IterativeBase, Solver};
use crate::control::SolveReport;
use hetla_core::{require, LocalMatrix, Real, Vector};

/// Chebyshev iteration for operators whose spectrum lies in a known real
/// interval `[lambda_min, lambda_max]` with `0 < lambda_min`.
///
/// Uses no inner products besides the residual norm, which makes it a good
/// smoother. With a preconditioner the bounds refer to `M^-1 A`.
#[derive(Debug)]
pub struct Chebyshev<'a, T: Real> {
    base: IterativeBase<'a, T>,
    bounds: Option<(T, T)>,
}

impl<'a, T: Real> Default for Chebyshev<'a, T> {
    fn default() -> Self {
        Self {
            base: IterativeBase::default(),
            bounds: None,
        }
    }
}

/// Step lengths of the three-term recurrence. `c` is the centre of the
/// interval and `d` its half-width.
#[derive(Debug, Clone, Copy)]
struct Recurrence<T> {
    c: T,
    d: T,
    alpha: T,
    beta: T,
    step: usize,
}

impl<T: Real> Recurrence<T> {
    fn new(lambda_min: T, lambda_max: T) -> Self {
        let two = T::from_f64(2.0);
        Self {
            c: (lambda_max + lambda_min) / two,
            d: (lambda_max - lambda_min) / two,
            alpha: T::zero(),
            beta: T::zero(),
            step: 0,
        }
    }

    /// Advances to the next `(alpha, beta)`; `p = beta p + z`, `x += alpha p`.
    fn advance(&mut self) {
        let half = T::from_f64(0.5);
        match self.step {
            0 => {
                self.beta = T::zero();
                self.alpha = T::one() / self.c;
            }
            1 => {
                let ratio = self.d / self.c;
                self.beta = half * ratio * ratio;
                self.alpha = T::one() / (self.c - self.beta / self.alpha);
            }
            _ => {
                let b = self.d * self.alpha * half;
                self.beta = b * b;
                self.alpha = T::one() / (self.c - self.beta / self.alpha);
            }
        }
        self.step += 1;
    }
}

impl<'a, T: Real> Chebyshev<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the spectral interval. Must precede `build`.
    pub fn set(&mut self, lambda_min: T, lambda_max: T) {
        require!(
            !self.base.is_built(),
            "Chebyshev: the spectral bounds cannot change after Build"
        );
        require!(
            lambda_min < lambda_max && lambda_min > T::zero(),
            "Chebyshev: invalid spectral interval [{}, {}]",
            lambda_min,
            lambda_max
        );
        self.bounds = Some((lambda_min, lambda_max));
    }

    pub fn bounds(&self) -> Option<(T, T)> {
        self.bounds
    }

    fn recurrence(&self) -> Recurrence<T> {
        let Some((lambda_min, lambda_max)) = self.bounds else {
            hetla_core::contract_violation!(Precondition, "Chebyshev: spectral bounds are not set");
        };
        Recurrence::new(lambda_min, lambda_max)
    }

    fn solve_non_precond(&mut self, op: &LocalMatrix<T>, rhs: &Vector<T>, x: &mut Vector<T>) {
        let mut rec = self.recurrence();
        let (control, _, [r, p, q]) = self.base.parts::<3>();
        residual(op, rhs, x, r);
        if control.start(|| r.norm()) {
            return;
        }
        loop {
            rec.advance();
            // p = beta p + r
            p.scale_add(rec.beta, r);
            x.add_scale(p, rec.alpha);
            op.apply(p, q);
            r.add_scale(q, -rec.alpha);
            if control.step(|| r.norm()) {
                return;
            }
        }
    }

    fn solve_precond(&mut self, op: &LocalMatrix<T>, rhs: &Vector<T>, x: &mut Vector<T>) {
        let mut rec = self.recurrence();
        let (control, precond, [r, z, p, q]) = self.base.parts::<4>();
        let Some(precond) = precond else { return };
        residual(op, rhs, x, r);
        if control.start(|| r.norm()) {
            return;
        }
        loop {
            rec.advance();
            precond.solve_zero_sol(r, z);
            p.scale_add(rec.beta, z);
            x.add_scale(p, rec.alpha);
            op.apply(p, q);
            r.add_scale(q, -rec.alpha);
            if control.step(|| r.norm()) {
                return;
            }
        }
    }
}

impl<'a, T: Real> Solver<'a, T> for Chebyshev<'a, T> {
    fn name(&self) -> &'static str {
        "Chebyshev"
    }

    fn build(&mut self) {
        require!(
            self.bounds.is_some(),
            "Chebyshev: call set(lambda_min, lambda_max) before Build"
        );
        let work: &[&str] = if self.base.has_preconditioner() {
            &["r", "z", "p", "q"]
        } else {
            &["r", "p", "q"]
        };
        self.base.build("Chebyshev", work);
    }

    fn clear(&mut self) {
        self.base.clear();
    }

    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        let op = self.base.begin_solve("Chebyshev", rhs, x);
        if self.base.has_preconditioner() {
            self.solve_precond(op, rhs, x);
        } else {
            self.solve_non_precond(op, rhs, x);
        }
        self.base.finish("Chebyshev")
    }

    delegate_to_base!();
}

impl_iterative_solver!(Chebyshev);
