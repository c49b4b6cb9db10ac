use super::Solver;
use crate::control::{SolveReport, SolverMode};
use hetla_core::{contract_violation, require, Dimensions, LocalMatrix, Migrate, Real, Vector};
use log::{debug, info};

/// Dense LU factorization with partial pivoting, computed and applied on
/// the host. Intended for small systems such as the coarsest multigrid
/// level; right-hand sides on an accelerator are copied over and back.
#[derive(Debug, Default)]
pub struct DirectLu<'a, T: Real> {
    op: Option<&'a LocalMatrix<T>>,
    factors: Option<LuFactors<T>>,
}

/// `P A = L U`, with the unit lower `L` and `U` packed row-major.
#[derive(Debug, Clone)]
struct LuFactors<T> {
    n: usize,
    lu: Vec<T>,
    /// Row exchanged with row `k` at elimination step `k`.
    pivots: Vec<usize>,
}

impl<T: Real> LuFactors<T> {
    /// `None` when a pivot is exactly zero.
    fn factorize(n: usize, mut lu: Vec<T>) -> Option<Self> {
        let mut pivots = Vec::with_capacity(n);
        for k in 0..n {
            let (mut pivot_row, mut pivot_abs) = (k, lu[k * n + k].abs());
            for i in (k + 1)..n {
                let candidate = lu[i * n + k].abs();
                if candidate > pivot_abs {
                    pivot_row = i;
                    pivot_abs = candidate;
                }
            }
            if pivot_abs.is_zero() {
                return None;
            }
            if pivot_row != k {
                for j in 0..n {
                    lu.swap(k * n + j, pivot_row * n + j);
                }
            }
            pivots.push(pivot_row);

            let pivot = lu[k * n + k];
            for i in (k + 1)..n {
                let factor = lu[i * n + k] / pivot;
                lu[i * n + k] = factor;
                if factor.is_zero() {
                    continue;
                }
                for j in (k + 1)..n {
                    lu[i * n + j] = lu[i * n + j] - factor * lu[k * n + j];
                }
            }
        }
        Some(Self { n, lu, pivots })
    }

    fn solve_in_place(&self, b: &mut [T]) {
        let n = self.n;
        for (k, &p) in self.pivots.iter().enumerate() {
            b.swap(k, p);
        }
        for i in 1..n {
            let row = &self.lu[i * n..i * n + i];
            let sum = row.iter().zip(&b[..i]).fold(T::zero(), |acc, (l, y)| acc + *l * *y);
            b[i] = b[i] - sum;
        }
        for i in (0..n).rev() {
            let row = &self.lu[i * n + i + 1..(i + 1) * n];
            let sum = row
                .iter()
                .zip(&b[i + 1..])
                .fold(T::zero(), |acc, (u, x)| acc + *u * *x);
            b[i] = (b[i] - sum) / self.lu[i * n + i];
        }
    }
}

impl<'a, T: Real> DirectLu<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a, T: Real> Solver<'a, T> for DirectLu<'a, T> {
    fn name(&self) -> &'static str {
        "DirectLU"
    }

    fn set_operator(&mut self, op: &'a LocalMatrix<T>) {
        require!(
            self.factors.is_none(),
            "DirectLU: the operator cannot change after Build"
        );
        self.op = Some(op);
    }

    fn build(&mut self) {
        require!(
            self.factors.is_none(),
            "DirectLU: Build called twice without Clear"
        );
        let Some(op) = self.op else {
            contract_violation!(Precondition, "DirectLU: Build requires an operator");
        };
        require!(
            op.is_square(),
            "DirectLU: operator '{}' is {}x{}, expected a square matrix",
            op.name(),
            op.rows(),
            op.cols()
        );
        if op.is_accelerator() {
            debug!("DirectLU: factorizing '{}' on the host", op.name());
        }
        let n = op.rows();
        let dense = op.to_csr().to_dense();
        let Some(factors) = LuFactors::factorize(n, dense.into_data()) else {
            contract_violation!(
                Precondition,
                "DirectLU: operator '{}' is singular",
                op.name()
            );
        };
        info!("DirectLU built for '{}' ({} unknowns)", op.name(), n);
        self.factors = Some(factors);
    }

    fn clear(&mut self) {
        self.factors = None;
    }

    fn is_built(&self) -> bool {
        self.factors.is_some()
    }

    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        let Some(factors) = self.factors.as_ref() else {
            contract_violation!(Precondition, "DirectLU: Solve called before Build");
        };
        require!(
            rhs.size() == factors.n && x.size() == factors.n,
            "DirectLU: rhs ({}) and solution ({}) must have {} elements",
            rhs.size(),
            x.size(),
            factors.n
        );
        let mut values = rhs.to_vec();
        factors.solve_in_place(&mut values);
        x.copy_from_data(&values);
        SolveReport::direct()
    }

    fn solve_zero_sol(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        self.solve(rhs, x)
    }

    fn set_mode(&mut self, _mode: SolverMode) {}

    fn move_to_accelerator(&mut self) {}

    fn move_to_host(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factorization_needs_pivoting() {
        // zero leading entry forces a row exchange
        let a = vec![0.0, 2.0, 1.0, 1.0, 1.0, 0.0, 3.0, 0.0, 1.0];
        let factors = LuFactors::factorize(3, a.clone()).unwrap();
        let x_true = [1.0, -2.0, 3.0];
        let mut b: Vec<f64> = (0..3)
            .map(|i| (0..3).map(|j| a[i * 3 + j] * x_true[j]).sum())
            .collect();
        factors.solve_in_place(&mut b);
        for (got, want) in b.iter().zip(x_true) {
            assert!((got - want).abs() < 1e-14, "{} vs {}", got, want);
        }
    }

    #[test]
    fn singular_matrix_is_detected() {
        let a = vec![1.0f32, 2.0, 2.0, 4.0];
        assert!(LuFactors::factorize(2, a).is_none());
    }
}
