use super::{work_vector, Solver};
use crate::control::{SolveReport, SolverMode};
use hetla_core::{contract_violation, require, LocalMatrix, Migrate, Real, Vector};

/// Jacobi preconditioner `M = diag(A)`; one application is `x = D^-1 b`.
#[derive(Debug, Default)]
pub struct Jacobi<'a, T: Real> {
    op: Option<&'a LocalMatrix<T>>,
    inv_diag: Option<Vector<T>>,
}

impl<'a, T: Real> Jacobi<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a, T: Real> Solver<'a, T> for Jacobi<'a, T> {
    fn name(&self) -> &'static str {
        "Jacobi"
    }

    fn set_operator(&mut self, op: &'a LocalMatrix<T>) {
        require!(
            self.inv_diag.is_none(),
            "Jacobi: the operator cannot change after Build"
        );
        self.op = Some(op);
    }

    fn build(&mut self) {
        require!(self.inv_diag.is_none(), "Jacobi: Build called twice without Clear");
        let Some(op) = self.op else {
            contract_violation!(Precondition, "Jacobi: Build requires an operator");
        };
        let mut inv_diag = work_vector(op, "Jacobi inverse diagonal");
        op.extract_inverse_diagonal(&mut inv_diag);
        self.inv_diag = Some(inv_diag);
    }

    fn clear(&mut self) {
        self.inv_diag = None;
    }

    fn is_built(&self) -> bool {
        self.inv_diag.is_some()
    }

    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        let Some(inv_diag) = self.inv_diag.as_ref() else {
            contract_violation!(Precondition, "Jacobi: Solve called before Build");
        };
        x.pointwise_mult2(inv_diag, rhs);
        SolveReport::direct()
    }

    fn solve_zero_sol(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        // x is overwritten anyway
        self.solve(rhs, x)
    }

    fn set_mode(&mut self, _mode: SolverMode) {}

    fn move_to_accelerator(&mut self) {
        if let Some(d) = self.inv_diag.as_mut() {
            d.move_to_accelerator();
        }
    }

    fn move_to_host(&mut self) {
        if let Some(d) = self.inv_diag.as_mut() {
            d.move_to_host();
        }
    }
}
