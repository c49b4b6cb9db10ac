use super::{residual, work_vector, IterativeBase, Solver};
use crate::control::SolveReport;
use hetla_core::{require, LocalMatrix, Migrate, Real, Vector};
use log::debug;

const DEFAULT_RESTART: usize = 30;

/// Restarted GMRES(m) with modified Gram-Schmidt orthogonalization and
/// Givens rotations. A preconditioner is applied from the right.
#[derive(Debug)]
pub struct Gmres<'a, T: Real> {
    base: IterativeBase<'a, T>,
    restart: usize,
    /// Krylov basis, `restart + 1` vectors, allocated at build.
    basis: Vec<Vector<T>>,
}

impl<'a, T: Real> Default for Gmres<'a, T> {
    fn default() -> Self {
        Self {
            base: IterativeBase::default(),
            restart: DEFAULT_RESTART,
            basis: Vec::new(),
        }
    }
}

/// Upper Hessenberg matrix of one restart cycle with its rotations, kept
/// on the host.
struct Arnoldi<T> {
    m: usize,
    /// Column-major, `(m + 1) x m`.
    h: Vec<T>,
    cs: Vec<T>,
    sn: Vec<T>,
    g: Vec<T>,
}

impl<T: Real> Arnoldi<T> {
    fn new(m: usize, beta: T) -> Self {
        let mut g = vec![T::zero(); m + 1];
        g[0] = beta;
        Self {
            m,
            h: vec![T::zero(); (m + 1) * m],
            cs: vec![T::zero(); m],
            sn: vec![T::zero(); m],
            g,
        }
    }

    fn at(&mut self, row: usize, col: usize) -> &mut T {
        &mut self.h[col * (self.m + 1) + row]
    }

    /// Applies the previous rotations to column `j`, then eliminates
    /// `h[j+1][j]`. Returns the new residual estimate `|g[j+1]|`.
    fn rotate(&mut self, j: usize) -> T {
        for i in 0..j {
            let (c, s) = (self.cs[i], self.sn[i]);
            let a = *self.at(i, j);
            let b = *self.at(i + 1, j);
            *self.at(i, j) = c * a + s * b;
            *self.at(i + 1, j) = -s * a + c * b;
        }
        let a = *self.at(j, j);
        let b = *self.at(j + 1, j);
        let r = a.hypot(b);
        let (c, s) = if r.is_zero() {
            (T::one(), T::zero())
        } else {
            (a / r, b / r)
        };
        self.cs[j] = c;
        self.sn[j] = s;
        *self.at(j, j) = r;
        *self.at(j + 1, j) = T::zero();
        self.g[j + 1] = -s * self.g[j];
        self.g[j] = c * self.g[j];
        self.g[j + 1].abs()
    }

    /// Back substitution for the leading `k x k` triangle.
    fn coefficients(&mut self, k: usize) -> Vec<T> {
        let mut y = vec![T::zero(); k];
        for i in (0..k).rev() {
            let mut sum = self.g[i];
            for l in (i + 1)..k {
                sum = sum - *self.at(i, l) * y[l];
            }
            let diag = *self.at(i, i);
            y[i] = if diag.is_zero() { T::zero() } else { sum / diag };
        }
        y
    }
}

impl<'a, T: Real> Gmres<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Krylov dimension `m` between restarts. Must precede `build`.
    pub fn set_restart(&mut self, restart: usize) {
        require!(
            !self.base.is_built(),
            "GMRES: the restart length cannot change after Build"
        );
        require!(restart > 0, "GMRES: the restart length must be positive");
        self.restart = restart;
    }

    pub fn restart(&self) -> usize {
        self.restart
    }

    fn iterate(&mut self, op: &LocalMatrix<T>, rhs: &Vector<T>, x: &mut Vector<T>) {
        const NAME: &str = "GMRES";
        let m = self.restart;
        let basis = &mut self.basis;
        let (control, mut precond, [r, w, z]) = self.base.parts::<3>();

        residual(op, rhs, x, r);
        let mut beta = r.norm();
        if control.start(|| beta) {
            return;
        }

        loop {
            if beta.is_zero() {
                // exact solution reached on a restart in sweep mode
                return;
            }
            let mut arnoldi = Arnoldi::new(m, beta);
            basis[0].copy_from(r);
            basis[0].scale(T::one() / beta);

            let mut k = 0;
            let mut stop = false;
            while k < m {
                let j = k;
                match precond.as_deref_mut() {
                    Some(p) => {
                        p.solve_zero_sol(&basis[j], z);
                        op.apply(z, w);
                    }
                    None => op.apply(&basis[j], w),
                }
                for i in 0..=j {
                    let hij = w.dot(&basis[i]);
                    *arnoldi.at(i, j) = hij;
                    w.add_scale(&basis[i], -hij);
                }
                let h_next = w.norm();
                *arnoldi.at(j + 1, j) = h_next;
                if !h_next.is_zero() {
                    basis[j + 1].copy_from(w);
                    basis[j + 1].scale(T::one() / h_next);
                }
                let estimate = arnoldi.rotate(j);
                k += 1;
                stop = control.step(|| estimate);
                if stop {
                    break;
                }
                if h_next.is_zero() {
                    debug!("{}: invariant subspace found after {} steps", NAME, k);
                    break;
                }
            }

            // x += M^-1 V y
            let y = arnoldi.coefficients(k);
            w.zeros();
            for (i, yi) in y.iter().enumerate() {
                w.add_scale(&basis[i], *yi);
            }
            match precond.as_deref_mut() {
                Some(p) => {
                    p.solve_zero_sol(w, z);
                    x.add_scale(z, T::one());
                }
                None => x.add_scale(w, T::one()),
            }
            if stop {
                return;
            }

            residual(op, rhs, x, r);
            beta = r.norm();
            debug!("{}: restart with residual {:e}", NAME, beta.to_f64_lossy());
        }
    }
}

impl<'a, T: Real> Solver<'a, T> for Gmres<'a, T> {
    fn name(&self) -> &'static str {
        "GMRES"
    }

    fn build(&mut self) {
        let op = self.base.build("GMRES", &["r", "w", "z"]);
        self.basis = (0..=self.restart)
            .map(|i| work_vector(op, &format!("GMRES v{}", i)))
            .collect();
    }

    fn clear(&mut self) {
        self.basis.clear();
        self.base.clear();
    }

    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        let op = self.base.begin_solve("GMRES", rhs, x);
        self.iterate(op, rhs, x);
        self.base.finish("GMRES")
    }

    fn set_operator(&mut self, op: &'a LocalMatrix<T>) {
        self.base.set_operator(op, "GMRES");
    }

    fn is_built(&self) -> bool {
        self.base.is_built()
    }

    fn set_mode(&mut self, mode: crate::control::SolverMode) {
        self.base.set_mode(mode);
    }

    fn move_to_accelerator(&mut self) {
        self.basis.iter_mut().for_each(Migrate::move_to_accelerator);
        self.base.move_to_accelerator();
    }

    fn move_to_host(&mut self) {
        self.basis.iter_mut().for_each(Migrate::move_to_host);
        self.base.move_to_host();
    }
}

impl_iterative_solver!(Gmres);
