use hetla_core::contract::catch;
use hetla_core::{Dimensions, ViolationKind};
use hetla_solver::{
    BackendDescriptor, Chebyshev, ConjugateGradient, CsrMatrix, Cycle, DirectLu, FixedPoint,
    IterativeSolver, Jacobi, LocalMatrix, Migrate, Multigrid, Solver, SolverMode, Triplet, Vector,
};
use std::sync::Arc;

fn backend() -> Arc<BackendDescriptor> {
    let _ = env_logger::builder().is_test(true).try_init();
    BackendDescriptor::with_simulated_accelerator().unwrap()
}

fn assert_approx_eq_vec(a: &[f64], b: &[f64], tolerance: f64) {
    assert_eq!(a.len(), b.len(), "Vector lengths differ");
    for i in 0..a.len() {
        let diff = (a[i] - b[i]).abs();
        assert!(
            diff <= tolerance,
            "Verification failed at index {}: expected {}, got {}, diff {}",
            i,
            b[i],
            a[i],
            diff
        );
    }
}

/// 1D Poisson matrix `tridiag(-1, 2, -1)`.
fn poisson1d(n: usize) -> CsrMatrix<f64> {
    let mut triplets = Vec::new();
    for i in 0..n {
        triplets.push(Triplet::new(i, i, 2.0));
        if i + 1 < n {
            triplets.push(Triplet::new(i, i + 1, -1.0));
            triplets.push(Triplet::new(i + 1, i, -1.0));
        }
    }
    CsrMatrix::from_triplets(n, n, &triplets).unwrap()
}

/// Linear interpolation from `(n - 1) / 2` coarse points (the odd fine
/// points) to `n` fine points.
fn interpolation(n: usize) -> CsrMatrix<f64> {
    let m = (n - 1) / 2;
    let mut triplets = Vec::new();
    for j in 0..m {
        triplets.push(Triplet::new(2 * j, j, 0.5));
        triplets.push(Triplet::new(2 * j + 1, j, 1.0));
        triplets.push(Triplet::new(2 * j + 2, j, 0.5));
    }
    CsrMatrix::from_triplets(n, m, &triplets).unwrap()
}

/// Galerkin hierarchy: fine operator, then per coarser level `(R, P, RAP)`.
struct Hierarchy {
    fine: LocalMatrix<f64>,
    restrict: Vec<LocalMatrix<f64>>,
    prolong: Vec<LocalMatrix<f64>>,
    coarse: Vec<LocalMatrix<f64>>,
}

impl Hierarchy {
    fn new(backend: &Arc<BackendDescriptor>, n: usize, levels: usize) -> Self {
        let fine = LocalMatrix::from_csr(backend, "A0", poisson1d(n));
        let (mut restrict, mut prolong, mut coarse) = (Vec::new(), Vec::new(), Vec::new());
        let mut size = n;
        for l in 1..levels {
            let p = LocalMatrix::from_csr(backend, &format!("P{}", l), interpolation(size));
            let r = LocalMatrix::from_csr(backend, &format!("R{}", l), p.transpose());
            let a = coarse.last().unwrap_or(&fine);
            let ap = LocalMatrix::from_csr(backend, "AP", a.multiply(&p));
            let rap = LocalMatrix::from_csr(backend, &format!("A{}", l), r.multiply(&ap));
            size = rap.rows();
            restrict.push(r);
            prolong.push(p);
            coarse.push(rap);
        }
        Self {
            fine,
            restrict,
            prolong,
            coarse,
        }
    }

    fn move_to_accelerator(&mut self) {
        self.fine.move_to_accelerator();
        for m in self
            .restrict
            .iter_mut()
            .chain(self.prolong.iter_mut())
            .chain(self.coarse.iter_mut())
        {
            m.move_to_accelerator();
        }
    }

    fn multigrid(&self, levels: usize) -> Multigrid<'_, f64> {
        let mut mg = Multigrid::new();
        mg.set_levels(levels);
        mg.set_operator(&self.fine);
        mg.set_operator_hierarchy(self.coarse.iter().collect());
        mg.set_restrict_operator(self.restrict.iter().collect());
        mg.set_prolong_operator(self.prolong.iter().collect());
        mg
    }
}

fn rhs(n: usize) -> Vec<f64> {
    (0..n).map(|i| ((i * 37 % 11) as f64) - 5.0).collect()
}

fn vectors(a: &LocalMatrix<f64>, data: &[f64]) -> (Vector<f64>, Vector<f64>) {
    let mut b = Vector::from_slice(a.backend(), "b", data);
    let mut x: Vector<f64> = Vector::with_size(a.backend(), "x", data.len());
    if a.is_accelerator() {
        b.move_to_accelerator();
        x.move_to_accelerator();
    }
    (b, x)
}

fn true_residual(a: &LocalMatrix<f64>, b: &[f64], x: &[f64]) -> f64 {
    let csr = a.to_csr();
    let mut r = b.to_vec();
    for t in csr.iter() {
        r[t.row] -= t.value * x[t.col];
    }
    r.iter().map(|v| v * v).sum::<f64>().sqrt()
}

#[test]
fn galerkin_coarse_operator_is_scaled_poisson() {
    let backend = backend();
    let hierarchy = Hierarchy::new(&backend, 15, 2);
    let coarse = hierarchy.coarse[0].to_csr();
    assert_eq!(coarse.dims(), (7, 7));
    // R A P of linear interpolation is tridiag(-1, 2, -1) / 2
    assert_eq!(coarse.get(3, 3), Some(1.0));
    assert_eq!(coarse.get(3, 2), Some(-0.5));
    assert_eq!(coarse.get(3, 5).unwrap_or(0.0), 0.0);
}

#[test]
fn two_level_v_cycle_on_poisson_line() {
    let backend = backend();
    let n = 63;
    let hierarchy = Hierarchy::new(&backend, n, 2);
    let mut mg = hierarchy.multigrid(2);
    mg.set_smoother_pre_iter(2);
    mg.set_smoother_post_iter(2);
    mg.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
    mg.control_mut().set_max_iterations(50);
    mg.control_mut().set_residual_history(true);
    mg.build();
    mg.info();

    let data = rhs(n);
    let (b, mut x) = vectors(&hierarchy.fine, &data);
    let report = mg.solve(&b, &mut x);
    assert!(report.is_converged(), "{:?}", report);

    let history = mg.control().history();
    let cycles = history.len() - 1;
    assert_eq!(cycles, report.iterations);
    let mean_reduction = (history[cycles] / history[0]).powf(1.0 / cycles as f64);
    assert!(
        mean_reduction <= 0.1,
        "mean residual reduction per cycle {}",
        mean_reduction
    );
    assert!(true_residual(&hierarchy.fine, &data, &x.to_vec()) <= 1e-9);
}

/// Bilinear interpolation on an `n x n` grid: the tensor product of the 1D
/// linear interpolation with itself.
fn bilinear_interpolation(n: usize) -> CsrMatrix<f64> {
    let line = interpolation(n);
    let m = line.cols();
    let mut triplets = Vec::new();
    for ty in line.iter() {
        for tx in line.iter() {
            triplets.push(Triplet::new(
                ty.row * n + tx.row,
                ty.col * m + tx.col,
                ty.value * tx.value,
            ));
        }
    }
    CsrMatrix::from_triplets(n * n, m * m, &triplets).unwrap()
}

#[test]
fn two_level_v_cycle_on_laplace_grid_damps_smooth_error() {
    let backend = backend();
    let size = 31;
    let fine = LocalMatrix::<f64>::laplace2d(&backend, "A0", size);
    let p = LocalMatrix::from_csr(&backend, "P", bilinear_interpolation(size));
    let r = LocalMatrix::from_csr(&backend, "R", p.transpose());
    let ap = LocalMatrix::from_csr(&backend, "AP", fine.multiply(&p));
    let coarse = LocalMatrix::from_csr(&backend, "A1", r.multiply(&ap));
    assert_eq!(coarse.dims(), (225, 225));

    let mut mg = Multigrid::new();
    mg.set_levels(2);
    mg.set_operator(&fine);
    mg.set_operator_hierarchy(vec![&coarse]);
    mg.set_restrict_operator(vec![&r]);
    mg.set_prolong_operator(vec![&p]);
    mg.set_smoother_pre_iter(2);
    mg.set_smoother_post_iter(2);
    mg.control_mut().set_tolerances(1e-15, 1e-10, 1e8);
    mg.control_mut().set_max_iterations(20);
    mg.control_mut().set_residual_history(true);
    mg.build();

    // b = 0, so the iterate is the error; start from the smoothest mode
    let h = std::f64::consts::PI / (size + 1) as f64;
    let x0: Vec<f64> = (0..size * size)
        .map(|k| ((k / size + 1) as f64 * h).sin() * ((k % size + 1) as f64 * h).sin())
        .collect();
    let b: Vector<f64> = Vector::with_size(&backend, "b", size * size);
    let mut x = Vector::from_slice(&backend, "x", &x0);
    let report = mg.solve(&b, &mut x);
    assert!(report.is_converged(), "{:?}", report);

    let history = mg.control().history();
    assert!(history.len() >= 2);
    for (k, pair) in history.windows(2).enumerate() {
        let ratio = pair[1] / pair[0];
        assert!(ratio <= 0.1, "V-cycle {} reduced the residual only by {}", k + 1, ratio);
    }
}

#[test]
fn w_and_f_cycles_on_three_levels() {
    let backend = backend();
    let n = 127;
    let hierarchy = Hierarchy::new(&backend, n, 3);
    assert_eq!(hierarchy.coarse[1].rows(), 31);
    let data = rhs(n);

    for cycle in [Cycle::V, Cycle::W, Cycle::F] {
        for scaling in [true, false] {
            let mut mg = hierarchy.multigrid(3);
            mg.set_cycle(cycle);
            mg.set_scaling(scaling);
            mg.set_smoother_pre_iter(2);
            mg.set_smoother_post_iter(2);
            mg.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
            mg.control_mut().set_max_iterations(40);
            mg.build();
            let (b, mut x) = vectors(&hierarchy.fine, &data);
            let report = mg.solve(&b, &mut x);
            assert!(
                report.is_converged(),
                "{:?} cycle (scaling {}): {:?}",
                cycle,
                scaling,
                report
            );
            assert!(report.iterations <= 20, "{:?}: {:?}", cycle, report);
        }
    }
}

#[test]
fn multigrid_on_the_accelerator() {
    let backend = backend();
    let n = 63;
    let mut hierarchy = Hierarchy::new(&backend, n, 3);
    hierarchy.move_to_accelerator();
    let mut mg = hierarchy.multigrid(3);
    mg.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
    mg.control_mut().set_max_iterations(60);
    mg.build();

    let data = rhs(n);
    let (b, mut x) = vectors(&hierarchy.fine, &data);
    let report = mg.solve(&b, &mut x);
    assert!(report.is_converged(), "{:?}", report);
    assert!(x.is_accelerator());
    assert!(true_residual(&hierarchy.fine, &data, &x.to_vec()) <= 1e-9);
}

#[test]
fn multigrid_preconditioned_cg() {
    let backend = backend();
    let n = 127;
    let hierarchy = Hierarchy::new(&backend, n, 3);
    // scaling makes the cycle non-linear, keep it off inside CG
    let mut mg = hierarchy.multigrid(3);
    mg.set_scaling(false);

    let mut cg = ConjugateGradient::new();
    cg.set_preconditioner(Box::new(mg));
    cg.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
    cg.control_mut().set_max_iterations(100);
    cg.set_operator(&hierarchy.fine);
    cg.build();

    let data = rhs(n);
    let (b, mut x) = vectors(&hierarchy.fine, &data);
    let report = cg.solve(&b, &mut x);
    assert!(report.is_converged(), "{:?}", report);
    assert!(report.iterations <= 15, "{:?}", report);
    assert!(true_residual(&hierarchy.fine, &data, &x.to_vec()) <= 1e-8);
}

#[test]
fn preconditioner_mode_runs_one_cycle() {
    let backend = backend();
    let n = 31;
    let hierarchy = Hierarchy::new(&backend, n, 2);
    let mut mg = hierarchy.multigrid(2);
    mg.set_mode(SolverMode::Preconditioner);
    assert_eq!(mg.control().max_iterations(), 1);
    mg.build();
    let (b, mut x) = vectors(&hierarchy.fine, &rhs(n));
    let report = mg.solve_zero_sol(&b, &mut x);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.initial_residual, 0.0);
}

/// Chebyshev on the upper part of the fine spectrum, damped Jacobi below.
fn smoothers<'a>() -> Vec<Box<dyn IterativeSolver<'a, f64> + 'a>> {
    let mut chebyshev = Chebyshev::new();
    chebyshev.set(0.5, 4.0);
    let mut fixed_point = FixedPoint::new();
    fixed_point.set_relaxation(0.6);
    fixed_point.set_preconditioner(Box::new(Jacobi::new()));
    let mut smoothers: Vec<Box<dyn IterativeSolver<'a, f64> + 'a>> = Vec::new();
    smoothers.push(Box::new(chebyshev));
    smoothers.push(Box::new(fixed_point));
    smoothers
}

#[test]
fn custom_smoothers_and_coarse_solver() {
    let backend = backend();
    let n = 63;
    let hierarchy = Hierarchy::new(&backend, n, 3);
    let mut mg = hierarchy.multigrid(3);

    mg.set_smoother(smoothers());

    let mut coarse = ConjugateGradient::new();
    coarse.control_mut().set_tolerances(1e-15, 1e-12, 1e8);
    mg.set_coarse_solver(Box::new(coarse));
    mg.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
    mg.control_mut().set_max_iterations(60);
    mg.build();

    let data = rhs(n);
    let (b, mut x) = vectors(&hierarchy.fine, &data);
    assert!(mg.solve(&b, &mut x).is_converged());

    // configured solvers survive clear and rebuild
    mg.clear();
    mg.build();
    x.zeros();
    assert!(mg.solve(&b, &mut x).is_converged());
}

#[test]
fn single_level_is_the_coarse_solver() {
    let backend = backend();
    let a = LocalMatrix::from_csr(&backend, "A", poisson1d(20));
    let mut mg = Multigrid::new();
    mg.set_levels(1);
    mg.set_operator(&a);
    mg.build();
    let data = rhs(20);
    let (b, mut x) = vectors(&a, &data);
    let report = mg.solve(&b, &mut x);
    assert!(report.is_converged());
    assert_eq!(report.iterations, 1);

    let mut lu = DirectLu::new();
    let mut y: Vector<f64> = Vector::with_size(&backend, "y", 20);
    lu.set_operator(&a);
    lu.build();
    lu.solve(&b, &mut y);
    assert_approx_eq_vec(&x.to_vec(), &y.to_vec(), 1e-12);
}

#[test]
fn configuration_order_is_enforced() {
    let backend = backend();
    let hierarchy = Hierarchy::new(&backend, 15, 2);

    let mut mg = Multigrid::new();
    let err = catch(|| mg.set_operator_hierarchy(hierarchy.coarse.iter().collect())).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    let err = catch(|| mg.set_levels(0)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    mg.set_levels(2);
    let err = catch(|| mg.set_restrict_operator(hierarchy.restrict.iter().collect())).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    let err = catch(|| mg.set_operator_hierarchy(Vec::new())).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    mg.set_operator(&hierarchy.fine);
    mg.set_operator_hierarchy(hierarchy.coarse.iter().collect());
    let err = catch(|| mg.build()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    // transfer operators swapped
    mg.set_restrict_operator(hierarchy.prolong.iter().collect());
    mg.set_prolong_operator(hierarchy.restrict.iter().collect());
    let err = catch(|| mg.build()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    let mut mg = hierarchy.multigrid(2);
    mg.build();
    let err = catch(|| mg.build()).unwrap_err();
    assert!(err.message.contains("twice"));
    let err = catch(|| mg.set_smoother_pre_iter(3)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    mg.clear();
    mg.set_smoother_pre_iter(3);
    mg.build();
    assert!(mg.is_built());
}

#[test]
fn solve_before_build_is_a_violation() {
    let backend = backend();
    let hierarchy = Hierarchy::new(&backend, 15, 2);
    let mut mg = hierarchy.multigrid(2);
    let (b, mut x) = vectors(&hierarchy.fine, &rhs(15));
    let err = catch(|| mg.solve(&b, &mut x)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
}
