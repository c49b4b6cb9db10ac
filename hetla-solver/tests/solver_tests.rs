use hetla_core::contract::catch;
use hetla_core::{Dimensions, ViolationKind};
use hetla_solver::{
    BackendDescriptor, BiCGStab, Chebyshev, ConjugateGradient, Criterion, CsrMatrix, DirectLu,
    FixedPoint, Gmres, IterativeSolver, Jacobi, LocalMatrix, Migrate, QmrCgStab, SolveReport,
    Solver, SolverMode, SolverStatus, Triplet, Vector,
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

/// Symmetric, strictly diagonally dominant pentadiagonal matrix.
fn pentadiagonal(n: usize) -> CsrMatrix<f64> {
    let mut triplets = Vec::new();
    for i in 0..n {
        triplets.push(Triplet::new(i, i, 4.0));
        for (offset, value) in [(1, -1.0), (2, -0.5)] {
            if i + offset < n {
                triplets.push(Triplet::new(i, i + offset, value));
                triplets.push(Triplet::new(i + offset, i, value));
            }
        }
    }
    CsrMatrix::from_triplets(n, n, &triplets).unwrap()
}

/// Non-symmetric, strictly diagonally dominant matrix.
fn convection(n: usize) -> CsrMatrix<f64> {
    let mut triplets = Vec::new();
    for i in 0..n {
        triplets.push(Triplet::new(i, i, 4.0));
        if i > 0 {
            triplets.push(Triplet::new(i, i - 1, -1.5));
        }
        if i + 1 < n {
            triplets.push(Triplet::new(i, i + 1, -0.5));
        }
        if i + 3 < n {
            triplets.push(Triplet::new(i, i + 3, 0.3));
        }
    }
    CsrMatrix::from_triplets(n, n, &triplets).unwrap()
}

fn product(csr: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; csr.rows()];
    for t in csr.iter() {
        y[t.row] += t.value * x[t.col];
    }
    y
}

fn exact_solution(n: usize) -> Vec<f64> {
    (0..n).map(|i| (i as f64 * 0.3).sin() + 0.5).collect()
}

fn krylov_solvers<'a>(precond: bool) -> Vec<Box<dyn IterativeSolver<'a, f64> + 'a>> {
    let mut solvers: Vec<Box<dyn IterativeSolver<'a, f64> + 'a>> = vec![
        Box::new(ConjugateGradient::new()),
        Box::new(BiCGStab::new()),
        Box::new(QmrCgStab::new()),
        Box::new(Gmres::new()),
    ];
    for solver in solvers.iter_mut() {
        solver.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
        solver.control_mut().set_max_iterations(500);
        if precond {
            solver.set_preconditioner(Box::new(Jacobi::new()));
        }
    }
    solvers
}

/// Solves `A x = b` from `x = 0` on the placement of `a`.
fn run<'a, S: Solver<'a, f64> + ?Sized>(
    solver: &mut S,
    a: &'a LocalMatrix<f64>,
    rhs: &[f64],
) -> (Vec<f64>, SolveReport<f64>) {
    let backend = a.backend();
    let mut b = Vector::from_slice(backend, "b", rhs);
    let mut x: Vector<f64> = Vector::with_size(backend, "x", rhs.len());
    if a.is_accelerator() {
        b.move_to_accelerator();
        x.move_to_accelerator();
    }
    solver.set_operator(a);
    solver.build();
    let report = solver.solve(&b, &mut x);
    if a.is_accelerator() {
        assert!(x.is_accelerator());
    }
    (x.to_vec(), report)
}

#[test]
fn krylov_solvers_on_spd_system() {
    let backend = backend();
    let n = 60;
    let csr = pentadiagonal(n);
    let x_true = exact_solution(n);
    let rhs = product(&csr, &x_true);

    for accelerator in [false, true] {
        let mut a = LocalMatrix::from_csr(&backend, "A", csr.clone());
        if accelerator {
            a.move_to_accelerator();
        }
        for precond in [false, true] {
            for mut solver in krylov_solvers(precond) {
                let (x, report) = run(solver.as_mut(), &a, &rhs);
                assert!(
                    report.is_converged(),
                    "{} (precond {}) did not converge: {:?}",
                    solver.name(),
                    precond,
                    report
                );
                assert!(report.iterations > 0);
                assert_approx_eq_vec(&x, &x_true, 1e-7);
            }
        }
    }
}

#[test]
fn nonsymmetric_solvers_on_convection_system() {
    let backend = backend();
    let n = 80;
    let csr = convection(n);
    let x_true = exact_solution(n);
    let rhs = product(&csr, &x_true);

    for accelerator in [false, true] {
        let mut a = LocalMatrix::from_csr(&backend, "A", csr.clone());
        if accelerator {
            a.move_to_accelerator();
        }
        for precond in [false, true] {
            for mut solver in krylov_solvers(precond)
                .into_iter()
                .filter(|s| s.name() != "CG")
            {
                let (x, report) = run(solver.as_mut(), &a, &rhs);
                assert!(
                    report.is_converged(),
                    "{} (precond {}) did not converge: {:?}",
                    solver.name(),
                    precond,
                    report
                );
                assert_approx_eq_vec(&x, &x_true, 1e-7);
            }
        }
    }
}

#[test]
fn gmres_restarts_with_a_short_basis() {
    let backend = backend();
    let n = 80;
    let csr = convection(n);
    let x_true = exact_solution(n);
    let rhs = product(&csr, &x_true);
    let a = LocalMatrix::from_csr(&backend, "A", csr);

    let mut gmres = Gmres::new();
    assert_eq!(gmres.restart(), 30);
    gmres.set_restart(3);
    gmres.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
    gmres.control_mut().set_max_iterations(1000);
    let (x, report) = run(&mut gmres, &a, &rhs);
    assert!(report.is_converged());
    assert!(report.iterations > 3);
    assert_approx_eq_vec(&x, &x_true, 1e-7);
}

/// Extreme eigenvalues of the 5-point Laplacian on an `s x s` grid.
fn laplace_bounds(s: usize) -> (f64, f64) {
    let h = std::f64::consts::PI / (2.0 * (s as f64 + 1.0));
    (8.0 * h.sin().powi(2), 8.0 * h.cos().powi(2))
}

#[test]
fn chebyshev_on_laplace_grid_with_exact_bounds() {
    let backend = backend();
    let size = 100;
    let n = size * size;
    let a = LocalMatrix::<f64>::laplace2d(&backend, "L", size);
    let (lambda_min, lambda_max) = laplace_bounds(size);

    let mut chebyshev = Chebyshev::new();
    chebyshev.set(lambda_min, lambda_max);
    chebyshev.control_mut().set_tolerances(0.0, 1e-8, 1e8);
    chebyshev.control_mut().set_max_iterations(3000);
    let rhs = vec![1.0; n];
    let (x, report) = run(&mut chebyshev, &a, &rhs);
    assert_eq!(report.status, SolverStatus::Converged(Criterion::Relative));

    // the recursively updated residual tracks the true one
    let residual: Vec<f64> = product(&a.to_csr(), &x)
        .iter()
        .zip(&rhs)
        .map(|(ax, b)| b - ax)
        .collect();
    let norm = residual.iter().map(|r| r * r).sum::<f64>().sqrt();
    assert!(norm / (n as f64).sqrt() <= 1e-7, "true relative residual {}", norm);
}

#[test]
fn preconditioned_chebyshev_uses_scaled_bounds() {
    let backend = backend();
    let size = 20;
    let mut a = LocalMatrix::<f64>::laplace2d(&backend, "L", size);
    a.move_to_accelerator();
    let (lambda_min, lambda_max) = laplace_bounds(size);

    // Jacobi scales the constant diagonal 4 away
    let mut chebyshev = Chebyshev::new();
    chebyshev.set(lambda_min / 4.0, lambda_max / 4.0);
    chebyshev.set_preconditioner(Box::new(Jacobi::new()));
    chebyshev.control_mut().set_tolerances(0.0, 1e-8, 1e8);
    chebyshev.control_mut().set_max_iterations(1000);
    let (_, report) = run(&mut chebyshev, &a, &vec![1.0; size * size]);
    assert!(report.is_converged(), "{:?}", report);
}

#[test]
fn chebyshev_requires_bounds() {
    let backend = backend();
    let a = LocalMatrix::<f64>::laplace2d(&backend, "L", 4);
    let mut chebyshev = Chebyshev::new();
    chebyshev.set_operator(&a);
    let err = catch(|| chebyshev.build()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    let err = catch(|| chebyshev.set(2.0, 1.0)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
}

#[test]
fn damped_jacobi_iteration() {
    let backend = backend();
    let n = 40;
    let csr = convection(n);
    let x_true = exact_solution(n);
    let rhs = product(&csr, &x_true);
    let a = LocalMatrix::from_csr(&backend, "A", csr);

    let mut fixed_point = FixedPoint::new();
    assert_eq!(fixed_point.relaxation(), 1.0);
    fixed_point.set_relaxation(0.9);
    fixed_point.set_preconditioner(Box::new(Jacobi::new()));
    fixed_point.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
    fixed_point.control_mut().set_max_iterations(2000);
    let (x, report) = run(&mut fixed_point, &a, &rhs);
    assert!(report.is_converged());
    assert_approx_eq_vec(&x, &x_true, 1e-8);
}

#[test]
fn fixed_point_requires_a_preconditioner() {
    let backend = backend();
    let a = LocalMatrix::<f64>::laplace2d(&backend, "L", 4);
    let mut fixed_point = FixedPoint::new();
    fixed_point.set_operator(&a);
    let err = catch(|| fixed_point.build()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
}

#[test]
fn direct_lu_on_every_placement() {
    let backend = backend();
    let n = 50;
    let csr = convection(n);
    let x_true = exact_solution(n);
    let rhs = product(&csr, &x_true);

    for accelerator in [false, true] {
        let mut a = LocalMatrix::from_csr(&backend, "A", csr.clone());
        if accelerator {
            a.move_to_accelerator();
        }
        let mut lu = DirectLu::new();
        let (x, report) = run(&mut lu, &a, &rhs);
        assert!(report.is_converged());
        assert_approx_eq_vec(&x, &x_true, 1e-12);
    }
}

#[test]
fn singular_operator_cannot_be_factorized() {
    let backend = backend();
    let csr = CsrMatrix::from_triplets(2, 2, &[Triplet::new(0, 0, 1.0), Triplet::new(1, 0, 1.0)])
        .unwrap();
    let a = LocalMatrix::from_csr(&backend, "A", csr);
    let mut lu = DirectLu::new();
    lu.set_operator(&a);
    let err = catch(|| lu.build()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    assert!(err.message.contains("singular"));
}

#[test]
fn lifecycle_violations() {
    let backend = backend();
    let a = LocalMatrix::<f64>::laplace2d(&backend, "L", 4);
    let b: Vector<f64> = Vector::with_size(&backend, "b", 16);
    let mut x: Vector<f64> = Vector::with_size(&backend, "x", 16);

    let mut cg = ConjugateGradient::new();
    let err = catch(|| cg.build()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    cg.set_operator(&a);
    let err = catch(|| cg.solve(&b, &mut x)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    cg.build();
    assert!(cg.is_built());
    let err = catch(|| cg.build()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    assert!(err.message.contains("twice"));
    let err = catch(|| cg.set_preconditioner(Box::new(Jacobi::new()))).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    let mut short: Vector<f64> = Vector::with_size(&backend, "short", 3);
    let err = catch(|| cg.solve(&b, &mut short)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    cg.clear();
    assert!(!cg.is_built());
    cg.set_preconditioner(Box::new(Jacobi::new()));
    cg.build();
    let report = cg.solve(&b, &mut x);
    assert!(report.is_converged());
}

#[test]
fn non_square_operator_is_rejected() {
    let backend = backend();
    let csr = CsrMatrix::from_triplets(2, 3, &[Triplet::new(0, 0, 1.0), Triplet::new(1, 2, 1.0)])
        .unwrap();
    let a = LocalMatrix::from_csr(&backend, "A", csr);
    let mut gmres = Gmres::new();
    gmres.set_operator(&a);
    let err = catch(|| gmres.build()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
}

#[test]
fn zero_rhs_converges_without_iterating() {
    let backend = backend();
    let a = LocalMatrix::<f64>::laplace2d(&backend, "L", 5);
    for mut solver in krylov_solvers(false) {
        let (x, report) = run(solver.as_mut(), &a, &[0.0; 25]);
        assert_eq!(report.status, SolverStatus::Converged(Criterion::Absolute));
        assert_eq!(report.iterations, 0);
        assert_eq!(x, vec![0.0; 25]);
    }
}

#[test]
fn iteration_limit_and_history() {
    let backend = backend();
    let a = LocalMatrix::<f64>::laplace2d(&backend, "L", 10);
    let mut cg = ConjugateGradient::with_params(1e-12, 3);
    cg.control_mut().set_residual_history(true);
    let (_, report) = run(&mut cg, &a, &vec![1.0; 100]);
    assert_eq!(report.status, SolverStatus::MaxIterationsReached);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.initial_residual, 10.0);
    let history = cg.control().history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0], 10.0);
    assert_eq!(history[3], report.final_residual);
}

#[test]
fn preconditioner_mode_runs_fixed_sweeps() {
    let backend = backend();
    let a = LocalMatrix::<f64>::laplace2d(&backend, "L", 6);
    let mut cg = ConjugateGradient::new();
    cg.set_mode(SolverMode::Preconditioner);
    cg.control_mut().set_max_iterations(4);
    let (x, report) = run(&mut cg, &a, &vec![1.0; 36]);
    assert_eq!(report.status, SolverStatus::MaxIterationsReached);
    assert_eq!(report.iterations, 4);
    assert_eq!(report.initial_residual, 0.0);
    assert!(x.iter().any(|v| *v != 0.0));
}

#[test]
fn breakdown_is_reported_as_divergence() {
    let backend = backend();
    // symmetric indefinite: p.Ap vanishes on the first step
    let csr = CsrMatrix::from_triplets(2, 2, &[Triplet::new(0, 1, 1.0), Triplet::new(1, 0, 1.0)])
        .unwrap();
    let a = LocalMatrix::from_csr(&backend, "A", csr);
    let mut cg = ConjugateGradient::new();
    let (_, report) = run(&mut cg, &a, &[1.0, 0.0]);
    assert_eq!(report.status, SolverStatus::Diverged);
}

#[test]
fn work_data_follows_the_solver() {
    let backend = backend();
    let n = 30;
    let csr = pentadiagonal(n);
    let x_true = exact_solution(n);
    let rhs = product(&csr, &x_true);
    let mut a = LocalMatrix::from_csr(&backend, "A", csr);

    let mut b = Vector::from_slice(&backend, "b", &rhs);
    let mut x: Vector<f64> = Vector::with_size(&backend, "x", n);
    {
        let mut bicgstab = BiCGStab::new();
        bicgstab.set_preconditioner(Box::new(Jacobi::new()));
        bicgstab.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
        bicgstab.set_operator(&a);
        bicgstab.build();
        assert!(bicgstab.solve(&b, &mut x).is_converged());
        assert_approx_eq_vec(&x.to_vec(), &x_true, 1e-7);
    }

    // work data moves independently of the operator
    a.move_to_accelerator();
    b.move_to_accelerator();
    x.move_to_accelerator();
    let mut qmr = QmrCgStab::new();
    qmr.set_preconditioner(Box::new(Jacobi::new()));
    qmr.control_mut().set_tolerances(1e-14, 1e-10, 1e8);
    qmr.set_operator(&a);
    qmr.build();
    qmr.move_to_host();
    let err = catch(|| qmr.solve_zero_sol(&b, &mut x)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    qmr.move_to_accelerator();
    let report = qmr.solve_zero_sol(&b, &mut x);
    assert!(report.is_converged());
    assert!(x.is_accelerator());
    assert_approx_eq_vec(&x.to_vec(), &x_true, 1e-7);
}
