//! Geometric/algebraic multigrid driven by a user-supplied hierarchy.
//!
//! The caller provides the coarse operators and the transfer operators
//! between consecutive levels; this module runs V, W or F cycles over them.
//! Level 0 is the finest level (the operator passed to `set_operator`), level
//! `L - 1` the coarsest, which is handed to the coarse solver.

use crate::algorithms::{
    finish, residual, work_vector, DirectLu, FixedPoint, IterativeSolver, Jacobi, Solver,
};
use crate::control::{IterationControl, SolveReport, SolverMode};
use hetla_core::{contract_violation, require, Dimensions, LocalMatrix, Migrate, Real, Vector};
use log::info;

/// Recursion pattern of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cycle {
    /// One coarse visit per level.
    #[default]
    V,
    /// Two coarse visits per level.
    W,
    /// An F cycle on the coarse level followed by a V cycle.
    F,
}

type BoxedSmoother<'a, T> = Box<dyn IterativeSolver<'a, T> + 'a>;
type BoxedSolver<'a, T> = Box<dyn Solver<'a, T> + 'a>;

/// Operators and work vectors of every level but the coarsest.
#[derive(Debug)]
struct Level<'a, T: Real> {
    op: &'a LocalMatrix<T>,
    restrict: &'a LocalMatrix<T>,
    prolong: &'a LocalMatrix<T>,
    smoother: BoxedSmoother<'a, T>,
    r: Vector<T>,
    t: Vector<T>,
    /// `A t`, needed for the scaled correction.
    at: Vector<T>,
    coarse_rhs: Vector<T>,
    coarse_x: Vector<T>,
}

impl<'a, T: Real> Level<'a, T> {
    fn vectors_mut(&mut self) -> [&mut Vector<T>; 5] {
        [
            &mut self.r,
            &mut self.t,
            &mut self.at,
            &mut self.coarse_rhs,
            &mut self.coarse_x,
        ]
    }

    fn smooth(&mut self, sweeps: usize, rhs: &Vector<T>, x: &mut Vector<T>) {
        if sweeps == 0 {
            return;
        }
        self.smoother.control_mut().set_max_iterations(sweeps);
        self.smoother.solve(rhs, x);
    }
}

#[derive(Debug)]
struct Hierarchy<'a, T: Real> {
    levels: Vec<Level<'a, T>>,
    coarse: BoxedSolver<'a, T>,
    residual: Vector<T>,
    default_smoothers: bool,
    default_coarse: bool,
}

#[derive(Debug, Clone, Copy)]
struct CycleParams {
    pre: usize,
    post: usize,
    scaling: bool,
}

/// Multigrid solver; also usable as a preconditioner, one cycle per
/// application.
#[derive(Debug)]
pub struct Multigrid<'a, T: Real> {
    op: Option<&'a LocalMatrix<T>>,
    levels: Option<usize>,
    hierarchy: Option<Vec<&'a LocalMatrix<T>>>,
    restrict: Option<Vec<&'a LocalMatrix<T>>>,
    prolong: Option<Vec<&'a LocalMatrix<T>>>,
    smoothers: Option<Vec<BoxedSmoother<'a, T>>>,
    coarse_solver: Option<BoxedSolver<'a, T>>,
    pre_iter: usize,
    post_iter: usize,
    cycle: Cycle,
    scaling: bool,
    control: IterationControl<T>,
    built: Option<Hierarchy<'a, T>>,
}

impl<'a, T: Real> Default for Multigrid<'a, T> {
    fn default() -> Self {
        Self {
            op: None,
            levels: None,
            hierarchy: None,
            restrict: None,
            prolong: None,
            smoothers: None,
            coarse_solver: None,
            pre_iter: 1,
            post_iter: 1,
            cycle: Cycle::V,
            scaling: true,
            control: IterationControl::default(),
            built: None,
        }
    }
}

/// Damped Jacobi, `omega = 2/3`.
fn default_smoother<'a, T: Real>() -> BoxedSmoother<'a, T> {
    let mut smoother = FixedPoint::new();
    smoother.set_relaxation(T::from_f64(2.0 / 3.0));
    smoother.set_preconditioner(Box::new(Jacobi::new()));
    Box::new(smoother)
}

fn run_cycle<'a, T: Real>(
    levels: &mut [Level<'a, T>],
    coarse: &mut (dyn Solver<'a, T> + 'a),
    params: CycleParams,
    kind: Cycle,
    depth: usize,
    rhs: &Vector<T>,
    x: &mut Vector<T>,
) {
    let Some((level, rest)) = levels.split_first_mut() else {
        // x was zeroed by the caller on the first visit
        coarse.solve(rhs, x);
        return;
    };

    level.smooth(params.pre, rhs, x);
    residual(level.op, rhs, x, &mut level.r);
    level.restrict.apply(&level.r, &mut level.coarse_rhs);
    level.coarse_x.zeros();
    let next = depth + 1;
    let visits: &[Cycle] = match kind {
        Cycle::V => &[Cycle::V],
        Cycle::W => &[Cycle::W, Cycle::W],
        Cycle::F => &[Cycle::F, Cycle::V],
    };
    for &visit in visits {
        let (b, xc) = (&level.coarse_rhs, &mut level.coarse_x);
        run_cycle(rest, coarse, params, visit, next, b, xc);
    }
    level.prolong.apply(&level.coarse_x, &mut level.t);

    let alpha = if params.scaling && depth > 0 {
        // energy-minimizing step length along t
        level.op.apply(&level.t, &mut level.at);
        let denominator = level.at.dot(&level.t);
        if denominator.is_zero() {
            T::one()
        } else {
            level.r.dot(&level.t) / denominator
        }
    } else {
        T::one()
    };
    x.add_scale(&level.t, alpha);
    level.smooth(params.post, rhs, x);
}

impl<'a, T: Real> Multigrid<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_configurable(&self, what: &str) {
        require!(
            self.built.is_none(),
            "Multigrid: {} cannot change after Build; call Clear first",
            what
        );
    }

    fn require_levels(&self, what: &str) -> usize {
        match self.levels {
            Some(levels) => levels,
            None => contract_violation!(
                Precondition,
                "Multigrid: set_levels must precede {}",
                what
            ),
        }
    }

    fn require_count(&self, what: &str, count: usize) {
        let levels = self.require_levels(what);
        require!(
            count + 1 == levels,
            "Multigrid: {} needs {} entries for {} levels, got {}",
            what,
            levels - 1,
            levels,
            count
        );
    }

    /// Number of levels including the finest and the coarsest one.
    pub fn set_levels(&mut self, levels: usize) {
        self.require_configurable("the level count");
        require!(levels > 0, "Multigrid: the level count must be positive");
        self.levels = Some(levels);
    }

    pub fn levels(&self) -> Option<usize> {
        self.levels
    }

    /// Operators of levels `1..L`, finest first.
    pub fn set_operator_hierarchy(&mut self, ops: Vec<&'a LocalMatrix<T>>) {
        self.require_configurable("the operator hierarchy");
        self.require_count("set_operator_hierarchy", ops.len());
        self.hierarchy = Some(ops);
    }

    /// `R_l` maps level `l` to level `l + 1`.
    pub fn set_restrict_operator(&mut self, ops: Vec<&'a LocalMatrix<T>>) {
        self.require_configurable("the restriction operators");
        require!(
            self.hierarchy.is_some(),
            "Multigrid: set_operator_hierarchy must precede set_restrict_operator"
        );
        self.require_count("set_restrict_operator", ops.len());
        self.restrict = Some(ops);
    }

    /// `P_l` maps level `l + 1` to level `l`.
    pub fn set_prolong_operator(&mut self, ops: Vec<&'a LocalMatrix<T>>) {
        self.require_configurable("the prolongation operators");
        require!(
            self.hierarchy.is_some(),
            "Multigrid: set_operator_hierarchy must precede set_prolong_operator"
        );
        self.require_count("set_prolong_operator", ops.len());
        self.prolong = Some(ops);
    }

    /// One smoother per level except the coarsest. Defaults to damped Jacobi.
    pub fn set_smoother(&mut self, smoothers: Vec<BoxedSmoother<'a, T>>) {
        self.require_configurable("the smoothers");
        self.require_count("set_smoother", smoothers.len());
        self.smoothers = Some(smoothers);
    }

    pub fn set_smoother_pre_iter(&mut self, sweeps: usize) {
        self.require_configurable("the pre-smoothing sweeps");
        self.pre_iter = sweeps;
    }

    pub fn set_smoother_post_iter(&mut self, sweeps: usize) {
        self.require_configurable("the post-smoothing sweeps");
        self.post_iter = sweeps;
    }

    /// Solver for the coarsest level. Defaults to [`DirectLu`].
    pub fn set_coarse_solver(&mut self, solver: BoxedSolver<'a, T>) {
        self.require_configurable("the coarse solver");
        self.coarse_solver = Some(solver);
    }

    pub fn set_cycle(&mut self, cycle: Cycle) {
        self.cycle = cycle;
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// Scale coarse corrections on levels below the finest by the
    /// energy-minimizing step length.
    pub fn set_scaling(&mut self, scaling: bool) {
        self.scaling = scaling;
    }

    pub fn control(&self) -> &IterationControl<T> {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut IterationControl<T> {
        &mut self.control
    }

    /// Logs the level sizes of a built hierarchy.
    pub fn info(&self) {
        match &self.built {
            Some(hierarchy) => {
                let sizes: Vec<usize> = hierarchy.levels.iter().map(|l| l.op.rows()).collect();
                info!(
                    "Multigrid: {:?} cycle, levels {:?} + coarse {} ({} pre / {} post sweeps, coarse solver {})",
                    self.cycle,
                    sizes,
                    hierarchy.levels.last().map_or(hierarchy.residual.size(), |l| l.coarse_x.size()),
                    self.pre_iter,
                    self.post_iter,
                    hierarchy.coarse.name()
                );
            }
            None => info!("Multigrid: not built"),
        }
    }

    fn check_transfer(
        what: &str,
        level: usize,
        transfer: &LocalMatrix<T>,
        expected: (usize, usize),
    ) {
        require!(
            transfer.dims() == expected,
            "Multigrid: {} operator of level {} is {}x{}, expected {}x{}",
            what,
            level,
            transfer.rows(),
            transfer.cols(),
            expected.0,
            expected.1
        );
    }
}

impl<'a, T: Real> Solver<'a, T> for Multigrid<'a, T> {
    fn name(&self) -> &'static str {
        "Multigrid"
    }

    fn set_operator(&mut self, op: &'a LocalMatrix<T>) {
        self.require_configurable("the operator");
        self.op = Some(op);
    }

    fn build(&mut self) {
        require!(
            self.built.is_none(),
            "Multigrid: Build called twice without Clear"
        );
        let Some(op) = self.op else {
            contract_violation!(Precondition, "Multigrid: Build requires an operator");
        };
        let levels = self.require_levels("Build");

        let coarse_ops = match (levels, &self.hierarchy) {
            (1, _) => Vec::new(),
            (_, Some(ops)) => ops.clone(),
            (_, None) => contract_violation!(
                Precondition,
                "Multigrid: set_operator_hierarchy must precede Build"
            ),
        };
        self.require_count("the operator hierarchy", coarse_ops.len());
        let ops: Vec<&'a LocalMatrix<T>> = std::iter::once(op).chain(coarse_ops).collect();
        for (l, a) in ops.iter().enumerate() {
            require!(
                a.is_square(),
                "Multigrid: operator of level {} is {}x{}, expected a square matrix",
                l,
                a.rows(),
                a.cols()
            );
        }
        let (restrict, prolong) = if levels > 1 {
            match (self.restrict.clone(), self.prolong.clone()) {
                (Some(r), Some(p)) => (r, p),
                _ => contract_violation!(
                    Precondition,
                    "Multigrid: restriction and prolongation operators must be set before Build"
                ),
            }
        } else {
            (Vec::new(), Vec::new())
        };
        self.require_count("the restriction operators", restrict.len());
        self.require_count("the prolongation operators", prolong.len());
        if let Some(smoothers) = &self.smoothers {
            self.require_count("the smoothers", smoothers.len());
        }

        let default_smoothers = self.smoothers.is_none();
        let smoothers = self
            .smoothers
            .take()
            .unwrap_or_else(|| (1..levels).map(|_| default_smoother()).collect());
        let default_coarse = self.coarse_solver.is_none();
        let mut coarse = self
            .coarse_solver
            .take()
            .unwrap_or_else(|| Box::new(DirectLu::new()) as BoxedSolver<'a, T>);

        let mut built_levels = Vec::with_capacity(levels - 1);
        for (l, mut smoother) in smoothers.into_iter().enumerate() {
            let (fine, coarse_op) = (ops[l], ops[l + 1]);
            let (n, m) = (fine.rows(), coarse_op.rows());
            Self::check_transfer("restriction", l, restrict[l], (m, n));
            Self::check_transfer("prolongation", l, prolong[l], (n, m));
            smoother.set_operator(fine);
            smoother.set_mode(SolverMode::Smoother);
            smoother.build();
            built_levels.push(Level {
                op: fine,
                restrict: restrict[l],
                prolong: prolong[l],
                smoother,
                r: work_vector(fine, "MG r"),
                t: work_vector(fine, "MG t"),
                at: work_vector(fine, "MG At"),
                coarse_rhs: work_vector(coarse_op, "MG coarse rhs"),
                coarse_x: work_vector(coarse_op, "MG coarse x"),
            });
        }
        let coarsest = ops[levels - 1];
        coarse.set_operator(coarsest);
        coarse.build();

        self.built = Some(Hierarchy {
            levels: built_levels,
            coarse,
            residual: work_vector(op, "MG residual"),
            default_smoothers,
            default_coarse,
        });
        info!(
            "Multigrid built for '{}': {} levels, coarsest {} unknowns",
            op.name(),
            levels,
            coarsest.rows()
        );
    }

    fn clear(&mut self) {
        let Some(hierarchy) = self.built.take() else {
            return;
        };
        let mut smoothers: Vec<BoxedSmoother<'a, T>> = hierarchy
            .levels
            .into_iter()
            .map(|level| level.smoother)
            .collect();
        smoothers.iter_mut().for_each(|s| s.clear());
        if !hierarchy.default_smoothers {
            self.smoothers = Some(smoothers);
        }
        if !hierarchy.default_coarse {
            let mut coarse = hierarchy.coarse;
            coarse.clear();
            self.coarse_solver = Some(coarse);
        }
    }

    fn is_built(&self) -> bool {
        self.built.is_some()
    }

    fn solve(&mut self, rhs: &Vector<T>, x: &mut Vector<T>) -> SolveReport<T> {
        let (Some(op), Some(hierarchy)) = (self.op, self.built.as_mut()) else {
            contract_violation!(Precondition, "Multigrid: Solve called before Build");
        };
        require!(
            rhs.size() == op.rows() && x.size() == op.rows(),
            "Multigrid: rhs ({}) and solution ({}) must have {} elements",
            rhs.size(),
            x.size(),
            op.rows()
        );
        let params = CycleParams {
            pre: self.pre_iter,
            post: self.post_iter,
            scaling: self.scaling,
        };
        let control = &mut self.control;
        let r = &mut hierarchy.residual;

        let done = control.start(|| {
            residual(op, rhs, x, r);
            r.norm()
        });
        if !done {
            loop {
                run_cycle(
                    &mut hierarchy.levels,
                    hierarchy.coarse.as_mut(),
                    params,
                    self.cycle,
                    0,
                    rhs,
                    x,
                );
                let stop = control.step(|| {
                    residual(op, rhs, x, r);
                    r.norm()
                });
                if stop {
                    break;
                }
            }
        }
        finish("Multigrid", control)
    }

    /// Outside of `Solve` mode one cycle is run per application; raise the
    /// limit through [`Multigrid::control_mut`] afterwards if needed.
    fn set_mode(&mut self, mode: SolverMode) {
        self.control.set_mode(mode);
        if mode != SolverMode::Solve {
            self.control.set_max_iterations(1);
        }
    }

    fn move_to_accelerator(&mut self) {
        if let Some(hierarchy) = self.built.as_mut() {
            for level in hierarchy.levels.iter_mut() {
                level.vectors_mut().into_iter().for_each(Migrate::move_to_accelerator);
                level.smoother.move_to_accelerator();
            }
            hierarchy.coarse.move_to_accelerator();
            hierarchy.residual.move_to_accelerator();
        }
    }

    fn move_to_host(&mut self) {
        if let Some(hierarchy) = self.built.as_mut() {
            for level in hierarchy.levels.iter_mut() {
                level.vectors_mut().into_iter().for_each(Migrate::move_to_host);
                level.smoother.move_to_host();
            }
            hierarchy.coarse.move_to_host();
            hierarchy.residual.move_to_host();
        }
    }
}
