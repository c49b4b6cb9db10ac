//! Stopping rules shared by every iterative solver.

use crate::error::SolverError;
use hetla_core::Real;
use num_traits::cast;
use serde::Deserialize;

/// Which tolerance ended a converged solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    Absolute,
    Relative,
}

/// Terminal state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Converged(Criterion),
    Diverged,
    MaxIterationsReached,
}

impl SolverStatus {
    pub fn is_converged(self) -> bool {
        matches!(self, SolverStatus::Converged(_))
    }
}

/// How a solver is being used.
///
/// Outside of `Solve` the solver runs exactly `max_iterations` sweeps and
/// never evaluates a residual norm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverMode {
    #[default]
    Solve,
    Preconditioner,
    Smoother,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport<T> {
    pub status: SolverStatus,
    pub iterations: usize,
    pub initial_residual: T,
    pub final_residual: T,
}

impl<T: Real> SolveReport<T> {
    /// Report of a direct method; residuals are not evaluated.
    pub fn direct() -> Self {
        Self {
            status: SolverStatus::Converged(Criterion::Absolute),
            iterations: 1,
            initial_residual: T::zero(),
            final_residual: T::zero(),
        }
    }

    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }
}

/// Tolerance set in a deserializable form.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub div_tol: f64,
    pub max_iter: usize,
    pub min_iter: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            abs_tol: 1e-15,
            rel_tol: 1e-6,
            div_tol: 1e8,
            max_iter: 1_000_000,
            min_iter: 0,
        }
    }
}

impl ControlConfig {
    pub fn validate(&self) -> Result<(), SolverError> {
        if !(self.abs_tol >= 0.0 && self.rel_tol >= 0.0) {
            return Err(SolverError::InvalidConfig(format!(
                "tolerances must be non-negative (abs {}, rel {})",
                self.abs_tol, self.rel_tol
            )));
        }
        if !(self.div_tol > 1.0) {
            return Err(SolverError::InvalidConfig(format!(
                "divergence tolerance must exceed 1, got {}",
                self.div_tol
            )));
        }
        if self.min_iter > self.max_iter {
            return Err(SolverError::InvalidConfig(format!(
                "min_iter ({}) exceeds max_iter ({})",
                self.min_iter, self.max_iter
            )));
        }
        Ok(())
    }
}

/// Residual-based stopping rule, checked once per iteration:
/// non-finite residual, minimum iterations, absolute tolerance, relative
/// tolerance, divergence tolerance, maximum iterations.
#[derive(Debug, Clone)]
pub struct IterationControl<T: Real> {
    abs_tol: T,
    rel_tol: T,
    div_tol: T,
    max_iter: usize,
    min_iter: usize,
    mode: SolverMode,
    iteration: usize,
    initial_residual: T,
    current_residual: T,
    status: Option<SolverStatus>,
    record_history: bool,
    history: Vec<T>,
}

impl<T: Real> Default for IterationControl<T> {
    fn default() -> Self {
        Self::from_parts(&ControlConfig::default())
    }
}

impl<T: Real> IterationControl<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ControlConfig) -> Result<Self, SolverError> {
        config.validate()?;
        Ok(Self::from_parts(config))
    }

    fn from_parts(config: &ControlConfig) -> Self {
        let lift = |v: f64| cast::<f64, T>(v).unwrap_or_else(T::infinity);
        Self {
            abs_tol: lift(config.abs_tol),
            rel_tol: lift(config.rel_tol),
            div_tol: lift(config.div_tol),
            max_iter: config.max_iter,
            min_iter: config.min_iter,
            mode: SolverMode::Solve,
            iteration: 0,
            initial_residual: T::zero(),
            current_residual: T::zero(),
            status: None,
            record_history: false,
            history: Vec::new(),
        }
    }

    pub fn set_tolerances(&mut self, abs_tol: T, rel_tol: T, div_tol: T) {
        self.abs_tol = abs_tol;
        self.rel_tol = rel_tol;
        self.div_tol = div_tol;
    }

    pub fn set_max_iterations(&mut self, max_iter: usize) {
        self.max_iter = max_iter;
    }

    pub fn set_min_iterations(&mut self, min_iter: usize) {
        self.min_iter = min_iter;
    }

    pub fn set_residual_history(&mut self, record: bool) {
        self.record_history = record;
    }

    pub(crate) fn set_mode(&mut self, mode: SolverMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> SolverMode {
        self.mode
    }

    /// Whether residual norms are evaluated at all.
    pub fn uses_residuals(&self) -> bool {
        self.mode == SolverMode::Solve
    }

    pub fn abs_tol(&self) -> T {
        self.abs_tol
    }

    pub fn rel_tol(&self) -> T {
        self.rel_tol
    }

    pub fn div_tol(&self) -> T {
        self.div_tol
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iter
    }

    pub fn min_iterations(&self) -> usize {
        self.min_iter
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn status(&self) -> Option<SolverStatus> {
        self.status
    }

    /// Residual norms of the last solve, starting with the initial one.
    pub fn history(&self) -> &[T] {
        &self.history
    }

    /// Starts a solve. `residual` is only evaluated in `Solve` mode. Returns
    /// true when no iteration should run.
    pub fn start(&mut self, residual: impl FnOnce() -> T) -> bool {
        self.iteration = 0;
        self.status = None;
        self.history.clear();
        self.initial_residual = T::zero();
        self.current_residual = T::zero();
        if !self.uses_residuals() {
            if self.max_iter == 0 {
                self.status = Some(SolverStatus::MaxIterationsReached);
            }
            return self.status.is_some();
        }

        let initial = residual();
        self.initial_residual = initial;
        self.current_residual = initial;
        if self.record_history {
            self.history.push(initial);
        }
        self.status = if !initial.is_finite() {
            Some(SolverStatus::Diverged)
        } else if initial.is_zero() || (self.min_iter == 0 && initial <= self.abs_tol) {
            Some(SolverStatus::Converged(Criterion::Absolute))
        } else if self.max_iter == 0 {
            Some(SolverStatus::MaxIterationsReached)
        } else {
            None
        };
        log::debug!("Initial residual: {:e}", initial.to_f64_lossy());
        self.status.is_some()
    }

    /// Records one finished iteration. Returns true when the solve should stop.
    pub fn step(&mut self, residual: impl FnOnce() -> T) -> bool {
        self.iteration += 1;
        if !self.uses_residuals() {
            if self.iteration >= self.max_iter {
                self.status = Some(SolverStatus::MaxIterationsReached);
            }
            return self.status.is_some();
        }

        let current = residual();
        self.current_residual = current;
        if self.record_history {
            self.history.push(current);
        }
        log::debug!(
            "Iteration {}: residual = {:e}",
            self.iteration,
            current.to_f64_lossy()
        );
        self.status = self.classify(current);
        self.status.is_some()
    }

    fn classify(&self, residual: T) -> Option<SolverStatus> {
        if !residual.is_finite() {
            return Some(SolverStatus::Diverged);
        }
        if self.iteration < self.min_iter {
            return None;
        }
        if residual <= self.abs_tol {
            return Some(SolverStatus::Converged(Criterion::Absolute));
        }
        let ratio = residual / self.initial_residual;
        if ratio <= self.rel_tol {
            return Some(SolverStatus::Converged(Criterion::Relative));
        }
        if ratio >= self.div_tol {
            return Some(SolverStatus::Diverged);
        }
        if self.iteration >= self.max_iter {
            return Some(SolverStatus::MaxIterationsReached);
        }
        None
    }

    /// Ends the solve after a zero denominator in a recurrence.
    pub fn breakdown(&mut self, solver: &str, what: &str) {
        log::warn!(
            "{} breakdown after {} iterations: {} is zero",
            solver,
            self.iteration,
            what
        );
        self.status = Some(SolverStatus::Diverged);
    }

    pub fn report(&self) -> SolveReport<T> {
        SolveReport {
            status: self.status.unwrap_or(SolverStatus::MaxIterationsReached),
            iterations: self.iteration,
            initial_residual: self.initial_residual,
            final_residual: self.current_residual,
        }
    }
}
