//! Solver adapter over the `good_lp` backends compiled into this build.

use good_lp::{ResolutionError, Solution, Solver, SolverModel};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Instant;
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use super::model::{SchedulingModel, SolutionValues};
use super::SchedulerError;
use crate::config::SolverConfig;

/// LP/MILP backend, selected by name in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SolverBackend {
    /// Pure Rust simplex with branch and bound
    Microlp,
    /// COIN-OR CBC
    #[strum(to_string = "cbc", serialize = "coin_cbc")]
    Cbc,
    /// HiGHS
    Highs,
}

impl SolverBackend {
    pub fn from_name(name: &str) -> Result<Self, SchedulerError> {
        let backend =
            Self::from_str(name).map_err(|_| SchedulerError::UnknownSolver(name.to_string()))?;
        if !backend.is_available() {
            return Err(SchedulerError::SolverUnavailable(backend.to_string()));
        }
        Ok(backend)
    }

    /// Whether the backend's cargo feature is enabled
    pub fn is_available(self) -> bool {
        match self {
            SolverBackend::Microlp => cfg!(feature = "microlp"),
            SolverBackend::Cbc => cfg!(feature = "cbc"),
            SolverBackend::Highs => cfg!(feature = "highs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SolverStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TerminationCondition {
    Optimal,
    Infeasible,
    Unbounded,
    Error,
    /// Nothing to solve, the solver was not invoked
    Skipped,
}

/// Outcome reported by the solver, passed through to the caller unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverResults {
    pub solver: SolverBackend,
    pub status: SolverStatus,
    pub termination_condition: TerminationCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SolverResults {
    pub fn optimal(solver: SolverBackend) -> Self {
        Self {
            solver,
            status: SolverStatus::Ok,
            termination_condition: TerminationCondition::Optimal,
            message: None,
        }
    }

    pub fn skipped(solver: SolverBackend, reason: impl Into<String>) -> Self {
        Self {
            solver,
            status: SolverStatus::Ok,
            termination_condition: TerminationCondition::Skipped,
            message: Some(reason.into()),
        }
    }

    pub fn from_error(solver: SolverBackend, err: ResolutionError) -> Self {
        let (status, termination_condition, message) = match err {
            ResolutionError::Infeasible => {
                (SolverStatus::Warning, TerminationCondition::Infeasible, None)
            }
            ResolutionError::Unbounded => {
                (SolverStatus::Warning, TerminationCondition::Unbounded, None)
            }
            other => (
                SolverStatus::Error,
                TerminationCondition::Error,
                Some(other.to_string()),
            ),
        };
        Self {
            solver,
            status,
            termination_condition,
            message,
        }
    }

    pub fn is_optimal(&self) -> bool {
        self.termination_condition == TerminationCondition::Optimal
    }
}

/// A solved (or failed) model: the solver outcome plus variable values when a
/// solution was loaded.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub results: SolverResults,
    pub values: Option<SolutionValues>,
}

#[derive(Debug, Clone, Copy)]
pub struct SolverAdapter {
    backend: SolverBackend,
    verbose: bool,
}

impl SolverAdapter {
    pub fn new(backend: SolverBackend, verbose: bool) -> Self {
        Self { backend, verbose }
    }

    pub fn from_config(config: &SolverConfig) -> Result<Self, SchedulerError> {
        Ok(Self::new(SolverBackend::from_name(&config.name)?, config.verbose))
    }

    pub fn backend(&self) -> SolverBackend {
        self.backend
    }

    /// Solve `model`. Infeasible, unbounded and failed solves are reported in
    /// the returned results, never as errors.
    pub fn solve(&self, model: SchedulingModel) -> Result<SolveOutcome, SchedulerError> {
        #[allow(unused_variables)]
        let verbose = self.verbose;
        match self.backend {
            #[cfg(feature = "microlp")]
            SolverBackend::Microlp => Ok(solve_with(
                self.backend,
                model,
                good_lp::solvers::microlp::microlp,
                |problem| problem,
            )),
            #[cfg(feature = "cbc")]
            SolverBackend::Cbc => Ok(solve_with(
                self.backend,
                model,
                good_lp::solvers::coin_cbc::coin_cbc,
                move |mut problem| {
                    problem.set_parameter("logLevel", if verbose { "1" } else { "0" });
                    problem
                },
            )),
            #[cfg(feature = "highs")]
            SolverBackend::Highs => Ok(solve_with(
                self.backend,
                model,
                good_lp::solvers::highs::highs,
                move |problem| problem.set_verbose(verbose),
            )),
            #[allow(unreachable_patterns)]
            other => Err(SchedulerError::SolverUnavailable(other.to_string())),
        }
    }
}

#[cfg_attr(
    not(any(feature = "microlp", feature = "cbc", feature = "highs")),
    allow(dead_code)
)]
fn solve_with<S, F>(
    backend: SolverBackend,
    model: SchedulingModel,
    solver: S,
    configure: F,
) -> SolveOutcome
where
    S: Solver,
    S::Model: SolverModel<Error = ResolutionError>,
    F: FnOnce(S::Model) -> S::Model,
{
    let SchedulingModel {
        vars,
        objective,
        constraints,
        index,
        ..
    } = model;

    let rows = constraints.len();
    let mut problem = configure(vars.minimise(objective).using(solver));
    for constraint in constraints {
        problem = problem.with(constraint);
    }

    let started = Instant::now();
    let solved = problem.solve();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match solved {
        Ok(solution) => {
            info!(solver = %backend, rows, elapsed_ms, "solver finished");
            SolveOutcome {
                results: SolverResults::optimal(backend),
                values: Some(index.read_values(|v| solution.value(v))),
            }
        }
        Err(err) => {
            let results = SolverResults::from_error(backend, err);
            match results.termination_condition {
                TerminationCondition::Error => {
                    warn!(solver = %backend, elapsed_ms, message = ?results.message, "solver failed")
                }
                condition => {
                    warn!(solver = %backend, elapsed_ms, %condition, "no solution loaded")
                }
            }
            debug!(rows, "model rows passed to the solver");
            SolveOutcome {
                results,
                values: None,
            }
        }
    }
}
