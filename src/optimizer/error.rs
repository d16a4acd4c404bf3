use thiserror::Error;

use crate::domain::TimeGrid;

/// Configuration errors raised before a model is built.
///
/// Solver-level outcomes (infeasible, unbounded, solver failure) are not
/// errors; they are reported through [`super::SolverResults`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Time grid mismatch for {table}: expected {expected}, got {actual}")]
    GridMismatch {
        table: String,
        expected: TimeGrid,
        actual: TimeGrid,
    },

    #[error("Column '{column}' of {table} has {actual} values, expected {expected}")]
    ColumnLength {
        table: String,
        column: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Commitment '{commitment}' group {group}: {direction} deviation price is not unique within the group")]
    NonUniquePrice {
        commitment: String,
        group: i64,
        direction: &'static str,
    },

    #[error("Commitment '{commitment}' has a non-finite {direction} deviation price at step {step}")]
    NonFinitePrice {
        commitment: String,
        direction: &'static str,
        step: usize,
    },

    #[error("Unknown commitment class: {0}")]
    UnknownCommitmentClass(String),

    #[error("Commitment '{commitment}' refers to device {device}, but only {devices} devices are scheduled")]
    UnknownDevice {
        commitment: String,
        device: usize,
        devices: usize,
    },

    #[error("Invalid bounds for {table} at step {step}: {lower} > {upper} ({column})")]
    InvalidBounds {
        table: String,
        column: &'static str,
        step: usize,
        lower: f64,
        upper: f64,
    },

    #[error("Invalid {column} for {table} at step {step}: {value} (must be positive and finite)")]
    InvalidEfficiency {
        table: String,
        column: &'static str,
        step: usize,
        value: f64,
    },

    #[error("Initial stock has {actual} entries, expected one per device ({expected})")]
    InitialStockLength { expected: usize, actual: usize },

    #[error("Unknown solver: {0}")]
    UnknownSolver(String),

    #[error("Solver backend '{0}' is not compiled into this build")]
    SolverUnavailable(String),
}
