pub mod commitments;
pub mod error;
pub mod model;
pub mod results;
pub mod scheduler;
pub mod solver;
pub mod stock;

pub use commitments::{preprocess_commitments, DeviationDirection, PreprocessedCommitments, SubCommitment};
pub use error::SchedulerError;
pub use model::{BigM, ModelBuilder, ModelIndex, SchedulingModel, SolutionValues};
pub use results::{ResultExtractor, ScheduleResult};
pub use scheduler::{DeviceScheduler, InitialStock, SchedulingProblem};
pub use solver::{
    SolveOutcome, SolverAdapter, SolverBackend, SolverResults, SolverStatus, TerminationCondition,
};
pub use stock::{apply_stock_changes_and_losses, project_stock, StockLossPolicy};
