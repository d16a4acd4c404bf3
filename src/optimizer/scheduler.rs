//! Device scheduler: validation, preprocessing, model building, solving and
//! result extraction in one blocking call.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::commitments::preprocess_commitments;
use super::model::ModelBuilder;
use super::results::{ResultExtractor, ScheduleResult};
use super::solver::{SolverAdapter, SolverResults, TerminationCondition};
use super::SchedulerError;
use crate::config::Config;
use crate::domain::{Commitment, DeviceConstraints, EmsConstraints, LegacyCommitments};

/// Starting stock, one value for every device or one per device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitialStock {
    Uniform(f64),
    PerDevice(Vec<f64>),
}

impl Default for InitialStock {
    fn default() -> Self {
        InitialStock::Uniform(0.0)
    }
}

impl InitialStock {
    pub fn resolve(&self, devices: usize) -> Result<Vec<f64>, SchedulerError> {
        match self {
            InitialStock::Uniform(stock) => Ok(vec![*stock; devices]),
            InitialStock::PerDevice(stocks) if stocks.len() == devices => Ok(stocks.clone()),
            InitialStock::PerDevice(stocks) => Err(SchedulerError::InitialStockLength {
                expected: devices,
                actual: stocks.len(),
            }),
        }
    }
}

/// Inputs of one scheduling call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingProblem {
    pub device_constraints: Vec<DeviceConstraints>,
    pub ems_constraints: EmsConstraints,
    #[serde(default)]
    pub commitments: Vec<Commitment>,
    /// Older parallel-list input, appended after `commitments`
    #[serde(default, skip_serializing_if = "LegacyCommitments::is_empty")]
    pub legacy_commitments: LegacyCommitments,
    #[serde(default)]
    pub initial_stock: InitialStock,
}

impl SchedulingProblem {
    pub fn new(device_constraints: Vec<DeviceConstraints>, ems_constraints: EmsConstraints) -> Self {
        Self {
            device_constraints,
            ems_constraints,
            commitments: Vec::new(),
            legacy_commitments: LegacyCommitments::default(),
            initial_stock: InitialStock::default(),
        }
    }

    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitments.push(commitment);
        self
    }

    pub fn with_legacy_commitments(mut self, legacy: LegacyCommitments) -> Self {
        self.legacy_commitments = legacy;
        self
    }

    pub fn with_initial_stock(mut self, initial_stock: InitialStock) -> Self {
        self.initial_stock = initial_stock;
        self
    }

    /// Unified and legacy commitments, checked against the EMS grid
    fn all_commitments(&self, devices: usize) -> Result<Vec<Commitment>, SchedulerError> {
        let grid = &self.ems_constraints.grid;
        self.commitments
            .iter()
            .cloned()
            .chain(self.legacy_commitments.to_commitments(grid)?)
            .map(|commitment| commitment.normalized(grid, devices))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceScheduler {
    config: Config,
}

impl DeviceScheduler {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Plan device flows for `problem`.
    ///
    /// Configuration mistakes are returned as errors before anything is
    /// solved. Infeasible or failed solves are not errors: they come back in
    /// [`ScheduleResult::results`] with an empty schedule.
    pub fn schedule(&self, problem: &SchedulingProblem) -> Result<ScheduleResult, SchedulerError> {
        let adapter = SolverAdapter::from_config(&self.config.solver)?;
        let grid = problem.ems_constraints.grid;
        let legacy_count = problem.legacy_commitments.quantities.len();

        if problem.device_constraints.is_empty() {
            info!(steps = grid.len(), "no devices to schedule");
            return Ok(ScheduleResult::empty(
                SolverResults::skipped(adapter.backend(), "no devices to schedule"),
                problem.commitments.len() + legacy_count,
            ));
        }

        let devices = problem
            .device_constraints
            .iter()
            .enumerate()
            .map(|(d, device)| {
                let table = format!("device {d}");
                if device.grid != grid {
                    return Err(SchedulerError::GridMismatch {
                        table,
                        expected: grid,
                        actual: device.grid,
                    });
                }
                device.normalized(&table)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let ems = problem.ems_constraints.normalized()?;
        let commitments = problem.all_commitments(devices.len())?;
        let initial_stock = problem.initial_stock.resolve(devices.len())?;

        let device_commodities: Vec<Option<String>> =
            devices.iter().map(|d| d.commodity.clone()).collect();
        let preprocessed = preprocess_commitments(&commitments, &device_commodities)?;

        let model_config = &self.config.model;
        let model = ModelBuilder::new(&devices, &ems, &preprocessed)
            .with_initial_stock(&initial_stock)
            .with_stock_loss_policy(model_config.stock_loss_policy)
            .force_sign_binaries(model_config.force_sign_binaries)
            .build();
        debug!(?model, "model ready");

        info!(
            devices = devices.len(),
            steps = grid.len(),
            commitments = commitments.len(),
            sub_commitments = preprocessed.len(),
            convex = model.convex,
            solver = %adapter.backend(),
            "scheduling devices"
        );

        let outcome = adapter.solve(model)?;
        let condition = outcome.results.termination_condition;

        let result = ResultExtractor::new(&grid, &devices, &preprocessed, &initial_stock)
            .with_stock_loss_policy(model_config.stock_loss_policy)
            .with_decimal_precision(model_config.decimal_precision)
            .with_stock_tolerance(model_config.stock_tolerance)
            .extract(outcome.results, outcome.values.as_ref());

        match condition {
            TerminationCondition::Optimal => {
                info!(planned_costs = result.planned_costs, "schedule planned")
            }
            other => warn!(termination_condition = %other, "no schedule planned"),
        }
        Ok(result)
    }
}
