//! Result extraction: per-device schedules and cost roll-ups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use super::commitments::PreprocessedCommitments;
use super::model::SolutionValues;
use super::solver::SolverResults;
use super::stock::{apply_stock_changes_and_losses, StockLossPolicy};
use crate::domain::{DeviceConstraints, DeviceSchedule, TimeGrid};

/// Everything a scheduling call returns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub planned_power_per_device: Vec<DeviceSchedule>,
    pub planned_costs: f64,
    pub results: SolverResults,
    /// Original commitment index -> realised cost
    pub commitment_costs: BTreeMap<usize, f64>,
    /// Commodity label -> realised cost of the commitments tagged with it
    pub commodity_costs: BTreeMap<String, f64>,
}

impl ScheduleResult {
    /// Result without a loaded solution: no schedules, zero costs
    pub fn empty(results: SolverResults, commitments: usize) -> Self {
        Self {
            planned_power_per_device: Vec::new(),
            planned_costs: 0.0,
            results,
            commitment_costs: (0..commitments).map(|c| (c, 0.0)).collect(),
            commodity_costs: BTreeMap::new(),
        }
    }

    pub fn has_solution(&self) -> bool {
        !self.planned_power_per_device.is_empty()
    }
}

pub struct ResultExtractor<'a> {
    grid: &'a TimeGrid,
    devices: &'a [DeviceConstraints],
    commitments: &'a PreprocessedCommitments,
    /// Number of original commitments, including ones without sub-commitments
    commitment_count: usize,
    initial_stock: &'a [f64],
    policy: StockLossPolicy,
    decimal_precision: Option<u32>,
    stock_tolerance: f64,
}

impl<'a> ResultExtractor<'a> {
    pub fn new(
        grid: &'a TimeGrid,
        devices: &'a [DeviceConstraints],
        commitments: &'a PreprocessedCommitments,
        initial_stock: &'a [f64],
    ) -> Self {
        Self {
            grid,
            devices,
            commitments,
            commitment_count: commitments.device_group_lookup.len(),
            initial_stock,
            policy: StockLossPolicy::default(),
            decimal_precision: None,
            stock_tolerance: 1e-6,
        }
    }

    pub fn with_stock_loss_policy(mut self, policy: StockLossPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_decimal_precision(mut self, decimal_precision: Option<u32>) -> Self {
        self.decimal_precision = decimal_precision;
        self
    }

    pub fn with_stock_tolerance(mut self, tolerance: f64) -> Self {
        self.stock_tolerance = tolerance;
        self
    }

    pub fn extract(&self, results: SolverResults, values: Option<&SolutionValues>) -> ScheduleResult {
        let Some(values) = values else {
            return ScheduleResult::empty(results, self.commitment_count);
        };

        let planned_power_per_device = self
            .devices
            .iter()
            .enumerate()
            .map(|(d, device)| {
                let stock = self.planned_stock(d, device, values);
                DeviceSchedule::from_grid(
                    d,
                    self.grid,
                    &values.power_up[d],
                    &values.power_down[d],
                    &values.ems_power[d],
                    stock,
                )
            })
            .collect();

        let (commitment_costs, commodity_costs) = self.costs(values);
        let planned_costs = commitment_costs.values().sum();

        ScheduleResult {
            planned_power_per_device,
            planned_costs,
            results,
            commitment_costs,
            commodity_costs,
        }
    }

    /// Realised cost per original commitment and per commodity
    pub fn costs(&self, values: &SolutionValues) -> (BTreeMap<usize, f64>, BTreeMap<String, f64>) {
        let mut commitment_costs: BTreeMap<usize, f64> =
            (0..self.commitment_count).map(|c| (c, 0.0)).collect();
        let mut commodity_costs: BTreeMap<String, f64> = BTreeMap::new();

        for (c, sub) in self.commitments.sub_commitments.iter().enumerate() {
            let cost = sub.cost(values.deviation_up[c], values.deviation_down[c]);
            *commitment_costs
                .entry(self.commitments.commitment_mapping[c])
                .or_default() += cost;
            if let Some(commodity) = &sub.commodity {
                *commodity_costs.entry(commodity.clone()).or_default() += cost;
            }
        }
        (commitment_costs, commodity_costs)
    }

    fn planned_stock(&self, d: usize, device: &DeviceConstraints, values: &SolutionValues) -> Vec<f64> {
        let initial = self.initial_stock.get(d).copied().unwrap_or(0.0);
        let deltas: Vec<f64> = (0..self.grid.len())
            .map(|j| {
                values.power_down[d][j] / device.derivative_down_efficiency[j]
                    + values.power_up[d][j] * device.derivative_up_efficiency[j]
                    + device.stock_delta[j]
            })
            .collect();
        let stock = apply_stock_changes_and_losses(
            initial,
            &deltas,
            &device.efficiency,
            self.policy,
            self.decimal_precision,
        );

        for (j, level) in stock.iter().skip(1).enumerate() {
            let change = level - initial;
            let (lower, upper) = device.stock_bounds(j);
            let below = lower.is_some_and(|lo| change < lo - self.stock_tolerance);
            let above = upper.is_some_and(|hi| change > hi + self.stock_tolerance);
            if below || above {
                warn!(
                    device = d,
                    step = j,
                    change,
                    lower = ?lower,
                    upper = ?upper,
                    "planned stock leaves device bounds"
                );
            }
        }
        stock
    }
}
