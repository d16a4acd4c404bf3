//! Linear model construction.
//!
//! Builds the device/commitment model as plain `good_lp` parts (variables,
//! objective, constraint rows) so the solver adapter can hand them to any
//! compiled-in backend. Index sets are plain integer ranges: `d` over devices,
//! `j` over steps, `c` over sub-commitments.

use good_lp::{constraint, variable, Constraint, Expression, ProblemVariables, Variable};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::commitments::{DeviationDirection, PreprocessedCommitments, SubCommitment};
use super::stock::{project_stock, StockLossPolicy};
use crate::domain::{CommitmentKind, DeviceConstraints, EmsConstraints};

/// Big-M constants for the direction-exclusivity constraints
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BigM {
    /// Bounds a single device flow
    pub device: f64,
    /// Bounds a sub-commitment deviation, which may aggregate many devices
    pub commitment: f64,
    /// Device steps whose flow has no finite bound, capped by `device` only
    pub unbounded_flows: usize,
}

impl BigM {
    pub fn compute(
        devices: &[DeviceConstraints],
        commitments: &PreprocessedCommitments,
        initial_stock: &[f64],
    ) -> Self {
        let mut device: f64 = 0.0;
        let mut total: f64 = 0.0;
        let mut unbounded_flows = 0;
        for (d, constraints) in devices.iter().enumerate() {
            let initial = initial_stock.get(d).copied().unwrap_or(0.0);
            // losses can move a stock by up to its initial value
            total += initial.abs();
            for j in 0..constraints.grid.len() {
                // discharging at low efficiency draws more stock than it delivers
                let conversion = (1.0 / constraints.derivative_down_efficiency[j])
                    .max(constraints.derivative_up_efficiency[j])
                    .max(1.0);
                let magnitude = constraints
                    .flow_magnitude(j)
                    .or_else(|| constraints.stock_limited_flow(j, initial));
                match magnitude {
                    Some(magnitude) => {
                        device = device.max(magnitude);
                        total += magnitude * conversion;
                    }
                    None => unbounded_flows += 1,
                }
                total += constraints.stock_delta[j].abs();
            }
        }
        let quantity = commitments
            .sub_commitments
            .iter()
            .flat_map(|sub| sub.active.iter().map(|(_, q)| q.abs()))
            .fold(0.0, f64::max);

        Self {
            device: device.max(1.0),
            commitment: (total + quantity).max(1.0),
            unbounded_flows,
        }
    }
}

/// Handles to the decision variables, `[device][step]` or `[sub-commitment]`
#[derive(Debug, Clone)]
pub struct ModelIndex {
    pub ems_power: Vec<Vec<Variable>>,
    pub power_down: Vec<Vec<Variable>>,
    pub power_up: Vec<Vec<Variable>>,
    pub power_sign: Option<Vec<Vec<Variable>>>,
    pub deviation_down: Vec<Variable>,
    pub deviation_up: Vec<Variable>,
    pub commitment_sign: Option<Vec<Variable>>,
}

/// Variable values read back from a solution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolutionValues {
    pub ems_power: Vec<Vec<f64>>,
    pub power_down: Vec<Vec<f64>>,
    pub power_up: Vec<Vec<f64>>,
    pub deviation_down: Vec<f64>,
    pub deviation_up: Vec<f64>,
}

impl ModelIndex {
    pub fn read_values(&self, value: impl Fn(Variable) -> f64) -> SolutionValues {
        let table = |vars: &Vec<Vec<Variable>>| -> Vec<Vec<f64>> {
            vars.iter()
                .map(|row| row.iter().map(|&v| value(v)).collect())
                .collect()
        };
        SolutionValues {
            ems_power: table(&self.ems_power),
            power_down: table(&self.power_down),
            power_up: table(&self.power_up),
            deviation_down: self.deviation_down.iter().map(|&v| value(v)).collect(),
            deviation_up: self.deviation_up.iter().map(|&v| value(v)).collect(),
        }
    }
}

/// An unsolved scheduling model
pub struct SchedulingModel {
    pub(crate) vars: ProblemVariables,
    pub(crate) objective: Expression,
    pub(crate) constraints: Vec<Constraint>,
    pub index: ModelIndex,
    pub big_m: BigM,
    /// Whether the sign binaries were left out
    pub convex: bool,
}

impl SchedulingModel {
    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn has_binaries(&self) -> bool {
        self.index.power_sign.is_some()
    }
}

impl std::fmt::Debug for SchedulingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingModel")
            .field("devices", &self.index.ems_power.len())
            .field("sub_commitments", &self.index.deviation_up.len())
            .field("constraints", &self.constraints.len())
            .field("big_m", &self.big_m)
            .field("convex", &self.convex)
            .finish()
    }
}

pub struct ModelBuilder<'a> {
    devices: &'a [DeviceConstraints],
    ems: &'a EmsConstraints,
    commitments: &'a PreprocessedCommitments,
    initial_stock: Option<&'a [f64]>,
    policy: StockLossPolicy,
    force_sign_binaries: bool,
}

impl<'a> ModelBuilder<'a> {
    /// Builder over normalized device and EMS tables sharing one grid
    pub fn new(
        devices: &'a [DeviceConstraints],
        ems: &'a EmsConstraints,
        commitments: &'a PreprocessedCommitments,
    ) -> Self {
        Self {
            devices,
            ems,
            commitments,
            initial_stock: None,
            policy: StockLossPolicy::default(),
            force_sign_binaries: false,
        }
    }

    /// Starting stock per device (default 0)
    pub fn with_initial_stock(mut self, initial_stock: &'a [f64]) -> Self {
        self.initial_stock = Some(initial_stock);
        self
    }

    pub fn with_stock_loss_policy(mut self, policy: StockLossPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Add the Big-M sign binaries even when the cost curve is convex
    pub fn force_sign_binaries(mut self, force: bool) -> Self {
        self.force_sign_binaries = force;
        self
    }

    pub fn build(&self) -> SchedulingModel {
        let steps = self.ems.grid.len();
        let n_devices = self.devices.len();
        let big_m = BigM::compute(
            self.devices,
            self.commitments,
            self.initial_stock.unwrap_or_default(),
        );
        let convex = self.commitments.is_convex();
        let use_binaries = !convex || self.force_sign_binaries;
        if use_binaries && big_m.unbounded_flows > 0 {
            warn!(
                steps = big_m.unbounded_flows,
                big_m = big_m.device,
                "device flow without finite bounds, sign constraints cap it at Big-M"
            );
        }

        let mut vars = ProblemVariables::new();
        let mut constraints: Vec<Constraint> = Vec::new();

        let mut ems_power = Vec::with_capacity(n_devices);
        let mut power_down = Vec::with_capacity(n_devices);
        let mut power_up = Vec::with_capacity(n_devices);
        for device in self.devices {
            let mut ems_row = Vec::with_capacity(steps);
            let mut down_row = Vec::with_capacity(steps);
            let mut up_row = Vec::with_capacity(steps);
            for j in 0..steps {
                let (lower, upper) = device.flow_bounds(j);

                let mut ems = variable();
                if let Some(lower) = lower {
                    ems = ems.min(lower);
                }
                if let Some(upper) = upper {
                    ems = ems.max(upper);
                }
                let mut down = variable().max(0.0);
                if let Some(lower) = lower {
                    down = down.min(lower.min(0.0));
                }
                let mut up = variable().min(0.0);
                if let Some(upper) = upper {
                    up = up.max(upper.max(0.0));
                }

                ems_row.push(vars.add(ems));
                down_row.push(vars.add(down));
                up_row.push(vars.add(up));
            }
            ems_power.push(ems_row);
            power_down.push(down_row);
            power_up.push(up_row);
        }

        // ems_power = up + down, efficiencies only enter the stock
        for d in 0..n_devices {
            for j in 0..steps {
                let (ems, split) = (ems_power[d][j], power_up[d][j] + power_down[d][j]);
                constraints.push(constraint!(ems == split));
            }
        }

        let stock_change = self.stock_changes(&power_down, &power_up);
        for (d, device) in self.devices.iter().enumerate() {
            for j in 0..steps {
                let (lower, upper) = device.stock_bounds(j);
                let change = &stock_change[d][j];
                if let Some(lower) = lower {
                    constraints.push(constraint!(change.clone() >= lower));
                }
                if let Some(upper) = upper {
                    constraints.push(constraint!(change.clone() <= upper));
                }
            }
        }

        let power_sign = if use_binaries {
            let md = big_m.device;
            let mut signs = Vec::with_capacity(n_devices);
            for d in 0..n_devices {
                let mut row = Vec::with_capacity(steps);
                for j in 0..steps {
                    let sign = vars.add(variable().binary());
                    let (up, down) = (power_up[d][j], power_down[d][j]);
                    let up_cap = sign * md;
                    let down_gap = sign * md - down;
                    constraints.push(constraint!(up <= up_cap));
                    constraints.push(constraint!(down_gap <= md));
                    row.push(sign);
                }
                signs.push(row);
            }
            Some(signs)
        } else {
            None
        };

        for j in 0..steps {
            if self.ems.derivative_min[j].is_none() && self.ems.derivative_max[j].is_none() {
                continue;
            }
            let total: Expression = ems_power.iter().map(|row| row[j]).sum();
            if let Some(lower) = self.ems.derivative_min[j] {
                constraints.push(constraint!(total.clone() >= lower));
            }
            if let Some(upper) = self.ems.derivative_max[j] {
                constraints.push(constraint!(total <= upper));
            }
        }

        let couplings: Vec<_> = self
            .commitments
            .sub_commitments
            .iter()
            .map(|sub| self.coupled_groups(sub))
            .collect();

        let mut deviation_down = Vec::with_capacity(self.commitments.len());
        let mut deviation_up = Vec::with_capacity(self.commitments.len());
        for (sub, groups) in self.commitments.sub_commitments.iter().zip(&couplings) {
            let fixed = || variable().min(0.0).max(0.0);
            let (down, up) = match (groups, sub.direction) {
                (None, _) => (fixed(), fixed()),
                (Some(_), DeviationDirection::Both) => (variable().max(0.0), variable().min(0.0)),
                (Some(_), DeviationDirection::UpOnly) => (fixed(), variable().min(0.0)),
                (Some(_), DeviationDirection::DownOnly) => (variable().max(0.0), fixed()),
            };
            deviation_down.push(vars.add(down));
            deviation_up.push(vars.add(up));
        }

        for (c, (sub, groups)) in self
            .commitments
            .sub_commitments
            .iter()
            .zip(&couplings)
            .enumerate()
        {
            let Some(groups) = groups else {
                continue;
            };
            for &(j, quantity) in &sub.active {
                for group in groups {
                    let coupled: Expression = group
                        .iter()
                        .map(|&d| match sub.kind {
                            CommitmentKind::Flow => Expression::from(ems_power[d][j]),
                            CommitmentKind::Stock => stock_change[d][j].clone(),
                        })
                        .sum();
                    let committed = deviation_down[c] + deviation_up[c] + quantity;
                    constraints.push(match sub.direction {
                        DeviationDirection::Both => constraint!(committed == coupled),
                        DeviationDirection::UpOnly => constraint!(committed >= coupled),
                        DeviationDirection::DownOnly => constraint!(committed <= coupled),
                    });
                }
            }
        }

        let commitment_sign = if use_binaries {
            let mc = big_m.commitment;
            let mut signs = Vec::with_capacity(self.commitments.len());
            for (&up, &down) in deviation_up.iter().zip(&deviation_down) {
                let sign = vars.add(variable().binary());
                let up_cap = sign * mc;
                let down_gap = sign * mc - down;
                constraints.push(constraint!(up <= up_cap));
                constraints.push(constraint!(down_gap <= mc));
                signs.push(sign);
            }
            Some(signs)
        } else {
            None
        };

        let objective: Expression = self
            .commitments
            .sub_commitments
            .iter()
            .enumerate()
            .map(|(c, sub)| {
                deviation_down[c] * sub.downwards_price + deviation_up[c] * sub.upwards_price
            })
            .sum();

        debug!(
            devices = n_devices,
            steps,
            sub_commitments = self.commitments.len(),
            constraints = constraints.len(),
            big_m_device = big_m.device,
            big_m_commitment = big_m.commitment,
            binaries = use_binaries,
            "built scheduling model"
        );

        SchedulingModel {
            vars,
            objective,
            constraints,
            index: ModelIndex {
                ems_power,
                power_down,
                power_up,
                power_sign,
                deviation_down,
                deviation_up,
                commitment_sign,
            },
            big_m,
            convex,
        }
    }

    /// `stock_change[d][j]`: projected stock after step `j` minus the initial stock
    fn stock_changes(
        &self,
        power_down: &[Vec<Variable>],
        power_up: &[Vec<Variable>],
    ) -> Vec<Vec<Expression>> {
        self.devices
            .iter()
            .enumerate()
            .map(|(d, device)| {
                let initial = self
                    .initial_stock
                    .and_then(|stocks| stocks.get(d).copied())
                    .unwrap_or(0.0);
                let deltas = (0..device.grid.len()).map(|j| {
                    power_down[d][j] * (1.0 / device.derivative_down_efficiency[j])
                        + power_up[d][j] * device.derivative_up_efficiency[j]
                        + device.stock_delta[j]
                });
                project_stock(Expression::from_other_affine(initial), deltas, &device.efficiency, self.policy)
                    .into_iter()
                    .skip(1)
                    .map(|stock| stock - initial)
                    .collect()
            })
            .collect()
    }

    /// Device sets a sub-commitment couples to, one constraint row each.
    /// `None` when there is nothing to couple to.
    fn coupled_groups(&self, sub: &SubCommitment) -> Option<Vec<BTreeSet<usize>>> {
        let lookup = &self.commitments.device_group_lookup[sub.origin];
        if !lookup.is_empty() {
            return Some(lookup.values().cloned().collect());
        }
        match (&sub.commodity, sub.kind) {
            (Some(commodity), CommitmentKind::Flow) => {
                match self.commitments.commodity_devices.get(commodity) {
                    Some(devices) if !devices.is_empty() => Some(vec![devices.clone()]),
                    _ => {
                        warn!(
                            commodity = %commodity,
                            commitment = sub.origin,
                            "no devices registered for commodity, skipping commitment constraint"
                        );
                        None
                    }
                }
            }
            _ => Some(vec![(0..self.devices.len()).collect()]),
        }
    }
}
