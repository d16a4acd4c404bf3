use serde::{Deserialize, Serialize};

use super::TimeGrid;
use crate::optimizer::SchedulerError;

/// Constraint table of one flexible device (storage, process, curtailable load).
///
/// Stock bounds (`equals`, `max`, `min`) are expressed relative to the device's
/// starting point, in flow-times-step units. Flow bounds are per step. A `None`
/// entry is unbounded in that direction. Columns left empty are filled with
/// their defaults by [`DeviceConstraints::normalized`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConstraints {
    pub grid: TimeGrid,

    /// Energy carrier the device draws from at the EMS (e.g. "electricity")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commodity: Option<String>,

    #[serde(default)]
    pub equals: Vec<Option<f64>>,
    #[serde(default)]
    pub max: Vec<Option<f64>>,
    #[serde(default)]
    pub min: Vec<Option<f64>>,

    #[serde(default)]
    pub derivative_equals: Vec<Option<f64>>,
    #[serde(default)]
    pub derivative_max: Vec<Option<f64>>,
    #[serde(default)]
    pub derivative_min: Vec<Option<f64>>,

    /// Flow-to-stock conversion when charging (default 1)
    #[serde(default)]
    pub derivative_up_efficiency: Vec<f64>,
    /// Stock-to-flow conversion when discharging (default 1)
    #[serde(default)]
    pub derivative_down_efficiency: Vec<f64>,
    /// Per-step stock retention (default 1, no losses)
    #[serde(default)]
    pub efficiency: Vec<f64>,
    /// Exogenous stock change per step, independent of the device flow (default 0)
    #[serde(default)]
    pub stock_delta: Vec<f64>,
}

/// Constraints on the sum of all device flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmsConstraints {
    pub grid: TimeGrid,
    #[serde(default)]
    pub derivative_max: Vec<Option<f64>>,
    #[serde(default)]
    pub derivative_min: Vec<Option<f64>>,
}

impl DeviceConstraints {
    /// Unconstrained, loss-free device on the given grid
    pub fn new(grid: TimeGrid) -> Self {
        let n = grid.len();
        Self {
            grid,
            commodity: None,
            equals: vec![None; n],
            max: vec![None; n],
            min: vec![None; n],
            derivative_equals: vec![None; n],
            derivative_max: vec![None; n],
            derivative_min: vec![None; n],
            derivative_up_efficiency: vec![1.0; n],
            derivative_down_efficiency: vec![1.0; n],
            efficiency: vec![1.0; n],
            stock_delta: vec![0.0; n],
        }
    }

    pub fn with_commodity(mut self, commodity: impl Into<String>) -> Self {
        self.commodity = Some(commodity.into());
        self
    }

    /// Constant stock bounds over the whole grid
    pub fn with_stock_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = vec![Some(min); self.grid.len()];
        self.max = vec![Some(max); self.grid.len()];
        self
    }

    /// Constant flow bounds over the whole grid (negative = discharge)
    pub fn with_flow_bounds(mut self, min: f64, max: f64) -> Self {
        self.derivative_min = vec![Some(min); self.grid.len()];
        self.derivative_max = vec![Some(max); self.grid.len()];
        self
    }

    pub fn with_conversion_efficiencies(mut self, up: f64, down: f64) -> Self {
        self.derivative_up_efficiency = vec![up; self.grid.len()];
        self.derivative_down_efficiency = vec![down; self.grid.len()];
        self
    }

    pub fn with_storage_efficiency(mut self, retention: f64) -> Self {
        self.efficiency = vec![retention; self.grid.len()];
        self
    }

    /// Fill defaulted columns, map NaN bounds to "unbounded" and validate
    /// lengths, bound ordering and efficiencies.
    pub fn normalized(&self, table: &str) -> Result<Self, SchedulerError> {
        let steps = self.grid.len();
        let normalized = Self {
            grid: self.grid,
            commodity: self.commodity.clone(),
            equals: bound_column(table, "equals", &self.equals, steps)?,
            max: bound_column(table, "max", &self.max, steps)?,
            min: bound_column(table, "min", &self.min, steps)?,
            derivative_equals: bound_column(
                table,
                "derivative equals",
                &self.derivative_equals,
                steps,
            )?,
            derivative_max: bound_column(table, "derivative max", &self.derivative_max, steps)?,
            derivative_min: bound_column(table, "derivative min", &self.derivative_min, steps)?,
            derivative_up_efficiency: value_column(
                table,
                "derivative up efficiency",
                &self.derivative_up_efficiency,
                steps,
                1.0,
            )?,
            derivative_down_efficiency: value_column(
                table,
                "derivative down efficiency",
                &self.derivative_down_efficiency,
                steps,
                1.0,
            )?,
            efficiency: value_column(table, "efficiency", &self.efficiency, steps, 1.0)?,
            stock_delta: value_column(table, "stock delta", &self.stock_delta, steps, 0.0)?,
        };

        check_ordering(table, "min/max", &normalized.min, &normalized.max)?;
        check_ordering(
            table,
            "derivative min/max",
            &normalized.derivative_min,
            &normalized.derivative_max,
        )?;
        for (column, values) in [
            ("derivative up efficiency", &normalized.derivative_up_efficiency),
            ("derivative down efficiency", &normalized.derivative_down_efficiency),
        ] {
            if let Some((step, &value)) = values
                .iter()
                .enumerate()
                .find(|(_, v)| !v.is_finite() || **v <= 0.0)
            {
                return Err(SchedulerError::InvalidEfficiency {
                    table: table.to_string(),
                    column,
                    step,
                    value,
                });
            }
        }
        if let Some((step, &value)) = normalized
            .efficiency
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(SchedulerError::InvalidEfficiency {
                table: table.to_string(),
                column: "efficiency",
                step,
                value,
            });
        }

        Ok(normalized)
    }

    /// Stock bounds at `step`, with `equals` pinned inside the original bounds
    pub fn stock_bounds(&self, step: usize) -> (Option<f64>, Option<f64>) {
        pin_bounds(self.min[step], self.max[step], self.equals[step])
    }

    /// Flow bounds at `step`, with `derivative equals` pinned inside the original bounds
    pub fn flow_bounds(&self, step: usize) -> (Option<f64>, Option<f64>) {
        pin_bounds(
            self.derivative_min[step],
            self.derivative_max[step],
            self.derivative_equals[step],
        )
    }

    /// Largest flow magnitude allowed at `step`, `None` if either direction is
    /// unbounded
    pub(crate) fn flow_magnitude(&self, step: usize) -> Option<f64> {
        match self.flow_bounds(step) {
            (Some(lower), Some(upper)) => Some(lower.abs().max(upper.abs())),
            _ => None,
        }
    }

    /// Flow magnitude at `step` implied by the stock bounds, starting from
    /// `initial_stock`. Needs finite stock bounds on every step and a positive
    /// retention at `step`.
    pub(crate) fn stock_limited_flow(&self, step: usize, initial_stock: f64) -> Option<f64> {
        let mut reach: f64 = 0.0;
        for j in 0..self.grid.len() {
            let (Some(lower), Some(upper)) = self.stock_bounds(j) else {
                return None;
            };
            reach = reach.max(lower.abs()).max(upper.abs());
        }
        let retention = self.efficiency[step].min(1.0);
        if retention <= 0.0 {
            return None;
        }
        // largest stock delta between two reachable stocks, under any loss policy
        let delta = 2.0 * (reach + initial_stock.abs()) / retention + self.stock_delta[step].abs();
        let conversion =
            (1.0 / self.derivative_up_efficiency[step]).max(self.derivative_down_efficiency[step]);
        Some(delta * conversion)
    }
}

impl EmsConstraints {
    /// EMS without any limits on the aggregate flow
    pub fn new(grid: TimeGrid) -> Self {
        Self {
            grid,
            derivative_max: vec![None; grid.len()],
            derivative_min: vec![None; grid.len()],
        }
    }

    pub fn with_flow_bounds(mut self, min: f64, max: f64) -> Self {
        self.derivative_min = vec![Some(min); self.grid.len()];
        self.derivative_max = vec![Some(max); self.grid.len()];
        self
    }

    pub fn normalized(&self) -> Result<Self, SchedulerError> {
        let steps = self.grid.len();
        let normalized = Self {
            grid: self.grid,
            derivative_max: bound_column("EMS", "derivative max", &self.derivative_max, steps)?,
            derivative_min: bound_column("EMS", "derivative min", &self.derivative_min, steps)?,
        };
        check_ordering(
            "EMS",
            "derivative min/max",
            &normalized.derivative_min,
            &normalized.derivative_max,
        )?;
        Ok(normalized)
    }
}

/// Pin an exact target between the bounds instead of letting it override them,
/// so a slightly out-of-range target does not make the model infeasible.
fn pin_bounds(
    lower: Option<f64>,
    upper: Option<f64>,
    equals: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    match equals {
        Some(target) => {
            let mut pinned = target;
            if let Some(upper) = upper {
                pinned = pinned.min(upper);
            }
            if let Some(lower) = lower {
                pinned = pinned.max(lower);
            }
            (Some(pinned), Some(pinned))
        }
        None => (lower, upper),
    }
}

fn bound_column(
    table: &str,
    column: &'static str,
    values: &[Option<f64>],
    steps: usize,
) -> Result<Vec<Option<f64>>, SchedulerError> {
    if values.is_empty() {
        return Ok(vec![None; steps]);
    }
    if values.len() != steps {
        return Err(SchedulerError::ColumnLength {
            table: table.to_string(),
            column,
            expected: steps,
            actual: values.len(),
        });
    }
    Ok(values.iter().map(|v| v.filter(|x| !x.is_nan())).collect())
}

fn value_column(
    table: &str,
    column: &'static str,
    values: &[f64],
    steps: usize,
    default: f64,
) -> Result<Vec<f64>, SchedulerError> {
    if values.is_empty() {
        return Ok(vec![default; steps]);
    }
    if values.len() != steps {
        return Err(SchedulerError::ColumnLength {
            table: table.to_string(),
            column,
            expected: steps,
            actual: values.len(),
        });
    }
    Ok(values
        .iter()
        .map(|&v| if v.is_nan() { default } else { v })
        .collect())
}

fn check_ordering(
    table: &str,
    column: &'static str,
    lower: &[Option<f64>],
    upper: &[Option<f64>],
) -> Result<(), SchedulerError> {
    for (step, (lo, hi)) in lower.iter().zip(upper).enumerate() {
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if lo > hi {
                return Err(SchedulerError::InvalidBounds {
                    table: table.to_string(),
                    column,
                    step,
                    lower: *lo,
                    upper: *hi,
                });
            }
        }
    }
    Ok(())
}
