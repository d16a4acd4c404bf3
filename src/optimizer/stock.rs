//! Stock bookkeeping with storage losses.
//!
//! A stock evolves step by step: each step adds a net delta (already net of
//! conversion efficiencies and exogenous changes) and loses a fraction
//! `1 - retention` of what it holds. When the delta lands within the step
//! decides how much of it decays in that same step.
//!
//! The projection is generic so the same code produces plain numbers (for
//! reporting planned stock) and linear expressions over decision variables
//! (for the device stock constraints).

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};
use strum::{Display, EnumString};

/// When within a step the stock delta is assumed to occur
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StockLossPolicy {
    /// Delta at the start of the step, then the whole stock decays
    Left,
    /// Decay first, delta at the end of the step
    Right,
    /// Delta arrives at a constant rate through the step
    #[default]
    Linear,
}

impl StockLossPolicy {
    /// Stock at the end of a step that starts at `stock`
    pub fn step<T>(self, stock: T, delta: T, retention: f64) -> T
    where
        T: Add<Output = T> + Mul<f64, Output = T>,
    {
        if retention == 1.0 {
            return stock + delta;
        }
        match self {
            StockLossPolicy::Left => (stock + delta) * retention,
            StockLossPolicy::Right => stock * retention + delta,
            StockLossPolicy::Linear => stock * retention + delta * linear_delta_weight(retention),
        }
    }
}

/// Fraction of a uniformly arriving delta that is still there at the end of
/// the step: the limit of `n` slices of `delta / n`, each decaying over the
/// remainder of the step, which is `(retention - 1) / ln(retention)`.
pub fn linear_delta_weight(retention: f64) -> f64 {
    if retention == 1.0 {
        1.0
    } else if retention <= 0.0 {
        0.0
    } else {
        (retention - 1.0) / retention.ln()
    }
}

/// Stock trajectory `s0..sJ` from `initial`, per-step `deltas` and per-step
/// `retention` ratios. Returns one value more than the number of steps.
pub fn project_stock<T, I>(initial: T, deltas: I, retention: &[f64], policy: StockLossPolicy) -> Vec<T>
where
    T: Clone + Add<Output = T> + Mul<f64, Output = T>,
    I: IntoIterator<Item = T>,
{
    let mut stocks = Vec::with_capacity(retention.len() + 1);
    let mut current = initial;
    stocks.push(current.clone());
    for (delta, &eta) in deltas.into_iter().zip(retention) {
        current = policy.step(current, delta, eta);
        stocks.push(current.clone());
    }
    stocks
}

/// Numeric projection, optionally rounding every stock to `decimal_precision`
/// decimals before it feeds the next step.
pub fn apply_stock_changes_and_losses(
    initial: f64,
    deltas: &[f64],
    retention: &[f64],
    policy: StockLossPolicy,
    decimal_precision: Option<u32>,
) -> Vec<f64> {
    let Some(precision) = decimal_precision else {
        return project_stock(initial, deltas.iter().copied(), retention, policy);
    };

    let mut stocks = Vec::with_capacity(deltas.len() + 1);
    let mut current = round_to(initial, precision);
    stocks.push(current);
    for (&delta, &eta) in deltas.iter().zip(retention) {
        current = round_to(policy.step(current, delta, eta), precision);
        stocks.push(current);
    }
    stocks
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
