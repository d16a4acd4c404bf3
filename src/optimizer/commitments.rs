//! Commitment preprocessing.
//!
//! Splits every commitment into elementary sub-commitments, one per time group
//! (and per deviation direction for groups spanning several steps), and builds
//! the lookup tables the model builder and the result extractor need.

use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::SchedulerError;
use crate::domain::{Commitment, CommitmentKind};

/// Which deviation directions a sub-commitment constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviationDirection {
    /// Single step: baseline plus both deviations equals the coupled quantity
    Both,
    /// Upwards deviation covers the largest excess over the group
    UpOnly,
    /// Downwards deviation covers the largest shortfall over the group
    DownOnly,
}

/// One group of one commitment, in one or both deviation directions.
#[derive(Debug, Clone)]
pub struct SubCommitment {
    /// Index of the original commitment
    pub origin: usize,
    pub kind: CommitmentKind,
    pub commodity: Option<String>,
    pub group: i64,
    pub direction: DeviationDirection,
    /// Active steps of the group with their baseline quantity
    pub active: Vec<(usize, f64)>,
    /// Price per unit of upwards deviation (0 when that direction is not priced)
    pub upwards_price: f64,
    /// Price per unit of downwards deviation (0 when that direction is not priced)
    pub downwards_price: f64,
}

impl SubCommitment {
    /// Whether deviating in both directions at once can never pay off
    pub fn is_convex(&self) -> bool {
        self.upwards_price >= self.downwards_price
    }

    /// Cost of realised deviations (`down <= 0 <= up`)
    pub fn cost(&self, up: f64, down: f64) -> f64 {
        down * self.downwards_price + up * self.upwards_price
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreprocessedCommitments {
    pub sub_commitments: Vec<SubCommitment>,
    /// Sub-commitment index -> original commitment index
    pub commitment_mapping: Vec<usize>,
    /// Original commitment index -> device-group label -> devices
    pub device_group_lookup: Vec<BTreeMap<String, BTreeSet<usize>>>,
    /// Commodity label -> devices drawing from it
    pub commodity_devices: BTreeMap<String, BTreeSet<usize>>,
}

impl PreprocessedCommitments {
    pub fn len(&self) -> usize {
        self.sub_commitments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_commitments.is_empty()
    }

    /// Convex iff every sub-commitment prices upwards deviation at least as
    /// high as downwards deviation.
    pub fn is_convex(&self) -> bool {
        self.sub_commitments.iter().all(SubCommitment::is_convex)
    }
}

/// Split `commitments` (already normalized against the problem grid) into
/// sub-commitments. `device_commodities` registers devices that declare their
/// commodity directly.
pub fn preprocess_commitments(
    commitments: &[Commitment],
    device_commodities: &[Option<String>],
) -> Result<PreprocessedCommitments, SchedulerError> {
    let mut out = PreprocessedCommitments::default();

    for (d, commodity) in device_commodities.iter().enumerate() {
        if let Some(commodity) = commodity {
            out.commodity_devices
                .entry(commodity.clone())
                .or_default()
                .insert(d);
        }
    }

    for (c, commitment) in commitments.iter().enumerate() {
        out.device_group_lookup.push(commitment.scope.device_groups());
        if let Some(commodity) = &commitment.commodity {
            out.commodity_devices
                .entry(commodity.clone())
                .or_default()
                .extend(commitment.scope.devices());
        }

        let steps = commitment.quantity.len();
        let groups: Vec<i64> = if commitment.group.len() == steps {
            commitment.group.clone()
        } else {
            (0..steps as i64).collect()
        };

        for group in groups.iter().copied().unique() {
            let group_steps: Vec<usize> = (0..steps).filter(|&j| groups[j] == group).collect();

            let upwards_price = group_price(
                commitment,
                "upwards",
                commitment.upwards_deviation_price.as_deref(),
                &group_steps,
                group,
            )?;
            let downwards_price = group_price(
                commitment,
                "downwards",
                commitment.downwards_deviation_price.as_deref(),
                &group_steps,
                group,
            )?;

            let active: Vec<(usize, f64)> = group_steps
                .iter()
                .filter_map(|&j| commitment.quantity[j].map(|q| (j, q)))
                .collect();
            if active.is_empty() {
                debug!(commitment = %commitment.name, group, "skipping inactive commitment group");
                continue;
            }

            let mut push = |direction, upwards_price, downwards_price| {
                out.sub_commitments.push(SubCommitment {
                    origin: c,
                    kind: commitment.kind,
                    commodity: commitment.commodity.clone(),
                    group,
                    direction,
                    active: active.clone(),
                    upwards_price,
                    downwards_price,
                });
                out.commitment_mapping.push(c);
            };

            if group_steps.len() == 1 {
                push(
                    DeviationDirection::Both,
                    upwards_price.unwrap_or(0.0),
                    downwards_price.unwrap_or(0.0),
                );
            } else {
                if let Some(price) = upwards_price {
                    push(DeviationDirection::UpOnly, price, 0.0);
                }
                if let Some(price) = downwards_price {
                    push(DeviationDirection::DownOnly, 0.0, price);
                }
            }
        }
    }

    debug!(
        commitments = commitments.len(),
        sub_commitments = out.sub_commitments.len(),
        commodities = out.commodity_devices.len(),
        "preprocessed commitments"
    );
    Ok(out)
}

/// The single price of a group, or an error if it varies within the group
fn group_price(
    commitment: &Commitment,
    direction: &'static str,
    prices: Option<&[f64]>,
    steps: &[usize],
    group: i64,
) -> Result<Option<f64>, SchedulerError> {
    let Some(prices) = prices else {
        return Ok(None);
    };
    if !steps.iter().map(|&j| prices[j]).all_equal() {
        return Err(SchedulerError::NonUniquePrice {
            commitment: commitment.name.clone(),
            group,
            direction,
        });
    }
    Ok(steps.first().map(|&j| prices[j]))
}
