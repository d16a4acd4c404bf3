use serde::{Deserialize, Serialize};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use strum::{Display, EnumString};

use super::TimeGrid;
use crate::optimizer::SchedulerError;

/// What a commitment couples to: the summed device flows or the summed device
/// stock changes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum CommitmentKind {
    #[default]
    #[serde(rename = "FlowCommitment", alias = "flow")]
    #[strum(to_string = "FlowCommitment", serialize = "flow")]
    Flow,
    #[serde(rename = "StockCommitment", alias = "stock")]
    #[strum(to_string = "StockCommitment", serialize = "stock")]
    Stock,
}

impl CommitmentKind {
    /// Parse a class tag such as `"FlowCommitment"` or `"stock"`
    pub fn parse(tag: &str) -> Result<Self, SchedulerError> {
        Self::from_str(tag).map_err(|_| SchedulerError::UnknownCommitmentClass(tag.to_string()))
    }
}

/// One device id or a collection of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceIds {
    One(usize),
    Many(Vec<usize>),
}

impl DeviceIds {
    pub fn to_set(&self) -> BTreeSet<usize> {
        match self {
            DeviceIds::One(id) => BTreeSet::from([*id]),
            DeviceIds::Many(ids) => ids.iter().copied().collect(),
        }
    }
}

impl From<usize> for DeviceIds {
    fn from(id: usize) -> Self {
        DeviceIds::One(id)
    }
}

impl From<Vec<usize>> for DeviceIds {
    fn from(ids: Vec<usize>) -> Self {
        DeviceIds::Many(ids)
    }
}

/// Which devices a commitment applies to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// All devices, i.e. the EMS level (or the devices of the commitment's
    /// commodity, for commodity-tagged flow commitments)
    #[default]
    Ems,
    /// The listed devices, summed into one quantity
    Devices(DeviceIds),
    /// Labelled groups of devices, each group summed into one quantity
    DeviceGroups(BTreeMap<String, DeviceIds>),
}

impl Scope {
    /// Groups of devices the commitment is coupled to, keyed by label.
    /// Empty for EMS-level commitments.
    pub fn device_groups(&self) -> BTreeMap<String, BTreeSet<usize>> {
        match self {
            Scope::Ems => BTreeMap::new(),
            Scope::Devices(ids) => {
                let devices = ids.to_set();
                let label = devices.iter().join(",");
                BTreeMap::from([(label, devices)])
            }
            Scope::DeviceGroups(groups) => groups
                .iter()
                .map(|(label, ids)| (label.clone(), ids.to_set()))
                .collect(),
        }
    }

    pub fn devices(&self) -> BTreeSet<usize> {
        self.device_groups().into_values().flatten().collect()
    }
}

/// A contracted or desired flow/stock trajectory with deviation penalties.
///
/// `quantity` is the baseline per step (`None` where the commitment is
/// inactive). Deviations are priced per group: each distinct `group` value
/// collapses its steps onto one pair of deviation variables, so prices must be
/// constant within a group. A missing price column means that direction
/// carries no commitment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    #[serde(default)]
    pub name: String,
    pub grid: TimeGrid,
    #[serde(default, rename = "class")]
    pub kind: CommitmentKind,
    pub quantity: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upwards_deviation_price: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downwards_deviation_price: Option<Vec<f64>>,
    /// Group label per step; empty means every step is its own group
    #[serde(default)]
    pub group: Vec<i64>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commodity: Option<String>,
}

impl Commitment {
    pub fn new(
        name: impl Into<String>,
        kind: CommitmentKind,
        grid: TimeGrid,
        quantity: Vec<Option<f64>>,
    ) -> Self {
        Self {
            name: name.into(),
            grid,
            kind,
            quantity,
            upwards_deviation_price: None,
            downwards_deviation_price: None,
            group: Vec::new(),
            scope: Scope::Ems,
            commodity: None,
        }
    }

    pub fn flow(name: impl Into<String>, grid: TimeGrid, quantity: Vec<Option<f64>>) -> Self {
        Self::new(name, CommitmentKind::Flow, grid, quantity)
    }

    pub fn stock(name: impl Into<String>, grid: TimeGrid, quantity: Vec<Option<f64>>) -> Self {
        Self::new(name, CommitmentKind::Stock, grid, quantity)
    }

    /// Plain energy-price commitment: zero baseline flow, buying and selling at
    /// the same per-step price.
    pub fn energy_price(name: impl Into<String>, grid: TimeGrid, prices: Vec<f64>) -> Self {
        Self::flow(name, grid, vec![Some(0.0); grid.len()])
            .with_upwards_price(prices.clone())
            .with_downwards_price(prices)
    }

    pub fn with_upwards_price(mut self, prices: Vec<f64>) -> Self {
        self.upwards_deviation_price = Some(prices);
        self
    }

    pub fn with_downwards_price(mut self, prices: Vec<f64>) -> Self {
        self.downwards_deviation_price = Some(prices);
        self
    }

    pub fn with_groups(mut self, group: Vec<i64>) -> Self {
        self.group = group;
        self
    }

    /// Put every step into one group, e.g. for a peak or a breach penalty that
    /// is paid once over the whole horizon.
    pub fn single_group(mut self) -> Self {
        self.group = vec![0; self.grid.len()];
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn for_devices(self, ids: impl Into<DeviceIds>) -> Self {
        self.with_scope(Scope::Devices(ids.into()))
    }

    pub fn with_commodity(mut self, commodity: impl Into<String>) -> Self {
        self.commodity = Some(commodity.into());
        self
    }

    /// Check the commitment against the problem grid and device count, and fill
    /// the default grouping.
    pub fn normalized(&self, grid: &TimeGrid, devices: usize) -> Result<Self, SchedulerError> {
        let table = format!("commitment '{}'", self.name);
        if self.grid != *grid {
            return Err(SchedulerError::GridMismatch {
                table,
                expected: *grid,
                actual: self.grid,
            });
        }
        let steps = grid.len();
        check_length(&table, "quantity", self.quantity.len(), steps)?;

        for (direction, prices) in [
            ("upwards", &self.upwards_deviation_price),
            ("downwards", &self.downwards_deviation_price),
        ] {
            if let Some(prices) = prices {
                let column = if direction == "upwards" {
                    "upwards deviation price"
                } else {
                    "downwards deviation price"
                };
                check_length(&table, column, prices.len(), steps)?;
                if let Some(step) = prices.iter().position(|p| !p.is_finite()) {
                    return Err(SchedulerError::NonFinitePrice {
                        commitment: self.name.clone(),
                        direction,
                        step,
                    });
                }
            }
        }

        let group = if self.group.is_empty() {
            (0..steps as i64).collect()
        } else {
            check_length(&table, "group", self.group.len(), steps)?;
            self.group.clone()
        };

        if let Some(&device) = self.scope.devices().iter().find(|&&d| d >= devices) {
            return Err(SchedulerError::UnknownDevice {
                commitment: self.name.clone(),
                device,
                devices,
            });
        }

        Ok(Self {
            quantity: self
                .quantity
                .iter()
                .map(|q| q.filter(|x| !x.is_nan()))
                .collect(),
            group,
            ..self.clone()
        })
    }
}

/// Older input form: parallel lists of quantities and deviation prices, one
/// EMS-level flow commitment per list position, priced step by step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyCommitments {
    pub quantities: Vec<Vec<Option<f64>>>,
    pub downwards_deviation_prices: Vec<Vec<f64>>,
    pub upwards_deviation_prices: Vec<Vec<f64>>,
}

impl LegacyCommitments {
    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    /// Convert to flow commitments on `grid`, each step its own group
    pub fn to_commitments(&self, grid: &TimeGrid) -> Result<Vec<Commitment>, SchedulerError> {
        let count = self.quantities.len();
        check_length(
            "legacy commitments",
            "downwards deviation price",
            self.downwards_deviation_prices.len(),
            count,
        )?;
        check_length(
            "legacy commitments",
            "upwards deviation price",
            self.upwards_deviation_prices.len(),
            count,
        )?;

        Ok(self
            .quantities
            .iter()
            .zip(&self.downwards_deviation_prices)
            .zip(&self.upwards_deviation_prices)
            .enumerate()
            .map(|(i, ((quantity, down), up))| {
                Commitment::flow(format!("legacy commitment {i}"), *grid, quantity.clone())
                    .with_downwards_price(down.clone())
                    .with_upwards_price(up.clone())
                    .with_groups((0..grid.len() as i64).collect())
            })
            .collect())
    }
}

fn check_length(
    table: &str,
    column: &'static str,
    actual: usize,
    expected: usize,
) -> Result<(), SchedulerError> {
    if actual != expected {
        return Err(SchedulerError::ColumnLength {
            table: table.to_string(),
            column,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn grid(steps: usize) -> TimeGrid {
        TimeGrid::hourly(
            DateTime::parse_from_rfc3339("2026-03-01T00:00:00+00:00").unwrap(),
            steps,
        )
    }

    #[test]
    fn test_class_tags() {
        assert_eq!(CommitmentKind::parse("FlowCommitment").unwrap(), CommitmentKind::Flow);
        assert_eq!(CommitmentKind::parse("stock").unwrap(), CommitmentKind::Stock);
        assert_eq!(CommitmentKind::Stock.to_string(), "StockCommitment");
        assert!(matches!(
            CommitmentKind::parse("PriceCommitment"),
            Err(SchedulerError::UnknownCommitmentClass(tag)) if tag == "PriceCommitment"
        ));
    }

    #[test]
    fn test_class_defaults_to_flow_when_deserializing() {
        let json = serde_json::json!({
            "grid": grid(2),
            "quantity": [1.0, null],
        });
        let commitment: Commitment = serde_json::from_value(json).unwrap();
        assert_eq!(commitment.kind, CommitmentKind::Flow);
        assert_eq!(commitment.scope, Scope::Ems);
        assert_eq!(commitment.quantity, vec![Some(1.0), None]);
    }

    #[test]
    fn test_device_ids_accept_one_or_many() {
        let one: DeviceIds = serde_json::from_str("3").unwrap();
        let many: DeviceIds = serde_json::from_str("[2, 0, 2]").unwrap();
        assert_eq!(one.to_set(), BTreeSet::from([3]));
        assert_eq!(many.to_set(), BTreeSet::from([0, 2]));
    }

    #[test]
    fn test_scope_groups() {
        let scope = Scope::DeviceGroups(BTreeMap::from([
            ("buffer".to_string(), DeviceIds::Many(vec![0, 1])),
            ("tank".to_string(), DeviceIds::One(2)),
        ]));
        let groups = scope.device_groups();
        assert_eq!(groups["buffer"], BTreeSet::from([0, 1]));
        assert_eq!(scope.devices(), BTreeSet::from([0, 1, 2]));

        let listed = Scope::Devices(DeviceIds::Many(vec![4, 1])).device_groups();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed["1,4"], BTreeSet::from([1, 4]));
        assert_eq!(Scope::Devices(DeviceIds::One(2)).device_groups()["2"], BTreeSet::from([2]));
    }

    #[test]
    fn test_normalized_fills_groups_and_drops_nan() {
        let commitment = Commitment::flow("c", grid(3), vec![Some(1.0), Some(f64::NAN), None]);
        let normalized = commitment.normalized(&grid(3), 1).unwrap();
        assert_eq!(normalized.group, vec![0, 1, 2]);
        assert_eq!(normalized.quantity, vec![Some(1.0), None, None]);
    }

    #[test]
    fn test_normalized_rejects_grid_mismatch() {
        let commitment = Commitment::flow("c", grid(3), vec![Some(0.0); 3]);
        assert!(matches!(
            commitment.normalized(&grid(4), 1),
            Err(SchedulerError::GridMismatch { .. })
        ));
    }

    #[test]
    fn test_normalized_rejects_unknown_device() {
        let commitment = Commitment::flow("c", grid(2), vec![Some(0.0); 2]).for_devices(vec![0, 5]);
        assert!(matches!(
            commitment.normalized(&grid(2), 2),
            Err(SchedulerError::UnknownDevice { device: 5, devices: 2, .. })
        ));
    }

    #[test]
    fn test_legacy_conversion() {
        let legacy = LegacyCommitments {
            quantities: vec![vec![Some(0.0); 3]],
            downwards_deviation_prices: vec![vec![1.0, 2.0, 3.0]],
            upwards_deviation_prices: vec![vec![1.0, 2.0, 3.0]],
        };
        let commitments = legacy.to_commitments(&grid(3)).unwrap();
        assert_eq!(commitments.len(), 1);
        assert_eq!(commitments[0].kind, CommitmentKind::Flow);
        assert_eq!(commitments[0].group, vec![0, 1, 2]);
        assert_eq!(commitments[0].scope, Scope::Ems);
    }

    #[test]
    fn test_legacy_list_count_mismatch() {
        let legacy = LegacyCommitments {
            quantities: vec![vec![Some(0.0); 2]; 2],
            downwards_deviation_prices: vec![vec![0.0; 2]],
            upwards_deviation_prices: vec![vec![0.0; 2]; 2],
        };
        assert!(legacy.to_commitments(&grid(2)).is_err());
    }
}
