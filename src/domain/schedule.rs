use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::TimeGrid;

/// Planned flow of one device over the scheduling grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSchedule {
    pub device: usize,
    pub entries: Vec<ScheduleEntry>,
    /// Stock trajectory from the initial stock, one value more than `entries`
    pub stock: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub time_start: DateTime<FixedOffset>,
    pub time_end: DateTime<FixedOffset>,
    /// Net flow (positive = charging / consuming)
    pub power: f64,
    /// Charging component, >= 0
    pub charge: f64,
    /// Discharging component, <= 0
    pub discharge: f64,
}

impl DeviceSchedule {
    pub fn from_grid(
        device: usize,
        grid: &TimeGrid,
        charge: &[f64],
        discharge: &[f64],
        power: &[f64],
        stock: Vec<f64>,
    ) -> Self {
        let entries = (0..grid.len())
            .map(|j| ScheduleEntry {
                time_start: grid.step_start(j),
                time_end: grid.step_end(j),
                power: power[j],
                charge: charge[j],
                discharge: discharge[j],
            })
            .collect();
        Self {
            device,
            entries,
            stock,
        }
    }

    pub fn power_at(&self, t: DateTime<FixedOffset>) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| t >= e.time_start && t < e.time_end)
            .map(|e| e.power)
    }

    pub fn powers(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.power).collect()
    }

    pub fn final_stock(&self) -> Option<f64> {
        self.stock.last().copied()
    }
}
