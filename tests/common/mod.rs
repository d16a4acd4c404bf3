#![allow(dead_code)]

use chrono::DateTime;
use device_scheduler::config::Config;
use device_scheduler::domain::{DeviceConstraints, TimeGrid};
use device_scheduler::optimizer::{DeviceScheduler, ScheduleResult};

pub const TOLERANCE: f64 = 1e-6;

pub fn grid(steps: usize) -> TimeGrid {
    TimeGrid::hourly(
        DateTime::parse_from_rfc3339("2026-06-01T00:00:00+02:00").unwrap(),
        steps,
    )
}

/// Loss-free battery with symmetric power limit, stock between 0 and `capacity`
pub fn battery(grid: TimeGrid, capacity: f64, power: f64) -> DeviceConstraints {
    DeviceConstraints::new(grid)
        .with_flow_bounds(-power, power)
        .with_stock_bounds(0.0, capacity)
}

/// Device that draws exactly `power` every step
pub fn fixed_load(grid: TimeGrid, power: f64) -> DeviceConstraints {
    let mut device = DeviceConstraints::new(grid);
    device.derivative_equals = vec![Some(power); grid.len()];
    device
}

pub fn scheduler() -> DeviceScheduler {
    DeviceScheduler::new(Config::default())
}

pub fn scheduler_with(configure: impl FnOnce(&mut Config)) -> DeviceScheduler {
    let mut config = Config::default();
    configure(&mut config);
    DeviceScheduler::new(config)
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < TOLERANCE,
        "expected {expected}, got {actual}"
    );
}

pub fn block_sum(result: &ScheduleResult, device: usize, steps: std::ops::Range<usize>) -> f64 {
    result.planned_power_per_device[device].entries[steps]
        .iter()
        .map(|e| e.power)
        .sum()
}

/// Storage without stock bounds that keeps `retention` of its content each step
pub fn leaky_storage(grid: TimeGrid, retention: f64) -> DeviceConstraints {
    DeviceConstraints::new(grid).with_storage_efficiency(retention)
}
