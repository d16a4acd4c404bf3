//! End-to-end scheduling scenarios on the built-in microlp backend.
//!
//! ```bash
//! cargo test --test scheduling_scenarios
//! ```

#![cfg(feature = "microlp")]

mod common;

use common::*;
use device_scheduler::domain::{
    Commitment, DeviceConstraints, DeviceIds, EmsConstraints, LegacyCommitments, Scope,
};
use device_scheduler::optimizer::{
    InitialStock, SchedulerError, SchedulingProblem, StockLossPolicy, TerminationCondition,
};
use std::collections::BTreeMap;

fn arbitrage_prices() -> Vec<f64> {
    [vec![-10.0; 8], vec![100.0; 8], vec![-10.0; 8]].concat()
}

#[test]
fn test_battery_arbitrage_over_a_day() {
    let g = grid(24);
    let problem = SchedulingProblem::new(vec![battery(g, 4.0, 1.0)], EmsConstraints::new(g))
        .with_commitment(Commitment::energy_price("day-ahead", g, arbitrage_prices()));

    let result = scheduler().schedule(&problem).unwrap();

    assert_eq!(
        result.results.termination_condition,
        TerminationCondition::Optimal
    );
    assert_close(result.planned_costs, -480.0);
    assert_close(result.commitment_costs[&0], -480.0);

    // fill up while paid to consume, empty while prices are high, fill up again
    assert_close(block_sum(&result, 0, 0..8), 4.0);
    assert_close(block_sum(&result, 0, 8..16), -4.0);
    assert_close(block_sum(&result, 0, 16..24), 4.0);

    let schedule = &result.planned_power_per_device[0];
    assert_eq!(schedule.entries.len(), 24);
    assert_eq!(schedule.entries[0].time_start, g.step_start(0));
    assert_eq!(schedule.stock.len(), 25);
    for stock in &schedule.stock {
        assert!(*stock > -TOLERANCE && *stock < 4.0 + TOLERANCE);
    }
    for entry in &schedule.entries {
        assert_close(entry.power, entry.charge + entry.discharge);
        assert!(entry.power.abs() <= 1.0 + TOLERANCE);
    }
}

#[test]
fn test_legacy_commitments_give_the_same_plan() {
    let g = grid(24);
    let legacy = LegacyCommitments {
        quantities: vec![vec![Some(0.0); 24]],
        downwards_deviation_prices: vec![arbitrage_prices()],
        upwards_deviation_prices: vec![arbitrage_prices()],
    };
    let problem = SchedulingProblem::new(vec![battery(g, 4.0, 1.0)], EmsConstraints::new(g))
        .with_legacy_commitments(legacy);

    let result = scheduler().schedule(&problem).unwrap();
    assert_close(result.planned_costs, -480.0);
    assert_eq!(result.commitment_costs.len(), 1);
}

#[test]
fn test_ems_limit_caps_aggregate_flow() {
    let g = grid(24);
    let problem = SchedulingProblem::new(
        vec![battery(g, 4.0, 1.0), battery(g, 4.0, 1.0)],
        EmsConstraints::new(g).with_flow_bounds(-1.0, 1.0),
    )
    .with_commitment(Commitment::energy_price("day-ahead", g, arbitrage_prices()));

    let result = scheduler().schedule(&problem).unwrap();
    // two batteries behind a 1 MW connection still cycle 4 units per block each
    assert_close(result.planned_costs, -960.0);
    for j in 0..24 {
        let total: f64 = result
            .planned_power_per_device
            .iter()
            .map(|s| s.entries[j].power)
            .sum();
        assert!(total.abs() <= 1.0 + TOLERANCE);
    }
}

#[test]
fn test_unreachable_stock_is_infeasible_not_an_error() {
    let g = grid(4);
    let device = battery(g, 12.0, 1.0).with_stock_bounds(10.0, 12.0);
    let problem = SchedulingProblem::new(vec![device], EmsConstraints::new(g))
        .with_commitment(Commitment::energy_price("day-ahead", g, vec![1.0; 4]));

    let result = scheduler().schedule(&problem).unwrap();
    assert_eq!(
        result.results.termination_condition,
        TerminationCondition::Infeasible
    );
    assert!(!result.has_solution());
    assert_eq!(result.planned_costs, 0.0);
    assert_eq!(result.commitment_costs[&0], 0.0);
}

#[test]
fn test_shared_buffer_breach_is_paid_once() {
    let g = grid(2);
    let breach_price = 7.0;
    let charging = || {
        let mut device = fixed_load(g, 0.0);
        device.derivative_equals = vec![Some(1.0), Some(0.0)];
        device
    };
    let buffer = Commitment::stock("shared buffer", g, vec![Some(1.0), None])
        .with_upwards_price(vec![breach_price; 2])
        .with_scope(Scope::DeviceGroups(BTreeMap::from([(
            "buffer".to_string(),
            DeviceIds::Many(vec![0, 1]),
        )])));
    let problem = SchedulingProblem::new(vec![charging(), charging()], EmsConstraints::new(g))
        .with_commitment(buffer);

    let result = scheduler().schedule(&problem).unwrap();
    // two devices each add 1 to a buffer committed at 1: one unit of breach
    assert_close(result.planned_costs, breach_price);
    assert_close(result.commitment_costs[&0], breach_price);
}

#[test]
fn test_device_scoped_commitment_sees_only_its_device() {
    let g = grid(2);
    let charging = || {
        let mut device = fixed_load(g, 0.0);
        device.derivative_equals = vec![Some(1.0), Some(0.0)];
        device
    };
    let cap = |scope: Scope| {
        Commitment::stock("cap", g, vec![Some(0.5), None])
            .with_upwards_price(vec![2.0; 2])
            .with_scope(scope)
    };

    let problem = SchedulingProblem::new(vec![charging(), charging()], EmsConstraints::new(g));
    let device_only = scheduler()
        .schedule(&problem.clone().with_commitment(cap(Scope::Devices(DeviceIds::One(1)))))
        .unwrap();
    let ems_wide = scheduler()
        .schedule(&problem.with_commitment(cap(Scope::Ems)))
        .unwrap();

    assert_close(device_only.planned_costs, 2.0 * 0.5);
    assert_close(ems_wide.planned_costs, 2.0 * 1.5);
}

#[test]
fn test_multi_device_scope_sums_the_listed_devices() {
    let g = grid(4);
    let devices = vec![fixed_load(g, 1.0), fixed_load(g, 0.0), fixed_load(g, 5.0)];
    let problem = SchedulingProblem::new(devices, EmsConstraints::new(g)).with_commitment(
        Commitment::energy_price("sub-meter", g, vec![1.0; 4]).for_devices(vec![0, 1]),
    );

    let result = scheduler().schedule(&problem).unwrap();
    assert!(result.results.is_optimal());
    // device 2 is outside the scope, devices 0 and 1 draw 1 MW together
    assert_close(result.planned_costs, 4.0);
    assert_close(result.commitment_costs[&0], 4.0);
}

#[test]
fn test_convex_curve_needs_no_binaries() {
    let g = grid(12);
    let prices = vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0, 5.0, 8.0];
    let device = battery(g, 3.0, 1.0).with_conversion_efficiencies(0.9, 0.9);
    let problem = SchedulingProblem::new(vec![device], EmsConstraints::new(g))
        .with_commitment(Commitment::energy_price("day-ahead", g, prices));

    let relaxed = scheduler().schedule(&problem).unwrap();
    let forced = scheduler_with(|config| config.model.force_sign_binaries = true)
        .schedule(&problem)
        .unwrap();

    assert!(relaxed.results.is_optimal());
    assert!(forced.results.is_optimal());
    assert!(relaxed.planned_costs < 0.0);
    assert_close(relaxed.planned_costs, forced.planned_costs);
}

#[test]
fn test_forced_binaries_keep_decaying_initial_stock_feasible() {
    let g = grid(3);
    let device = fixed_load(g, 0.0).with_storage_efficiency(0.5);
    let hold = Commitment::stock("hold", g, vec![Some(0.0); 3])
        .with_upwards_price(vec![1.0; 3])
        .with_downwards_price(vec![-1.0; 3]);
    let problem = SchedulingProblem::new(vec![device], EmsConstraints::new(g))
        .with_commitment(hold)
        .with_initial_stock(InitialStock::Uniform(100.0));

    let relaxed = scheduler().schedule(&problem).unwrap();
    let forced = scheduler_with(|config| config.model.force_sign_binaries = true)
        .schedule(&problem)
        .unwrap();

    assert!(relaxed.results.is_optimal());
    assert!(forced.results.is_optimal());
    // the stock falls short of 100 by 50, 75 and 87.5
    assert!((relaxed.planned_costs - 212.5).abs() < 1e-6 * 212.5);
    assert!((forced.planned_costs - relaxed.planned_costs).abs() < 1e-6 * 212.5);
}

#[test]
fn test_forced_binaries_leave_unbounded_flow_alone() {
    let g = grid(2);
    let device = DeviceConstraints::new(g).with_stock_bounds(0.0, 5.0);
    let problem = SchedulingProblem::new(vec![device], EmsConstraints::new(g))
        .with_commitment(Commitment::energy_price("day-ahead", g, vec![-1.0, 1.0]));

    let relaxed = scheduler().schedule(&problem).unwrap();
    let forced = scheduler_with(|config| config.model.force_sign_binaries = true)
        .schedule(&problem)
        .unwrap();

    // fill the whole stock in one step, empty it in the next
    assert_close(relaxed.planned_costs, -10.0);
    assert_close(forced.planned_costs, -10.0);
    assert_close(forced.planned_power_per_device[0].entries[0].power, 5.0);
}

#[test]
fn test_non_convex_curve_never_buys_and_sells_at_once() {
    let g = grid(4);
    // buying costs 5, selling earns 10
    let tariff = Commitment::flow("tariff", g, vec![Some(0.0); 4])
        .with_upwards_price(vec![5.0; 4])
        .with_downwards_price(vec![10.0; 4]);
    let problem = SchedulingProblem::new(vec![battery(g, 2.0, 1.0)], EmsConstraints::new(g))
        .with_commitment(tariff);

    let result = scheduler().schedule(&problem).unwrap();
    assert!(result.results.is_optimal());
    assert_close(result.planned_costs, -10.0);
    for entry in &result.planned_power_per_device[0].entries {
        assert!(!(entry.charge > TOLERANCE && entry.discharge < -TOLERANCE));
        assert_close(entry.power, entry.charge + entry.discharge);
    }
}

#[test]
fn test_commodity_costs_add_up() {
    let g = grid(3);
    let devices = vec![
        fixed_load(g, 1.0).with_commodity("electricity"),
        fixed_load(g, 1.0).with_commodity("gas"),
    ];
    let problem = SchedulingProblem::new(devices, EmsConstraints::new(g))
        .with_commitment(
            Commitment::energy_price("electricity", g, vec![2.0; 3]).with_commodity("electricity"),
        )
        .with_commitment(Commitment::energy_price("gas", g, vec![3.0; 3]).with_commodity("gas"));

    let result = scheduler().schedule(&problem.clone()).unwrap();
    assert_close(result.commodity_costs["electricity"], 6.0);
    assert_close(result.commodity_costs["gas"], 9.0);
    let total: f64 = result.commodity_costs.values().sum();
    assert_close(total, result.planned_costs);

    // an untagged commitment adds cost outside the commodity roll-up
    let peak = Commitment::flow("connection", g, vec![Some(1.0); 3]).with_upwards_price(vec![1.0; 3]);
    let result = scheduler()
        .schedule(&problem.with_commitment(peak))
        .unwrap();
    let total: f64 = result.commodity_costs.values().sum();
    assert_close(result.planned_costs, 18.0);
    assert_close(result.commitment_costs[&2], 3.0);
    assert!(total <= result.planned_costs + TOLERANCE);
}

#[test]
fn test_unregistered_commodity_is_skipped() {
    let g = grid(2);
    let problem = SchedulingProblem::new(vec![fixed_load(g, 1.0)], EmsConstraints::new(g))
        .with_commitment(Commitment::energy_price("hydrogen", g, vec![4.0; 2]).with_commodity("hydrogen"));

    let result = scheduler().schedule(&problem).unwrap();
    assert!(result.results.is_optimal());
    assert_close(result.planned_costs, 0.0);
    assert_eq!(result.commodity_costs.get("hydrogen"), Some(&0.0));
}

#[test]
fn test_initial_stock_decays_with_storage_losses() {
    let g = grid(3);
    let device = fixed_load(g, 0.0).with_storage_efficiency(0.5);
    let problem = SchedulingProblem::new(vec![device], EmsConstraints::new(g))
        .with_initial_stock(InitialStock::Uniform(4.0));

    let result = scheduler().schedule(&problem).unwrap();
    let stock = &result.planned_power_per_device[0].stock;
    assert_eq!(stock.len(), 4);
    for (actual, expected) in stock.iter().zip([4.0, 2.0, 1.0, 0.5]) {
        assert_close(*actual, expected);
    }
}

#[test]
fn test_losses_must_be_topped_up_to_hold_stock() {
    let g = grid(2);
    let mut device = leaky_storage(g, 0.5).with_flow_bounds(0.0, 2.0);
    device.min = vec![Some(-1.0); 2];
    let problem = SchedulingProblem::new(vec![device], EmsConstraints::new(g))
        .with_commitment(Commitment::energy_price("day-ahead", g, vec![1.0; 2]))
        .with_initial_stock(InitialStock::PerDevice(vec![4.0]));

    let result = scheduler_with(|config| config.model.stock_loss_policy = StockLossPolicy::Right)
        .schedule(&problem)
        .unwrap();
    let powers = result.planned_power_per_device[0].powers();
    // 4 -> 2 + 1 = 3, then 1.5 + 1.5 = 3
    assert_close(powers[0], 1.0);
    assert_close(powers[1], 1.5);
    assert_close(result.planned_costs, 2.5);
}

#[test]
fn test_no_devices_skips_the_solver() {
    let g = grid(4);
    let problem = SchedulingProblem::new(vec![], EmsConstraints::new(g))
        .with_commitment(Commitment::energy_price("day-ahead", g, vec![1.0; 4]));
    let result = scheduler().schedule(&problem).unwrap();
    assert_eq!(
        result.results.termination_condition,
        TerminationCondition::Skipped
    );
    assert_eq!(result.planned_costs, 0.0);
}

#[test]
fn test_commitment_on_another_grid_is_rejected() {
    let problem = SchedulingProblem::new(vec![battery(grid(4), 1.0, 1.0)], EmsConstraints::new(grid(4)))
        .with_commitment(Commitment::energy_price("day-ahead", grid(5), vec![1.0; 5]));
    assert!(matches!(
        scheduler().schedule(&problem),
        Err(SchedulerError::GridMismatch { .. })
    ));
}

#[test]
fn test_varying_price_within_group_is_rejected() {
    let g = grid(3);
    let peak = Commitment::flow("peak", g, vec![Some(0.0); 3])
        .with_upwards_price(vec![1.0, 2.0, 1.0])
        .single_group();
    let problem = SchedulingProblem::new(vec![battery(g, 1.0, 1.0)], EmsConstraints::new(g))
        .with_commitment(peak);
    let err = scheduler().schedule(&problem).unwrap_err();
    assert!(matches!(err, SchedulerError::NonUniquePrice { .. }));
    assert!(err.to_string().contains("peak"));
}
