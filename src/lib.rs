//! Device scheduler.
//!
//! Plans the flows of flexible devices (batteries, heat buffers, shiftable
//! processes) over a time grid so that deviations from flow and stock
//! commitments cost as little as possible. The problem is built as an LP,
//! or a MILP when the commitment cost curve is not convex, and solved with a
//! `good_lp` backend.

pub mod config;
pub mod domain;
pub mod optimizer;
pub mod telemetry;

pub use config::Config;
pub use domain::{Commitment, DeviceConstraints, EmsConstraints, TimeGrid};
pub use optimizer::{DeviceScheduler, ScheduleResult, SchedulerError, SchedulingProblem};
