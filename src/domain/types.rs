use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Time Grid
// ============================================================================

/// Shared time grid of a scheduling problem.
///
/// The grid is the half-open sequence of `steps` equal-length intervals
/// `[start, start + resolution), ..., [end - resolution, end)`. Every device
/// table, the EMS table and every commitment carry one, and all of them must be
/// identical for a problem to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeGrid {
    /// Start of the first step
    pub start: DateTime<FixedOffset>,
    /// Length of one step in seconds
    pub resolution_seconds: i64,
    /// Number of steps
    pub steps: usize,
}

impl TimeGrid {
    pub fn new(start: DateTime<FixedOffset>, resolution: Duration, steps: usize) -> Self {
        Self {
            start,
            resolution_seconds: resolution.num_seconds(),
            steps,
        }
    }

    /// Hourly grid, the most common shape for day-ahead scheduling
    pub fn hourly(start: DateTime<FixedOffset>, steps: usize) -> Self {
        Self::new(start, Duration::hours(1), steps)
    }

    pub fn len(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps == 0
    }

    pub fn resolution(&self) -> Duration {
        Duration::seconds(self.resolution_seconds)
    }

    /// Step length in hours, for converting energy (e.g. MWh) into the
    /// flow-times-step units the optimizer counts stock in.
    pub fn step_hours(&self) -> f64 {
        self.resolution_seconds as f64 / 3600.0
    }

    /// Exclusive end of the grid
    pub fn end(&self) -> DateTime<FixedOffset> {
        self.start + Duration::seconds(self.resolution_seconds * self.steps as i64)
    }

    pub fn step_start(&self, step: usize) -> DateTime<FixedOffset> {
        self.start + Duration::seconds(self.resolution_seconds * step as i64)
    }

    pub fn step_end(&self, step: usize) -> DateTime<FixedOffset> {
        self.step_start(step + 1)
    }

    /// Index of the step containing `t`, if any
    pub fn step_of(&self, t: DateTime<FixedOffset>) -> Option<usize> {
        if t < self.start || t >= self.end() || self.resolution_seconds <= 0 {
            return None;
        }
        let offset = t.signed_duration_since(self.start).num_seconds();
        Some((offset / self.resolution_seconds) as usize)
    }
}

impl fmt::Display for TimeGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) in {} steps of {}s",
            self.start.to_rfc3339(),
            self.end().to_rfc3339(),
            self.steps,
            self.resolution_seconds
        )
    }
}
