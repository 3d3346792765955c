use crate::error::{check_step_size, EngineError, Result};
use serde::{Deserialize, Serialize};

/// Largest step count a [`UniformGrid`] accepts.
pub const MAX_GRID_STEPS: usize = (u32::MAX - 1) as usize;

/// Implicit time grid `t0, t0 + dt, .., t0 + steps·dt` for fixed-step runs.
///
/// Point `i` is computed as `t0 + i·dt` rather than accumulated, so long
/// grids do not drift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UniformGrid {
    t0: f64,
    dt: f64,
    steps: usize,
}

impl UniformGrid {
    pub fn new(t0: f64, dt: f64, steps: usize) -> Result<Self> {
        check_step_size(dt)?;
        if !t0.is_finite() {
            return Err(EngineError::grid(format!("start time must be finite, got {t0}")));
        }
        if steps == 0 {
            return Err(EngineError::grid("grid requires at least one step"));
        }
        if steps > MAX_GRID_STEPS {
            return Err(EngineError::grid(format!(
                "{steps} steps exceeds the limit of {MAX_GRID_STEPS}"
            )));
        }
        Ok(Self { t0, dt, steps })
    }

    /// Grid from `t0` to `t_end` with the step count rounded to the nearest
    /// whole number of `dt` steps.
    pub fn spanning(t0: f64, t_end: f64, dt: f64) -> Result<Self> {
        check_step_size(dt)?;
        if !t0.is_finite() || !t_end.is_finite() {
            return Err(EngineError::grid("grid bounds must be finite"));
        }
        if t_end <= t0 {
            return Err(EngineError::grid(format!(
                "end time {t_end} must be after start time {t0}"
            )));
        }
        let steps = ((t_end - t0) / dt).round();
        if steps < 1.0 {
            return Err(EngineError::grid(format!(
                "interval [{t0}, {t_end}] is shorter than half a step of {dt}"
            )));
        }
        Self::new(t0, dt, step_count(steps)?)
    }

    /// Smallest grid from `t0` whose last point is at or past `t_end`.
    pub fn covering(t0: f64, t_end: f64, dt: f64) -> Result<Self> {
        check_step_size(dt)?;
        if !t0.is_finite() || !t_end.is_finite() {
            return Err(EngineError::grid("grid bounds must be finite"));
        }
        if t_end <= t0 {
            return Err(EngineError::grid(format!(
                "end time {t_end} must be after start time {t0}"
            )));
        }
        let ratio = (t_end - t0) / dt;
        if !ratio.is_finite() {
            return Err(EngineError::grid(format!(
                "interval [{t0}, {t_end}] cannot be divided into steps of {dt}"
            )));
        }
        // Ratios within rounding of a whole number do not add a step.
        let steps = (ratio - 1e-9 * ratio.max(1.0)).ceil().max(1.0);
        Self::new(t0, dt, step_count(steps)?)
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of grid points, `steps + 1`.
    pub fn len(&self) -> usize {
        self.steps + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn time(&self, index: usize) -> f64 {
        self.t0 + index as f64 * self.dt
    }

    pub fn t_end(&self) -> f64 {
        self.time(self.steps)
    }

    pub fn times(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.time(i)).collect()
    }
}

// `as usize` saturates, so oversized counts are rejected before the cast.
fn step_count(steps: f64) -> Result<usize> {
    if !steps.is_finite() || steps > MAX_GRID_STEPS as f64 {
        return Err(EngineError::grid(format!(
            "{steps} steps exceeds the limit of {MAX_GRID_STEPS}"
        )));
    }
    Ok(steps as usize)
}

/// Explicit, strictly increasing output times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct OutputTimes(Vec<f64>);

impl OutputTimes {
    pub fn new(times: Vec<f64>) -> Result<Self> {
        if times.is_empty() {
            return Err(EngineError::grid("output times are empty"));
        }
        if let Some(bad) = times.iter().find(|t| !t.is_finite()) {
            return Err(EngineError::grid(format!("output time {bad} is not finite")));
        }
        if let Some(w) = times.windows(2).find(|w| w[1] <= w[0]) {
            return Err(EngineError::grid(format!(
                "output times must be strictly increasing ({} is followed by {})",
                w[0], w[1]
            )));
        }
        Ok(Self(times))
    }

    /// `count` evenly spaced times from `start` to `end` inclusive.
    pub fn linspace(start: f64, end: f64, count: usize) -> Result<Self> {
        if count < 2 {
            return Err(EngineError::grid("linspace requires at least two points"));
        }
        let span = end - start;
        let last = (count - 1) as f64;
        let times = (0..count)
            .map(|i| {
                if i + 1 == count {
                    end
                } else {
                    start + span * i as f64 / last
                }
            })
            .collect();
        Self::new(times)
    }

    pub fn first(&self) -> f64 {
        self.0[0]
    }

    pub fn last(&self) -> f64 {
        self.0[self.0.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl TryFrom<Vec<f64>> for OutputTimes {
    type Error = EngineError;

    fn try_from(times: Vec<f64>) -> Result<Self> {
        Self::new(times)
    }
}

impl From<OutputTimes> for Vec<f64> {
    fn from(times: OutputTimes) -> Self {
        times.0
    }
}

impl From<UniformGrid> for OutputTimes {
    fn from(grid: UniformGrid) -> Self {
        Self(grid.times())
    }
}
