//! Trajectories: time-ordered compartment values produced by one run.

use crate::error::{EngineError, Result};
use crate::grid::OutputTimes;
use nalgebra::DMatrix;
use serde::Serialize;

/// Compartment values at one instant, in the model's compartment order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateVector {
    pub time: f64,
    pub values: Vec<f64>,
}

impl StateVector {
    pub fn new(time: f64, values: Vec<f64>) -> Self {
        Self { time, values }
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }
}

/// Read-only record of one integration run, strictly increasing in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    compartments: &'static [&'static str],
    rows: Vec<StateVector>,
}

impl Trajectory {
    pub fn new(compartments: &'static [&'static str], rows: Vec<StateVector>) -> Result<Self> {
        if rows.is_empty() {
            return Err(EngineError::grid("trajectory has no rows"));
        }
        let width = compartments.len();
        if let Some(row) = rows.iter().find(|row| row.values.len() != width) {
            return Err(EngineError::InvalidInitialState(format!(
                "row at t = {} has {} values, expected {}",
                row.time,
                row.values.len(),
                width
            )));
        }
        if let Some(w) = rows.windows(2).find(|w| w[1].time <= w[0].time) {
            return Err(EngineError::grid(format!(
                "trajectory times must be strictly increasing ({} is followed by {})",
                w[0].time, w[1].time
            )));
        }
        Ok(Self { compartments, rows })
    }

    pub(crate) fn from_columns(
        compartments: &'static [&'static str],
        times: &[f64],
        states: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if times.len() != states.len() {
            return Err(EngineError::grid(format!(
                "{} times but {} states",
                times.len(),
                states.len()
            )));
        }
        let rows = times
            .iter()
            .zip(states)
            .map(|(&time, values)| StateVector { time, values })
            .collect();
        Self::new(compartments, rows)
    }

    pub fn compartments(&self) -> &'static [&'static str] {
        self.compartments
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[StateVector] {
        &self.rows
    }

    pub fn first(&self) -> &StateVector {
        &self.rows[0]
    }

    pub fn last(&self) -> &StateVector {
        &self.rows[self.rows.len() - 1]
    }

    pub fn times(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.time).collect()
    }

    pub fn column(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.compartments.len() {
            return None;
        }
        Some(self.rows.iter().map(|row| row.values[index]).collect())
    }

    pub fn column_by_name(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.compartments.iter().position(|c| *c == name)?;
        self.column(index)
    }

    /// Sum of all compartments at each row.
    pub fn totals(&self) -> Vec<f64> {
        self.rows.iter().map(StateVector::total).collect()
    }

    /// Largest `|sum(state) − total|` over the trajectory.
    pub fn max_conservation_error(&self, total: f64) -> f64 {
        self.rows
            .iter()
            .map(|row| (row.total() - total).abs())
            .fold(0.0, f64::max)
    }

    /// Column labels for [`Trajectory::to_matrix`]: `t`, then compartments.
    pub fn header(&self) -> Vec<&'static str> {
        std::iter::once("t")
            .chain(self.compartments.iter().copied())
            .collect()
    }

    /// One row per time point; column 0 is time, then compartments in model
    /// order.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        let width = self.compartments.len() + 1;
        DMatrix::from_fn(self.rows.len(), width, |i, j| {
            let row = &self.rows[i];
            if j == 0 {
                row.time
            } else {
                row.values[j - 1]
            }
        })
    }

    /// Linearly interpolates onto `times`.
    ///
    /// Times outside the trajectory's span are rejected, except for a
    /// rounding-sized overshoot at either end, which is clamped.
    pub fn resample(&self, times: &OutputTimes) -> Result<Trajectory> {
        let first = self.first().time;
        let last = self.last().time;
        let tol = 1e-9 * (last - first).abs().max(1.0);
        if times.first() < first - tol || times.last() > last + tol {
            return Err(EngineError::grid(format!(
                "cannot resample [{}, {}] from a trajectory spanning [{first}, {last}]",
                times.first(),
                times.last()
            )));
        }

        let rows = times
            .as_slice()
            .iter()
            .map(|&t| StateVector {
                time: t,
                values: self.interpolate(t),
            })
            .collect();
        Trajectory::new(self.compartments, rows)
    }

    fn interpolate(&self, t: f64) -> Vec<f64> {
        let upper = self.rows.partition_point(|row| row.time <= t);
        if upper == 0 {
            return self.rows[0].values.clone();
        }
        if upper == self.rows.len() {
            return self.last().values.clone();
        }
        let a = &self.rows[upper - 1];
        let b = &self.rows[upper];
        let w = (t - a.time) / (b.time - a.time);
        a.values
            .iter()
            .zip(&b.values)
            .map(|(va, vb)| va + w * (vb - va))
            .collect()
    }
}
