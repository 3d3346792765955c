use crate::adaptive::{AdaptiveIntegrator, AdaptiveSettings};
use crate::error::Result;
use crate::grid::{OutputTimes, UniformGrid};
use crate::solvers::{check_dimension, FiniteDifferenceStepper, Scheme};
use crate::trajectory::{StateVector, Trajectory};
use crate::traits::{CompartmentModel, Steppable};
use log::debug;

/// How a [`Simulator`] run advances the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Integration {
    /// Fixed-step run over an implicit grid.
    FiniteDifference { scheme: Scheme, grid: UniformGrid },
    /// Reference run sampled at explicit times, starting from the first one.
    Adaptive {
        times: OutputTimes,
        settings: AdaptiveSettings,
    },
}

impl Integration {
    pub fn finite_difference(scheme: Scheme, t0: f64, t_end: f64, dt: f64) -> Result<Self> {
        Ok(Integration::FiniteDifference {
            scheme,
            grid: UniformGrid::spanning(t0, t_end, dt)?,
        })
    }

    pub fn adaptive(times: OutputTimes) -> Self {
        Integration::Adaptive {
            times,
            settings: AdaptiveSettings::default(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Integration::FiniteDifference { scheme, grid } => {
                format!("{} dt={}", scheme.name(), grid.dt())
            }
            Integration::Adaptive { .. } => "adaptive".to_string(),
        }
    }
}

/// Runs a model from an initial state and returns the full trajectory.
///
/// Each run owns its stepper and buffers, so runs are independent and a
/// failed run yields no trajectory at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simulator;

impl Simulator {
    pub fn new() -> Self {
        Self
    }

    pub fn run<M: CompartmentModel + ?Sized>(
        &self,
        model: &M,
        initial_state: &[f64],
        integration: &Integration,
    ) -> Result<Trajectory> {
        debug!("{}: starting {} run", model.name(), integration.label());
        let trajectory = match integration {
            Integration::FiniteDifference { scheme, grid } => {
                self.run_finite_difference(model, initial_state, *scheme, grid)
            }
            Integration::Adaptive { times, settings } => {
                self.run_adaptive(model, initial_state, times, *settings)
            }
        }?;
        debug!(
            "{}: {} run finished with {} rows",
            model.name(),
            integration.label(),
            trajectory.len()
        );
        Ok(trajectory)
    }

    /// Applies `scheme` at every grid transition. Row `i` is stamped with the
    /// grid's time `i` exactly.
    pub fn run_finite_difference<M: CompartmentModel + ?Sized>(
        &self,
        model: &M,
        initial_state: &[f64],
        scheme: Scheme,
        grid: &UniformGrid,
    ) -> Result<Trajectory> {
        check_dimension(model, initial_state)?;
        let mut stepper = FiniteDifferenceStepper::new(scheme, grid.dt())?;

        let mut state = initial_state.to_vec();
        let mut rows = Vec::with_capacity(grid.len());
        rows.push(StateVector::new(grid.t0(), state.clone()));

        for i in 1..grid.len() {
            let mut t = grid.time(i - 1);
            stepper.step(model, &mut t, &mut state);
            rows.push(StateVector::new(grid.time(i), state.clone()));
        }

        Trajectory::new(model.compartments(), rows)
    }

    pub fn run_adaptive<M: CompartmentModel + ?Sized>(
        &self,
        model: &M,
        initial_state: &[f64],
        times: &OutputTimes,
        settings: AdaptiveSettings,
    ) -> Result<Trajectory> {
        AdaptiveIntegrator::new(settings)?.solve(model, initial_state, times.first(), times)
    }
}
