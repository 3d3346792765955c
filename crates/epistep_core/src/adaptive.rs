//! Adaptive-step reference integration.
//!
//! [`AdaptiveIntegrator`] samples a model at requested output times through
//! any [`OdeSolver`]. The default solver, [`AdaptiveTsit5`], is a Tsitouras
//! 5(4) embedded pair with error-controlled step sizes that are clipped so
//! every output time is hit exactly rather than interpolated.

use crate::error::{EngineError, Result};
use crate::grid::OutputTimes;
use crate::solvers::{check_dimension, Tsit5};
use crate::trajectory::Trajectory;
use crate::traits::{CompartmentModel, OdeSolver};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

const SAFETY: f64 = 0.9;
const MAX_GROWTH: f64 = 5.0;
const MAX_SHRINK: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    pub rtol: f64,
    pub atol: f64,
    /// First trial step; `0.0` picks one from the integration span.
    pub initial_step: f64,
    pub min_step: f64,
    /// `None` leaves steps bounded only by the distance to the next output.
    pub max_step: Option<f64>,
    pub max_steps: usize,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-10,
            initial_step: 0.0,
            min_step: 1e-12,
            max_step: None,
            max_steps: 100_000,
        }
    }
}

impl AdaptiveSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(EngineError::settings(format!(
                "rtol must be finite and positive, got {}",
                self.rtol
            )));
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(EngineError::settings(format!(
                "atol must be finite and positive, got {}",
                self.atol
            )));
        }
        if !self.initial_step.is_finite() || self.initial_step < 0.0 {
            return Err(EngineError::settings(format!(
                "initial_step must be finite and non-negative, got {}",
                self.initial_step
            )));
        }
        if !self.min_step.is_finite() || self.min_step <= 0.0 {
            return Err(EngineError::settings(format!(
                "min_step must be finite and positive, got {}",
                self.min_step
            )));
        }
        if let Some(max_step) = self.max_step {
            if max_step.is_nan() || max_step <= self.min_step {
                return Err(EngineError::settings(format!(
                    "max_step {max_step} must exceed min_step {}",
                    self.min_step
                )));
            }
        }
        if self.max_steps == 0 {
            return Err(EngineError::settings("max_steps must be greater than zero"));
        }
        Ok(())
    }

    fn first_step(&self, span: f64) -> f64 {
        let h = if self.initial_step > 0.0 {
            self.initial_step
        } else {
            (span * 1e-3).max(self.min_step)
        };
        self.max_step.map_or(h, |max| h.min(max))
    }
}

/// Tsitouras 5(4) solver with step-size control.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdaptiveTsit5 {
    settings: AdaptiveSettings,
}

impl AdaptiveTsit5 {
    pub fn new(settings: AdaptiveSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &AdaptiveSettings {
        &self.settings
    }

    // RMS of the error scaled by atol + rtol·max(|y|, |y_new|).
    fn error_norm(&self, y: &[f64], y_new: &[f64], err: &[f64]) -> f64 {
        let sum: f64 = y
            .iter()
            .zip(y_new)
            .zip(err)
            .map(|((a, b), e)| {
                let scale = self.settings.atol + self.settings.rtol * a.abs().max(b.abs());
                (e / scale).powi(2)
            })
            .sum();
        (sum / err.len().max(1) as f64).sqrt()
    }
}

impl OdeSolver for AdaptiveTsit5 {
    fn solve<M: CompartmentModel + ?Sized>(
        &self,
        model: &M,
        t0: f64,
        y0: &[f64],
        times: &[f64],
    ) -> Result<Vec<Vec<f64>>> {
        let settings = &self.settings;
        let dim = y0.len();
        let span = times.last().map_or(0.0, |end| end - t0);

        let mut tsit = Tsit5::new(dim);
        let mut y = y0.to_vec();
        let mut y_new = vec![0.0; dim];
        let mut err = vec![0.0; dim];
        let mut t = t0;
        let mut h = settings.first_step(span);
        let mut attempts = 0usize;
        let mut rejected = 0usize;
        let mut samples = Vec::with_capacity(times.len());

        for &target in times {
            while t < target {
                if attempts >= settings.max_steps {
                    return Err(EngineError::integration(
                        t,
                        format!("exceeded {} steps before reaching t = {target}", settings.max_steps),
                    ));
                }
                attempts += 1;

                let remaining = target - t;
                let clipped = h >= remaining;
                let dt = if clipped { remaining } else { h };
                if !clipped && dt < settings.min_step {
                    return Err(EngineError::integration(
                        t,
                        format!("step size {dt} fell below the minimum {}", settings.min_step),
                    ));
                }

                tsit.attempt(model, t, &y, dt, &mut y_new, &mut err);
                let norm = self.error_norm(&y, &y_new, &err);
                let finite = norm.is_finite() && y_new.iter().all(|v| v.is_finite());

                if finite && norm <= 1.0 {
                    t = if clipped { target } else { t + dt };
                    y.copy_from_slice(&y_new);
                    tsit.accept();

                    let factor = if norm == 0.0 {
                        MAX_GROWTH
                    } else {
                        (SAFETY * norm.powf(-0.2)).min(MAX_GROWTH)
                    };
                    let next = dt * factor;
                    // A step shortened to land on an output says nothing about
                    // the largest acceptable step.
                    h = if clipped { h.max(next) } else { next };
                    if let Some(max) = settings.max_step {
                        h = h.min(max);
                    }
                } else {
                    rejected += 1;
                    let factor = if finite {
                        (SAFETY * norm.powf(-0.2)).max(MAX_SHRINK)
                    } else {
                        MAX_SHRINK
                    };
                    h = dt * factor;
                    trace!("rejected step of {dt} at t = {t} (error norm {norm}), retrying with {h}");
                    if h < settings.min_step {
                        return Err(EngineError::integration(
                            t,
                            format!(
                                "step size {h} fell below the minimum {} (error norm {norm})",
                                settings.min_step
                            ),
                        ));
                    }
                }
            }
            samples.push(y.clone());
        }

        debug!(
            "{}: adaptive solve over [{t0}, {}] took {attempts} attempts ({rejected} rejected)",
            model.name(),
            t0 + span
        );
        Ok(samples)
    }
}

/// Reference integrator sampling a model exactly at requested times.
#[derive(Debug, Clone)]
pub struct AdaptiveIntegrator<S = AdaptiveTsit5> {
    solver: S,
}

impl Default for AdaptiveIntegrator<AdaptiveTsit5> {
    fn default() -> Self {
        Self {
            solver: AdaptiveTsit5::default(),
        }
    }
}

impl AdaptiveIntegrator<AdaptiveTsit5> {
    pub fn new(settings: AdaptiveSettings) -> Result<Self> {
        Ok(Self {
            solver: AdaptiveTsit5::new(settings)?,
        })
    }
}

impl<S: OdeSolver> AdaptiveIntegrator<S> {
    pub fn with_solver(solver: S) -> Self {
        Self { solver }
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Integrates from `(t0, initial_state)` and returns the state at every
    /// output time. An output time equal to `t0` reports the initial state.
    pub fn solve<M: CompartmentModel + ?Sized>(
        &self,
        model: &M,
        initial_state: &[f64],
        t0: f64,
        output_times: &OutputTimes,
    ) -> Result<Trajectory> {
        check_dimension(model, initial_state)?;
        if !t0.is_finite() {
            return Err(EngineError::grid(format!("start time must be finite, got {t0}")));
        }
        if output_times.first() < t0 {
            return Err(EngineError::grid(format!(
                "first output time {} precedes start time {t0}",
                output_times.first()
            )));
        }

        let times = output_times.as_slice();
        let states = self
            .solver
            .solve(model, t0, initial_state, times)
            .map_err(|err| {
                warn!("{}: adaptive integration failed: {err}", model.name());
                err
            })?;

        if states.len() != times.len() {
            return Err(EngineError::integration(
                output_times.last(),
                format!("solver returned {} states for {} output times", states.len(), times.len()),
            ));
        }
        if let Some((index, _)) = states
            .iter()
            .enumerate()
            .find(|(_, state)| state.iter().any(|v| !v.is_finite()))
        {
            warn!("{}: adaptive solver produced non-finite values", model.name());
            return Err(EngineError::integration(times[index], "solver produced non-finite values"));
        }

        Trajectory::from_columns(model.compartments(), times, states)
    }
}

#[cfg(test)]
mod tests {
    use super::{AdaptiveIntegrator, AdaptiveSettings, AdaptiveTsit5};
    use crate::error::{EngineError, Result};
    use crate::grid::OutputTimes;
    use crate::models::{Logistic, LogisticParams, Sir, SirParams};
    use crate::traits::{CompartmentModel, OdeSolver};
    use approx::assert_relative_eq;

    struct Blowup;

    impl CompartmentModel for Blowup {
        fn name(&self) -> &'static str {
            "Blowup"
        }

        fn compartments(&self) -> &'static [&'static str] {
            &["x"]
        }

        // x' = x², finite-time blow-up at t = 1/x0.
        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0];
        }
    }

    struct Truncating;

    impl OdeSolver for Truncating {
        fn solve<M: CompartmentModel + ?Sized>(
            &self,
            _model: &M,
            _t0: f64,
            y0: &[f64],
            _times: &[f64],
        ) -> Result<Vec<Vec<f64>>> {
            Ok(vec![y0.to_vec()])
        }
    }

    fn logistic_exact(r: f64, y0: f64, t: f64) -> f64 {
        y0 / (y0 + (1.0 - y0) * (-r * t).exp())
    }

    #[test]
    fn matches_logistic_closed_form_at_requested_times() {
        let model = Logistic::new(LogisticParams { r: 0.1 }).expect("model");
        let times = OutputTimes::new(vec![0.0, 3.7, 25.0, 50.0, 100.0]).expect("times");
        let traj = AdaptiveIntegrator::default()
            .solve(&model, &[0.01], 0.0, &times)
            .expect("solve");

        assert_eq!(traj.times(), times.as_slice());
        assert_eq!(traj.first().values, vec![0.01]);
        for row in traj.rows() {
            assert_relative_eq!(row.values[0], logistic_exact(0.1, 0.01, row.time), epsilon = 1e-7);
        }
    }

    #[test]
    fn output_times_after_start_skip_the_initial_state() {
        let model = Logistic::new(LogisticParams { r: 0.5 }).expect("model");
        let times = OutputTimes::new(vec![1.0, 2.0]).expect("times");
        let traj = AdaptiveIntegrator::default()
            .solve(&model, &[0.2], 0.0, &times)
            .expect("solve");
        assert_eq!(traj.len(), 2);
        assert_relative_eq!(traj.first().values[0], logistic_exact(0.5, 0.2, 1.0), epsilon = 1e-8);
    }

    #[test]
    fn sir_reference_conserves_population() {
        let model = Sir::new(SirParams::new(0.5, 0.1, 1.0).expect("params")).expect("model");
        let times = OutputTimes::linspace(0.0, 100.0, 101).expect("times");
        let traj = AdaptiveIntegrator::default()
            .solve(&model, &[0.99, 0.01, 0.0], 0.0, &times)
            .expect("solve");
        assert!(traj.max_conservation_error(1.0) < 1e-9);
    }

    #[test]
    fn rejects_output_times_before_start() {
        let model = Logistic::new(LogisticParams { r: 0.1 }).expect("model");
        let times = OutputTimes::new(vec![-1.0, 1.0]).expect("times");
        let err = AdaptiveIntegrator::default()
            .solve(&model, &[0.1], 0.0, &times)
            .expect_err("times before t0");
        assert!(matches!(err, EngineError::InvalidGrid(_)));
    }

    #[test]
    fn blow_up_is_an_integration_failure() {
        let times = OutputTimes::new(vec![0.0, 2.0]).expect("times");
        let err = AdaptiveIntegrator::default()
            .solve(&Blowup, &[1.0], 0.0, &times)
            .expect_err("solution blows up at t = 1");
        assert!(matches!(err, EngineError::IntegrationFailure { .. }));
    }

    #[test]
    fn step_budget_is_enforced() {
        let settings = AdaptiveSettings {
            max_steps: 3,
            ..AdaptiveSettings::default()
        };
        let model = Logistic::new(LogisticParams { r: 0.1 }).expect("model");
        let times = OutputTimes::new(vec![0.0, 100.0]).expect("times");
        let err = AdaptiveIntegrator::new(settings)
            .expect("settings")
            .solve(&model, &[0.01], 0.0, &times)
            .expect_err("budget too small");
        assert!(err.to_string().contains("exceeded 3 steps"));
    }

    #[test]
    fn default_integrator_uses_tsit5_with_default_settings() {
        let integrator = AdaptiveIntegrator::default();
        assert_eq!(integrator.solver().settings(), &AdaptiveSettings::default());
    }

    #[test]
    fn short_solver_output_is_reported() {
        let model = Logistic::new(LogisticParams { r: 0.1 }).expect("model");
        let times = OutputTimes::new(vec![0.0, 1.0]).expect("times");
        let err = AdaptiveIntegrator::with_solver(Truncating)
            .solve(&model, &[0.01], 0.0, &times)
            .expect_err("missing sample");
        assert!(matches!(err, EngineError::IntegrationFailure { .. }));
    }

    #[test]
    fn settings_validation() {
        assert!(AdaptiveSettings::default().validate().is_ok());
        let bad = AdaptiveSettings {
            rtol: 0.0,
            ..AdaptiveSettings::default()
        };
        assert!(AdaptiveTsit5::new(bad).is_err());
        let bad = AdaptiveSettings {
            max_step: Some(1e-13),
            ..AdaptiveSettings::default()
        };
        assert!(bad.validate().is_err());

        let parsed: AdaptiveSettings =
            serde_json::from_str(r#"{"rtol": 1e-6}"#).expect("partial settings parse");
        assert_eq!(parsed.rtol, 1e-6);
        assert_eq!(parsed.atol, AdaptiveSettings::default().atol);
    }

    #[test]
    fn max_step_caps_the_step_size() {
        let settings = AdaptiveSettings {
            max_step: Some(0.5),
            max_steps: 19,
            ..AdaptiveSettings::default()
        };
        let model = Logistic::new(LogisticParams { r: 0.0 }).expect("model");
        let times = OutputTimes::new(vec![0.0, 10.0]).expect("times");
        // Zero dynamics accept every attempt, yet at least 10 / 0.5 = 20
        // steps are needed, so a budget of 19 must fail.
        assert!(AdaptiveIntegrator::new(settings)
            .expect("settings")
            .solve(&model, &[0.3], 0.0, &times)
            .is_err());
    }
}
