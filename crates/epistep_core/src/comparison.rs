//! Side-by-side comparison of finite-difference runs against the adaptive
//! reference.
//!
//! Every finite-difference run is integrated on its own uniform grid and then
//! linearly interpolated onto the shared output times; it is never
//! re-integrated at those times. The adaptive trajectory sampled at the same
//! times serves as ground truth.

use crate::adaptive::{AdaptiveIntegrator, AdaptiveSettings};
use crate::error::Result;
use crate::grid::{OutputTimes, UniformGrid};
use crate::simulator::Simulator;
use crate::solvers::{check_dimension, Scheme};
use crate::trajectory::Trajectory;
use crate::traits::CompartmentModel;
use log::debug;
use serde::{Deserialize, Serialize};

/// Denominator floor for relative differences near zero.
pub const RELATIVE_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivergenceMetric {
    /// `|value − reference|`
    #[default]
    Absolute,
    /// `|value − reference| / max(|reference|, RELATIVE_FLOOR)`
    Relative,
}

impl DivergenceMetric {
    pub fn measure(self, value: f64, reference: f64) -> f64 {
        let diff = (value - reference).abs();
        match self {
            DivergenceMetric::Absolute => diff,
            DivergenceMetric::Relative => diff / reference.abs().max(RELATIVE_FLOOR),
        }
    }
}

/// One finite-difference configuration to compare.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub scheme: Scheme,
    pub dt: f64,
}

impl RunSpec {
    pub fn new(scheme: Scheme, dt: f64) -> Self {
        Self { scheme, dt }
    }

    /// Every scheme paired with every step size, schemes outermost.
    pub fn product(schemes: &[Scheme], dts: &[f64]) -> Vec<RunSpec> {
        schemes
            .iter()
            .flat_map(|&scheme| dts.iter().map(move |&dt| RunSpec { scheme, dt }))
            .collect()
    }
}

/// Pointwise differences for one compartment, ordered by time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivergenceSeries {
    pub compartment: &'static str,
    pub points: Vec<(f64, f64)>,
}

impl DivergenceSeries {
    pub fn max(&self) -> f64 {
        self.points.iter().map(|&(_, d)| d).fold(0.0, f64::max)
    }

    pub fn rms(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.points.iter().map(|&(_, d)| d * d).sum();
        (sum / self.points.len() as f64).sqrt()
    }
}

/// Divergence of one finite-difference run from the reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunDivergence {
    pub run: RunSpec,
    /// The run on its native grid.
    pub trajectory: Trajectory,
    /// The run interpolated onto the shared times.
    pub resampled: Trajectory,
    /// One series per compartment, in model order.
    pub series: Vec<DivergenceSeries>,
}

impl RunDivergence {
    pub fn compartment(&self, name: &str) -> Option<&DivergenceSeries> {
        self.series.iter().find(|s| s.compartment == name)
    }

    /// Largest difference over all compartments and times.
    pub fn max(&self) -> f64 {
        self.series.iter().map(DivergenceSeries::max).fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivergenceReport {
    pub metric: DivergenceMetric,
    pub times: Vec<f64>,
    pub compartments: &'static [&'static str],
    pub reference: Trajectory,
    pub runs: Vec<RunDivergence>,
}

impl DivergenceReport {
    pub fn run(&self, scheme: Scheme, dt: f64) -> Option<&RunDivergence> {
        self.runs
            .iter()
            .find(|r| r.run.scheme == scheme && r.run.dt == dt)
    }

    /// The series for `compartment` from every run, in run order.
    pub fn by_compartment(&self, compartment: &str) -> Vec<(RunSpec, &DivergenceSeries)> {
        self.runs
            .iter()
            .filter_map(|r| r.compartment(compartment).map(|s| (r.run, s)))
            .collect()
    }

    pub fn max_divergences(&self) -> Vec<(RunSpec, f64)> {
        self.runs.iter().map(|r| (r.run, r.max())).collect()
    }
}

/// Runs finite-difference configurations and the adaptive reference over the
/// same model, initial state and output times.
#[derive(Debug, Clone, Default)]
pub struct ComparisonHarness {
    metric: DivergenceMetric,
    settings: AdaptiveSettings,
    simulator: Simulator,
}

impl ComparisonHarness {
    pub fn new(metric: DivergenceMetric) -> Self {
        Self {
            metric,
            ..Self::default()
        }
    }

    pub fn with_settings(metric: DivergenceMetric, settings: AdaptiveSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            metric,
            settings,
            simulator: Simulator::new(),
        })
    }

    pub fn metric(&self) -> DivergenceMetric {
        self.metric
    }

    pub fn compare<M: CompartmentModel + ?Sized>(
        &self,
        model: &M,
        initial_state: &[f64],
        shared_times: &OutputTimes,
        runs: &[RunSpec],
    ) -> Result<DivergenceReport> {
        check_dimension(model, initial_state)?;
        let t0 = shared_times.first();
        debug!(
            "{}: comparing {} finite-difference runs over [{t0}, {}]",
            model.name(),
            runs.len(),
            shared_times.last()
        );

        let reference =
            AdaptiveIntegrator::new(self.settings)?.solve(model, initial_state, t0, shared_times)?;

        let mut divergences = Vec::with_capacity(runs.len());
        for &run in runs {
            let grid = UniformGrid::covering(t0, shared_times.last(), run.dt)?;
            let trajectory =
                self.simulator
                    .run_finite_difference(model, initial_state, run.scheme, &grid)?;
            let resampled = trajectory.resample(shared_times)?;
            let series = self.difference(model.compartments(), &resampled, &reference);

            let divergence = RunDivergence {
                run,
                trajectory,
                resampled,
                series,
            };
            debug!(
                "{}: {} dt={} max divergence {}",
                model.name(),
                run.scheme.name(),
                run.dt,
                divergence.max()
            );
            divergences.push(divergence);
        }

        Ok(DivergenceReport {
            metric: self.metric,
            times: shared_times.as_slice().to_vec(),
            compartments: model.compartments(),
            reference,
            runs: divergences,
        })
    }

    fn difference(
        &self,
        compartments: &'static [&'static str],
        run: &Trajectory,
        reference: &Trajectory,
    ) -> Vec<DivergenceSeries> {
        compartments
            .iter()
            .enumerate()
            .map(|(index, &compartment)| DivergenceSeries {
                compartment,
                points: run
                    .rows()
                    .iter()
                    .zip(reference.rows())
                    .map(|(a, b)| (b.time, self.metric.measure(a.values[index], b.values[index])))
                    .collect(),
            })
            .collect()
    }
}
