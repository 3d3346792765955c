pub mod adaptive;
pub mod comparison;
pub mod error;
pub mod grid;
pub mod models;
pub mod simulator;
pub mod solvers;
pub mod trajectory;
/// The `epistep_core` crate integrates compartmental epidemic models and
/// compares fixed-step finite-difference schemes against an adaptive
/// reference solver.
///
/// Key components:
/// - **Traits**: `CompartmentModel` (vector fields), `Steppable` (fixed-step integrators), `OdeSolver` (adaptive solvers).
/// - **Models**: Logistic, SIR and SEIR with typed, validated parameters.
/// - **Solvers**: Forward, backward and central finite differences; Tsitouras 5(4) with step-size control.
/// - **Simulator / Comparison**: Trajectory assembly on a grid and per-compartment divergence reports.
pub mod traits;

pub mod prelude {
    pub use crate::adaptive::{AdaptiveIntegrator, AdaptiveSettings, AdaptiveTsit5};
    pub use crate::comparison::{ComparisonHarness, DivergenceMetric, DivergenceReport, RunSpec};
    pub use crate::error::{EngineError, Result};
    pub use crate::grid::{OutputTimes, UniformGrid};
    pub use crate::models::{
        EpidemicModel, Logistic, LogisticParams, ModelKind, Parameters, Seir, SeirParams, Sir,
        SirParams,
    };
    pub use crate::simulator::{Integration, Simulator};
    pub use crate::solvers::{FiniteDifferenceStepper, Scheme};
    pub use crate::trajectory::{StateVector, Trajectory};
    pub use crate::traits::{CompartmentModel, OdeSolver, Steppable};
}
