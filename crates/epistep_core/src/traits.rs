use crate::error::Result;

/// A compartmental model: a pure vector field over a fixed, named set of
/// compartments.
pub trait CompartmentModel {
    /// Short model name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Compartment names in the order the state vector stores them.
    fn compartments(&self) -> &'static [&'static str];

    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize {
        self.compartments().len()
    }

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state (may be negative or exceed physical bounds)
    /// out: buffer to write dx/dt
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]);

    fn derivative(&self, t: f64, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.dimension()];
        self.apply(t, x, &mut out);
        out
    }

    /// Total population preserved by the dynamics, if the model conserves one.
    fn conserved_total(&self) -> Option<f64> {
        None
    }
}

/// A fixed-step integrator that advances a model state in place.
pub trait Steppable {
    /// Performs one step.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    fn step<M: CompartmentModel + ?Sized>(&mut self, model: &M, t: &mut f64, state: &mut [f64]);
}

/// A variable-step, error-controlled ODE solver.
///
/// The engine only relies on it returning the state at each requested time,
/// whatever internal steps it takes to get there. `times` is already
/// validated: finite, strictly increasing and not before `t0`.
pub trait OdeSolver {
    fn solve<M: CompartmentModel + ?Sized>(
        &self,
        model: &M,
        t0: f64,
        y0: &[f64],
        times: &[f64],
    ) -> Result<Vec<Vec<f64>>>;
}
