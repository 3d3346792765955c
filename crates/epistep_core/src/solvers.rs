use crate::error::{check_step_size, EngineError, Result};
use crate::traits::{CompartmentModel, Steppable};
use serde::{Deserialize, Serialize};

/// Difference formula used by a [`FiniteDifferenceStepper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// `y₁ = y₀ + dt·f(t₀, y₀)`.
    Forward,
    /// `y₁ = y₀ + dt·f(t₀, y₀)`, attributed to the later index.
    ///
    /// The derivative at the unknown next state is approximated by the
    /// derivative at the known current state, so this is an explicit method
    /// and produces exactly the same numbers as `Forward`. No implicit solve
    /// is attempted.
    Backward,
    /// Leapfrog `y_{i+1} = y_{i−1} + 2dt·f(t_i, y_i)`.
    ///
    /// The first transition has no `y_{−1}` and is bootstrapped with an
    /// explicit midpoint step: a forward half-step to `t₀ + dt/2`, then a full
    /// step from `y₀` using the derivative evaluated there. A stepper handed a
    /// `(t, state)` pair that does not continue its history bootstraps again.
    Central,
}

impl Scheme {
    pub const ALL: [Scheme; 3] = [Scheme::Forward, Scheme::Backward, Scheme::Central];

    pub fn name(self) -> &'static str {
        match self {
            Scheme::Forward => "forward",
            Scheme::Backward => "backward",
            Scheme::Central => "central",
        }
    }
}

/// Two-slot ring buffer holding the last two states of a central run, each
/// stamped with its time.
#[derive(Debug, Clone, Default)]
pub struct StateHistory {
    slots: [Vec<f64>; 2],
    times: [f64; 2],
    newest: usize,
    filled: usize,
}

impl StateHistory {
    pub fn push(&mut self, t: f64, state: &[f64]) {
        let next = if self.filled == 0 { 0 } else { 1 - self.newest };
        self.slots[next].clear();
        self.slots[next].extend_from_slice(state);
        self.times[next] = t;
        self.newest = next;
        self.filled = (self.filled + 1).min(2);
    }

    pub fn current(&self) -> Option<&[f64]> {
        (self.filled > 0).then(|| self.slots[self.newest].as_slice())
    }

    pub fn current_time(&self) -> Option<f64> {
        (self.filled > 0).then(|| self.times[self.newest])
    }

    pub fn previous(&self) -> Option<&[f64]> {
        (self.filled > 1).then(|| self.slots[1 - self.newest].as_slice())
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn clear(&mut self) {
        self.filled = 0;
    }
}

/// Fixed-step finite-difference integrator.
///
/// Results are never clamped: large steps can drive compartments negative or
/// past their physical bounds, and that output is returned as is.
#[derive(Debug, Clone)]
pub struct FiniteDifferenceStepper {
    scheme: Scheme,
    dt: f64,
    deriv: Vec<f64>,
    tmp: Vec<f64>,
    history: StateHistory,
}

impl FiniteDifferenceStepper {
    pub fn new(scheme: Scheme, dt: f64) -> Result<Self> {
        check_step_size(dt)?;
        Ok(Self {
            scheme,
            dt,
            deriv: Vec::new(),
            tmp: Vec::new(),
            history: StateHistory::default(),
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn history(&self) -> &StateHistory {
        &self.history
    }

    /// Forgets the central-difference history; the next step bootstraps.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    fn explicit_update<M: CompartmentModel + ?Sized>(&mut self, model: &M, t: f64, state: &mut [f64]) {
        model.apply(t, state, &mut self.deriv);
        for (y, d) in state.iter_mut().zip(&self.deriv) {
            *y += self.dt * d;
        }
    }

    fn midpoint_bootstrap<M: CompartmentModel + ?Sized>(&mut self, model: &M, t: f64, state: &mut [f64]) {
        let half = 0.5 * self.dt;
        self.history.clear();
        self.history.push(t, state);

        model.apply(t, state, &mut self.deriv);
        for i in 0..state.len() {
            self.tmp[i] = state[i] + half * self.deriv[i];
        }
        model.apply(t + half, &self.tmp, &mut self.deriv);
        for (y, d) in state.iter_mut().zip(&self.deriv) {
            *y += self.dt * d;
        }

        self.history.push(t + self.dt, state);
    }

    fn leapfrog<M: CompartmentModel + ?Sized>(&mut self, model: &M, t: f64, state: &mut [f64]) {
        // A history that does not end at `(t, state)` belongs to another run.
        // Times within half a step of the last one count as a match.
        let continues = self.history.current() == Some(&*state)
            && self
                .history
                .current_time()
                .is_some_and(|last| (t - last).abs() < 0.5 * self.dt);
        if !continues || self.history.previous().is_none() {
            return self.midpoint_bootstrap(model, t, state);
        }

        model.apply(t, state, &mut self.deriv);
        if let Some(previous) = self.history.previous() {
            for i in 0..state.len() {
                state[i] = previous[i] + 2.0 * self.dt * self.deriv[i];
            }
        }
        self.history.push(t + self.dt, state);
    }
}

impl Steppable for FiniteDifferenceStepper {
    fn step<M: CompartmentModel + ?Sized>(&mut self, model: &M, t: &mut f64, state: &mut [f64]) {
        let dim = state.len();
        self.deriv.resize(dim, 0.0);
        self.tmp.resize(dim, 0.0);

        match self.scheme {
            Scheme::Forward | Scheme::Backward => self.explicit_update(model, *t, state),
            Scheme::Central => self.leapfrog(model, *t, state),
        }

        *t += self.dt;
    }
}

/// Advances `state` from `t` by one step of `dt` and returns the new state.
///
/// With no history available, `Central` performs its midpoint bootstrap;
/// use [`step_central`] when the previous state is known.
pub fn step<M: CompartmentModel + ?Sized>(
    model: &M,
    t: f64,
    state: &[f64],
    dt: f64,
    scheme: Scheme,
) -> Result<Vec<f64>> {
    let mut stepper = FiniteDifferenceStepper::new(scheme, dt)?;
    check_dimension(model, state)?;
    let mut next = state.to_vec();
    let mut t = t;
    stepper.step(model, &mut t, &mut next);
    Ok(next)
}

/// One leapfrog transition `y_{i+1} = y_{i−1} + 2dt·f(t, y_i)`.
pub fn step_central<M: CompartmentModel + ?Sized>(
    model: &M,
    t: f64,
    previous: &[f64],
    current: &[f64],
    dt: f64,
) -> Result<Vec<f64>> {
    check_step_size(dt)?;
    check_dimension(model, previous)?;
    check_dimension(model, current)?;
    let deriv = model.derivative(t, current);
    Ok(previous
        .iter()
        .zip(&deriv)
        .map(|(y, d)| y + 2.0 * dt * d)
        .collect())
}

pub(crate) fn check_dimension<M: CompartmentModel + ?Sized>(model: &M, state: &[f64]) -> Result<()> {
    if state.len() != model.dimension() {
        return Err(EngineError::InvalidInitialState(format!(
            "{} model expects {} compartments, got {}",
            model.name(),
            model.dimension(),
            state.len()
        )));
    }
    if let Some(bad) = state.iter().find(|v| !v.is_finite()) {
        return Err(EngineError::InvalidInitialState(format!(
            "compartment values must be finite, got {bad}"
        )));
    }
    Ok(())
}

// Tsitouras 5(4) tableau.
const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;

const A21: f64 = 0.161;
const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;
const A41: f64 = 2.897153057105493;
const A42: f64 = -6.359448489975075;
const A43: f64 = 4.3622954328695815;
const A51: f64 = 5.325864828439257;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.4955393428898365;
const A54: f64 = -0.09249506636175525;
const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.028269050394068383;

// 5th-order weights; the 7th stage is evaluated at the new state (FSAL).
const B1: f64 = 0.09646076681806523;
const B2: f64 = 0.01;
const B3: f64 = 0.4798896504144996;
const B4: f64 = 1.379008574103742;
const B5: f64 = -3.290069515436081;
const B6: f64 = 2.324710524099774;

// Difference between the 5th- and embedded 4th-order weights.
const E1: f64 = -0.00178001105222577714;
const E2: f64 = -0.0008164344596567469;
const E3: f64 = 0.007880878010261995;
const E4: f64 = -0.1447110071732629;
const E5: f64 = 0.5823571654525552;
const E6: f64 = -0.45808210592918697;
const E7: f64 = 0.015151515151515152;

/// Tsitouras 5/4 embedded pair
pub(crate) struct Tsit5 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
    k1_ready: bool,
}

impl Tsit5 {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
            k1_ready: false,
        }
    }

    /// Attempts a step of size dt from (t, y).
    /// y_new: 5th-order solution
    /// err: embedded local error estimate
    pub(crate) fn attempt<M: CompartmentModel + ?Sized>(
        &mut self,
        model: &M,
        t: f64,
        y: &[f64],
        dt: f64,
        y_new: &mut [f64],
        err: &mut [f64],
    ) {
        let n = y.len();

        // k1 = f(t, y), reused from the last accepted step when available.
        if !self.k1_ready {
            model.apply(t, y, &mut self.k1);
            self.k1_ready = true;
        }

        // k2
        for i in 0..n {
            self.tmp[i] = y[i] + dt * (A21 * self.k1[i]);
        }
        model.apply(t + C2 * dt, &self.tmp, &mut self.k2);

        // k3
        for i in 0..n {
            self.tmp[i] = y[i] + dt * (A31 * self.k1[i] + A32 * self.k2[i]);
        }
        model.apply(t + C3 * dt, &self.tmp, &mut self.k3);

        // k4
        for i in 0..n {
            self.tmp[i] = y[i] + dt * (A41 * self.k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        model.apply(t + C4 * dt, &self.tmp, &mut self.k4);

        // k5
        for i in 0..n {
            self.tmp[i] = y[i]
                + dt * (A51 * self.k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        model.apply(t + C5 * dt, &self.tmp, &mut self.k5);

        // k6
        for i in 0..n {
            self.tmp[i] = y[i]
                + dt * (A61 * self.k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        model.apply(t + dt, &self.tmp, &mut self.k6);

        for i in 0..n {
            y_new[i] = y[i]
                + dt * (B1 * self.k1[i]
                    + B2 * self.k2[i]
                    + B3 * self.k3[i]
                    + B4 * self.k4[i]
                    + B5 * self.k5[i]
                    + B6 * self.k6[i]);
        }

        // k7 = f(t + dt, y_new)
        model.apply(t + dt, y_new, &mut self.k7);

        for i in 0..n {
            err[i] = dt
                * (E1 * self.k1[i]
                    + E2 * self.k2[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
        }
    }

    /// Marks the last attempt as accepted so its final stage seeds the next.
    pub(crate) fn accept(&mut self) {
        std::mem::swap(&mut self.k1, &mut self.k7);
    }
}
