//! Compartmental models and their typed parameter sets.
//!
//! Parameters are validated when a model is built, so derivative evaluation
//! itself cannot fail. The SIR and SEIR models recompute the population
//! `N = S + (E +) I + R` from the current state at every evaluation; the
//! declared total `A` is only used to build initial states and to check
//! conservation.

use crate::error::{EngineError, Result};
use crate::traits::CompartmentModel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Logistic,
    Sir,
    Seir,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Logistic => "Logistic",
            ModelKind::Sir => "SIR",
            ModelKind::Seir => "SEIR",
        }
    }

    /// Keys a flat parameter map must provide for this model.
    pub fn required_keys(self) -> &'static [&'static str] {
        match self {
            ModelKind::Logistic => &["r"],
            ModelKind::Sir => &["beta", "mu", "A"],
            ModelKind::Seir => &["beta", "gamma", "mu", "A"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub r: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SirParams {
    pub beta: f64,
    pub mu: f64,
    #[serde(rename = "A", alias = "a")]
    pub a: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeirParams {
    pub beta: f64,
    pub gamma: f64,
    pub mu: f64,
    #[serde(rename = "A", alias = "a")]
    pub a: f64,
}

impl LogisticParams {
    pub fn new(r: f64) -> Result<Self> {
        let params = Self { r };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        require_finite(ModelKind::Logistic, "r", self.r)
    }
}

impl SirParams {
    pub fn new(beta: f64, mu: f64, a: f64) -> Result<Self> {
        let params = Self { beta, mu, a };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        require_finite(ModelKind::Sir, "beta", self.beta)?;
        require_finite(ModelKind::Sir, "mu", self.mu)?;
        require_total(ModelKind::Sir, self.a)
    }

    /// R0 = beta / mu.
    pub fn basic_reproduction_number(&self) -> f64 {
        self.beta / self.mu
    }

    pub fn herd_immunity_threshold(&self) -> f64 {
        1.0 - 1.0 / self.basic_reproduction_number()
    }
}

impl SeirParams {
    pub fn new(beta: f64, gamma: f64, mu: f64, a: f64) -> Result<Self> {
        let params = Self { beta, gamma, mu, a };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        require_finite(ModelKind::Seir, "beta", self.beta)?;
        require_finite(ModelKind::Seir, "gamma", self.gamma)?;
        require_finite(ModelKind::Seir, "mu", self.mu)?;
        require_total(ModelKind::Seir, self.a)
    }

    /// R0 = beta / mu. The latent period delays infections but every exposed
    /// individual eventually becomes infectious, so it does not scale R0.
    pub fn basic_reproduction_number(&self) -> f64 {
        self.beta / self.mu
    }

    pub fn herd_immunity_threshold(&self) -> f64 {
        1.0 - 1.0 / self.basic_reproduction_number()
    }
}

fn require_finite(kind: ModelKind, key: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(EngineError::parameters(
            kind.name(),
            format!("parameter \"{key}\" must be finite, got {value}"),
        ));
    }
    Ok(())
}

fn require_total(kind: ModelKind, a: f64) -> Result<()> {
    require_finite(kind, "A", a)?;
    if a <= 0.0 {
        return Err(EngineError::parameters(
            kind.name(),
            format!("total population \"A\" must be positive, got {a}"),
        ));
    }
    Ok(())
}

/// Parameter set for one of the built-in models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum Parameters {
    Logistic(LogisticParams),
    Sir(SirParams),
    Seir(SeirParams),
}

impl Parameters {
    /// Builds a parameter set from a flat key/value map such as
    /// `{"beta": 0.5, "mu": 0.1, "A": 1.0}`. Unknown keys are ignored.
    pub fn from_pairs(kind: ModelKind, pairs: &HashMap<String, f64>) -> Result<Self> {
        let lookup = |key: &str| -> Result<f64> {
            let value = pairs.get(key).copied().or_else(|| {
                if key == "A" {
                    pairs.get("a").copied()
                } else {
                    None
                }
            });
            value.ok_or_else(|| {
                EngineError::parameters(kind.name(), format!("missing key \"{key}\""))
            })
        };
        // Values in `required_keys` order.
        let v = kind
            .required_keys()
            .iter()
            .map(|&key| lookup(key))
            .collect::<Result<Vec<f64>>>()?;

        let params = match kind {
            ModelKind::Logistic => Parameters::Logistic(LogisticParams { r: v[0] }),
            ModelKind::Sir => Parameters::Sir(SirParams {
                beta: v[0],
                mu: v[1],
                a: v[2],
            }),
            ModelKind::Seir => Parameters::Seir(SeirParams {
                beta: v[0],
                gamma: v[1],
                mu: v[2],
                a: v[3],
            }),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Parameters::Logistic(_) => ModelKind::Logistic,
            Parameters::Sir(_) => ModelKind::Sir,
            Parameters::Seir(_) => ModelKind::Seir,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Parameters::Logistic(p) => p.validate(),
            Parameters::Sir(p) => p.validate(),
            Parameters::Seir(p) => p.validate(),
        }
    }
}

/// Logistic growth: `dy/dt = r·y·(1 − y)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Logistic {
    params: LogisticParams,
}

impl Logistic {
    pub fn new(params: LogisticParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &LogisticParams {
        &self.params
    }
}

impl CompartmentModel for Logistic {
    fn name(&self) -> &'static str {
        ModelKind::Logistic.name()
    }

    fn compartments(&self) -> &'static [&'static str] {
        &["y"]
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        out[0] = self.params.r * x[0] * (1.0 - x[0]);
    }
}

/// Susceptible → Infectious → Removed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sir {
    params: SirParams,
}

impl Sir {
    pub fn new(params: SirParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &SirParams {
        &self.params
    }

    /// `[A − I0, I0, 0]`.
    pub fn initial_state(&self, infectious: f64) -> Vec<f64> {
        vec![self.params.a - infectious, infectious, 0.0]
    }
}

impl CompartmentModel for Sir {
    fn name(&self) -> &'static str {
        ModelKind::Sir.name()
    }

    fn compartments(&self) -> &'static [&'static str] {
        &["S", "I", "R"]
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let (s, i, r) = (x[0], x[1], x[2]);
        let infection = force_of_infection(self.params.beta, s, i, s + i + r);
        let removal = self.params.mu * i;
        out[0] = -infection;
        out[1] = infection - removal;
        out[2] = removal;
    }

    fn conserved_total(&self) -> Option<f64> {
        Some(self.params.a)
    }
}

/// Susceptible → Exposed → Infectious → Removed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seir {
    params: SeirParams,
}

impl Seir {
    pub fn new(params: SeirParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &SeirParams {
        &self.params
    }

    /// `[A − E0 − I0, E0, I0, 0]`.
    pub fn initial_state(&self, exposed: f64, infectious: f64) -> Vec<f64> {
        vec![self.params.a - exposed - infectious, exposed, infectious, 0.0]
    }
}

impl CompartmentModel for Seir {
    fn name(&self) -> &'static str {
        ModelKind::Seir.name()
    }

    fn compartments(&self) -> &'static [&'static str] {
        &["S", "E", "I", "R"]
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let (s, e, i, r) = (x[0], x[1], x[2], x[3]);
        let infection = force_of_infection(self.params.beta, s, i, s + e + i + r);
        let onset = self.params.gamma * e;
        let removal = self.params.mu * i;
        out[0] = -infection;
        out[1] = infection - onset;
        out[2] = onset - removal;
        out[3] = removal;
    }

    fn conserved_total(&self) -> Option<f64> {
        Some(self.params.a)
    }
}

// beta·I·S/N, zero for an empty population.
fn force_of_infection(beta: f64, s: f64, i: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        beta * i * s / total
    }
}

/// One of the built-in models, selected by its parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EpidemicModel {
    Logistic(Logistic),
    Sir(Sir),
    Seir(Seir),
}

impl EpidemicModel {
    pub fn new(params: Parameters) -> Result<Self> {
        Ok(match params {
            Parameters::Logistic(p) => EpidemicModel::Logistic(Logistic::new(p)?),
            Parameters::Sir(p) => EpidemicModel::Sir(Sir::new(p)?),
            Parameters::Seir(p) => EpidemicModel::Seir(Seir::new(p)?),
        })
    }

    pub fn from_pairs(kind: ModelKind, pairs: &HashMap<String, f64>) -> Result<Self> {
        Self::new(Parameters::from_pairs(kind, pairs)?)
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            EpidemicModel::Logistic(_) => ModelKind::Logistic,
            EpidemicModel::Sir(_) => ModelKind::Sir,
            EpidemicModel::Seir(_) => ModelKind::Seir,
        }
    }

    pub fn parameters(&self) -> Parameters {
        match self {
            EpidemicModel::Logistic(m) => Parameters::Logistic(m.params),
            EpidemicModel::Sir(m) => Parameters::Sir(m.params),
            EpidemicModel::Seir(m) => Parameters::Seir(m.params),
        }
    }

    fn inner(&self) -> &dyn CompartmentModel {
        match self {
            EpidemicModel::Logistic(m) => m,
            EpidemicModel::Sir(m) => m,
            EpidemicModel::Seir(m) => m,
        }
    }
}

impl CompartmentModel for EpidemicModel {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn compartments(&self) -> &'static [&'static str] {
        self.inner().compartments()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        self.inner().apply(t, x, out)
    }

    fn conserved_total(&self) -> Option<f64> {
        self.inner().conserved_total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pairs(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn from_pairs_builds_each_model() {
        let logistic = Parameters::from_pairs(ModelKind::Logistic, &pairs(&[("r", 0.1)]))
            .expect("logistic params");
        assert_eq!(logistic, Parameters::Logistic(LogisticParams { r: 0.1 }));

        let sir = Parameters::from_pairs(
            ModelKind::Sir,
            &pairs(&[("beta", 0.5), ("mu", 0.1), ("A", 1.0), ("unused", 7.0)]),
        )
        .expect("sir params");
        assert_eq!(
            sir,
            Parameters::Sir(SirParams {
                beta: 0.5,
                mu: 0.1,
                a: 1.0
            })
        );

        let seir = Parameters::from_pairs(
            ModelKind::Seir,
            &pairs(&[("beta", 0.5), ("gamma", 0.2), ("mu", 0.1), ("a", 2.0)]),
        )
        .expect("seir params");
        assert_eq!(seir.kind(), ModelKind::Seir);
    }

    #[test]
    fn every_required_key_is_checked() {
        let full = pairs(&[("r", 0.1), ("beta", 0.5), ("gamma", 0.2), ("mu", 0.1), ("A", 1.0)]);
        for kind in [ModelKind::Logistic, ModelKind::Sir, ModelKind::Seir] {
            assert!(Parameters::from_pairs(kind, &full).is_ok());
            for key in kind.required_keys() {
                let mut partial = full.clone();
                partial.remove(*key);
                assert_err_contains(
                    Parameters::from_pairs(kind, &partial),
                    &format!("missing key \"{key}\""),
                );
            }
        }
    }

    #[test]
    fn from_pairs_reports_missing_and_malformed_keys() {
        assert_err_contains(
            Parameters::from_pairs(ModelKind::Sir, &pairs(&[("beta", 0.5), ("A", 1.0)])),
            "missing key \"mu\"",
        );
        assert_err_contains(
            Parameters::from_pairs(ModelKind::Seir, &pairs(&[("beta", 0.5), ("mu", 0.1), ("A", 1.0)])),
            "missing key \"gamma\"",
        );
        assert_err_contains(
            Parameters::from_pairs(ModelKind::Logistic, &pairs(&[("r", f64::NAN)])),
            "must be finite",
        );
        assert_err_contains(
            Parameters::from_pairs(ModelKind::Sir, &pairs(&[("beta", 0.5), ("mu", 0.1), ("A", 0.0)])),
            "must be positive",
        );
    }

    #[test]
    fn missing_key_is_an_invalid_parameters_error() {
        let err = EpidemicModel::from_pairs(ModelKind::Logistic, &HashMap::new())
            .expect_err("missing r");
        assert!(matches!(
            err,
            EngineError::InvalidParameters { model: "Logistic", .. }
        ));
    }

    #[test]
    fn parameters_deserialize_from_tagged_json() {
        let params: Parameters =
            serde_json::from_str(r#"{"model": "sir", "beta": 0.5, "mu": 0.1, "A": 1.0}"#)
                .expect("json should parse");
        assert_eq!(params.kind(), ModelKind::Sir);
        params.validate().expect("params should be valid");

        let params: Parameters = serde_json::from_str(
            r#"{"model": "seir", "beta": 0.5, "gamma": 0.2, "mu": 0.1, "A": -1.0}"#,
        )
        .expect("json should parse");
        assert!(params.validate().is_err());
    }

    #[test]
    fn logistic_derivative_matches_closed_form() {
        let model = Logistic::new(LogisticParams { r: 0.1 }).expect("model");
        let d = model.derivative(0.0, &[0.25]);
        assert_relative_eq!(d[0], 0.1 * 0.25 * 0.75);
    }

    #[test]
    fn sir_derivative_sums_to_zero() {
        let model = Sir::new(SirParams::new(0.5, 0.1, 1.0).expect("params")).expect("model");
        let d = model.derivative(0.0, &[0.99, 0.01, 0.0]);
        assert_relative_eq!(d[0], -0.5 * 0.01 * 0.99);
        assert_relative_eq!(d[1], 0.5 * 0.01 * 0.99 - 0.1 * 0.01);
        assert_relative_eq!(d[2], 0.1 * 0.01);
        assert!(d.iter().sum::<f64>().abs() < 1e-15);
    }

    #[test]
    fn sir_recomputes_population_from_state() {
        let model = Sir::new(SirParams::new(0.5, 0.1, 1.0).expect("params")).expect("model");
        // Same proportions at ten times the declared total give ten times the flow.
        let small = model.derivative(0.0, &[0.9, 0.1, 0.0]);
        let large = model.derivative(0.0, &[9.0, 1.0, 0.0]);
        for (a, b) in small.iter().zip(&large) {
            assert_relative_eq!(10.0 * a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn seir_derivative_has_latent_stage() {
        let model = Seir::new(SeirParams::new(0.5, 0.2, 0.1, 1.0).expect("params")).expect("model");
        let d = model.derivative(0.0, &[0.9, 0.05, 0.05, 0.0]);
        let infection = 0.5 * 0.05 * 0.9;
        assert_relative_eq!(d[0], -infection);
        assert_relative_eq!(d[1], infection - 0.2 * 0.05);
        assert_relative_eq!(d[2], 0.2 * 0.05 - 0.1 * 0.05);
        assert_relative_eq!(d[3], 0.1 * 0.05);
    }

    #[test]
    fn empty_population_has_no_infection() {
        let model = Sir::new(SirParams::new(0.5, 0.1, 1.0).expect("params")).expect("model");
        let d = model.derivative(0.0, &[0.0, 0.0, 0.0]);
        assert_eq!(d, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn models_do_not_clamp_unphysical_states() {
        let model = Logistic::new(LogisticParams { r: 1.0 }).expect("model");
        let d = model.derivative(0.0, &[-0.5]);
        assert_relative_eq!(d[0], -0.75);
    }

    #[test]
    fn epidemic_model_dispatches_and_round_trips_parameters() {
        let params = Parameters::Seir(SeirParams::new(0.5, 0.2, 0.1, 1.0).expect("params"));
        let model = EpidemicModel::new(params).expect("model");
        assert_eq!(model.name(), "SEIR");
        assert_eq!(model.compartments(), &["S", "E", "I", "R"]);
        assert_eq!(model.dimension(), 4);
        assert_eq!(model.conserved_total(), Some(1.0));
        assert_eq!(model.parameters(), params);

        let logistic = EpidemicModel::new(Parameters::Logistic(LogisticParams { r: 0.3 }))
            .expect("model");
        assert_eq!(logistic.conserved_total(), None);
    }

    #[test]
    fn reproduction_number_and_herd_threshold() {
        let params = SirParams::new(0.5, 0.1, 1.0).expect("params");
        assert_relative_eq!(params.basic_reproduction_number(), 5.0);
        assert_relative_eq!(params.herd_immunity_threshold(), 0.8);
    }

    #[test]
    fn initial_states_split_declared_total() {
        let sir = Sir::new(SirParams::new(0.5, 0.1, 1.0).expect("params")).expect("model");
        let state = sir.initial_state(0.01);
        assert_relative_eq!(state[0], 0.99, epsilon = 1e-15);
        assert_eq!(&state[1..], &[0.01, 0.0]);
        let seir = Seir::new(SeirParams::new(0.5, 0.2, 0.1, 10.0).expect("params")).expect("model");
        assert_eq!(seir.initial_state(1.0, 2.0), vec![7.0, 1.0, 2.0, 0.0]);
    }
}
