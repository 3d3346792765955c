use thiserror::Error;

/// Errors raised by the integration engine.
///
/// Every error is reported at the call that detects it. Nothing is retried
/// internally and no partial trajectory is returned alongside an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Invalid parameters for {model} model: {reason}")]
    InvalidParameters { model: &'static str, reason: String },

    #[error("Step size dt must be positive and finite, got {0}.")]
    InvalidStepSize(f64),

    #[error("Invalid time grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid initial state: {0}")]
    InvalidInitialState(String),

    #[error("Invalid solver settings: {0}")]
    InvalidSettings(String),

    #[error("Integration failed at t = {time}: {reason}")]
    IntegrationFailure { time: f64, reason: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub(crate) fn parameters(model: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidParameters {
            model,
            reason: reason.into(),
        }
    }

    pub(crate) fn grid(reason: impl Into<String>) -> Self {
        EngineError::InvalidGrid(reason.into())
    }

    pub(crate) fn settings(reason: impl Into<String>) -> Self {
        EngineError::InvalidSettings(reason.into())
    }

    pub(crate) fn integration(time: f64, reason: impl Into<String>) -> Self {
        EngineError::IntegrationFailure {
            time,
            reason: reason.into(),
        }
    }
}

/// Rejects a step size that is zero, negative, NaN or infinite.
pub(crate) fn check_step_size(dt: f64) -> Result<()> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(EngineError::InvalidStepSize(dt));
    }
    Ok(())
}
