// Engine error taxonomy.
//
// Startup problems are fatal and surface from Engine construction or the
// artifact loader. Everything else is recoverable by the caller. Numeric edge
// cases (empty text, empty batch) are handled by policy, not by errors.

use thiserror::Error;

/// Root error type for the inference engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A model, vocabulary or scaler artifact is missing or has the wrong shape.
    #[error("startup failure: {0}")]
    StartupFailure(String),

    /// The caller asked for a category with no loaded model.
    #[error("unsupported category: {0}")]
    UnsupportedCategory(String),

    /// Input that cannot be turned into text (null, non-string element, bad JSON).
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl EngineError {
    pub(crate) fn startup(msg: impl Into<String>) -> Self {
        Self::StartupFailure(msg.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
