use thiserror::Error;

/// Result type for Hermes operations
pub type Result<T> = std::result::Result<T, HermesError>;

/// Main error type for the Hermes library
#[derive(Debug, Clone, Error)]
pub enum HermesError {
    /// Invalid dimensions for operations
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// Communication rounds below the minimum any model accepts
    #[error("Please guarantee the comm iters is at least 1 (got {0})")]
    CommItersTooLow(usize),

    /// A cooperative model was asked to run a single communication round
    #[error("comm iters is {0}; use the independent (non-communicating) variant for a single round")]
    UseIndependentVariant(usize),

    /// An independent model was asked to run more than one communication round
    #[error("comm iters is {0}; use the cooperative variant for more than one round")]
    UseCooperativeVariant(usize),

    /// IO errors (file operations)
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization/deserialization errors, including rejected configuration keys
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Empty buffer or container
    #[error("Empty buffer: {0}")]
    EmptyBuffer(String),

    /// Training error
    #[error("Training error: {0}")]
    Training(String),
}

impl From<std::io::Error> for HermesError {
    fn from(err: std::io::Error) -> Self {
        HermesError::Io(err.to_string())
    }
}

impl From<bincode::Error> for HermesError {
    fn from(err: bincode::Error) -> Self {
        HermesError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for HermesError {
    fn from(err: serde_json::Error) -> Self {
        HermesError::Serialization(err.to_string())
    }
}

// Helper functions for common error patterns
impl HermesError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        HermesError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        HermesError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
