use thiserror::Error;

/// Error type for calibration and streaming operations
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// No acknowledgement for the displayed pattern arrived before the overall deadline
    #[error("Display controller did not acknowledge pattern {pattern} within {waited_ms}ms")]
    AckDeadline { pattern: usize, waited_ms: u64 },

    /// The run was cancelled by an operator
    #[error("Calibration run cancelled")]
    Cancelled,

    /// An inbound message could not be used
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Writing or reading a calibration artifact failed
    #[error("Persistence failed: {0}")]
    Persistence(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Run parameters are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two or more lights share the same lit/unlit signature
    #[error("Lights {first} and {second} cannot be told apart by the pattern sequence")]
    Indistinguishable { first: usize, second: usize },

    /// An importer task panicked or was aborted
    #[error("Import task failed: {0}")]
    ImportTask(String),

    /// Publishing to the transport failed
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<tokio::task::JoinError> for CalibrationError {
    fn from(err: tokio::task::JoinError) -> Self {
        CalibrationError::ImportTask(err.to_string())
    }
}

/// Result type for calibration operations
pub type CalibrationResult<T> = Result<T, CalibrationError>;
