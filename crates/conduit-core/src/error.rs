use thiserror::Error;

/// A convenience `Result` alias using [`ConduitError`].
pub type ConduitResult<T> = Result<T, ConduitError>;

/// Top-level error type for the Conduit runtime.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum ConduitError {
    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A caller passed an invalid combination of arguments.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An error from an outbound HTTP request (e.g. LLM API call).
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
