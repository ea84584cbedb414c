//! # Errors
//!
//! Failures owned by the connection layer. Call results use
//! [`sibrpc::CallError`], re-exported at the crate root.

/// Why a bind attempt produced no channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// Worth trying again after a backoff.
    #[error("bind failed: {0}")]
    Retryable(String),
    /// The target can never be bound in its current state.
    #[error("bind refused: {0}")]
    Terminal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("no tokio runtime given and none is current")]
    NoRuntime,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be an unsigned integer, got {value:?}")]
    Invalid { var: &'static str, value: String },
}
