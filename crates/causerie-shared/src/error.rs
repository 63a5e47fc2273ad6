use thiserror::Error;

/// Typed failures returned by the conversation engine.
///
/// Delivery acknowledgements never fail on a state regression: late or
/// duplicate acknowledgements are reported as unchanged outcomes instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Actor is not a member of this conversation")]
    NotAMember,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl EngineError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
