//! Error taxonomy for calculation records.
//!
//! Authentication failures are raised by the HTTP layer before the service is
//! reached, so they live in [`crate::app::AppError`] rather than here.

/// Result type for calculation operations.
pub type Result<T> = std::result::Result<T, CalcError>;

/// Errors produced by the calculation domain, store and service.
#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    /// Unknown kind, wrong number of operands, or a domain violation such as
    /// a zero divisor.
    #[error("{0}")]
    Validation(String),

    /// The record does not exist or belongs to another owner. Both cases are
    /// reported identically.
    #[error("Calculation not found")]
    NotFound,

    /// The durable snapshot could not be read or written.
    #[error("storage error in {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CalcError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error with context.
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }
}
