//! Bootstrapper error abstractions.

use thiserror::Error;

/// Application error variants.
#[derive(Debug, Error)]
pub enum AppError {
    /// The given input was invalid.
    #[error("validation error: {0}")]
    InvalidInput(String),
    /// The named resource does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    /// An operation did not complete within its deadline.
    #[error("timeout: {0}")]
    Timeout(String),
    /// The server has hit an internal error, but will remain online.
    #[error("internal server error")]
    Ise(anyhow::Error),
}

impl AppError {
    /// A short machine readable code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "BAD_REQUEST",
            Self::ResourceNotFound(_) => "NOT_FOUND",
            Self::Timeout(_) => "TIMEOUT",
            Self::Ise(_) => "INTERNAL_ERROR",
        }
    }
}
