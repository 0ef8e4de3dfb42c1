//! Common error types.

use thiserror::Error;

/// Main error type for the paint engine.
#[derive(Error, Debug)]
pub enum PaintError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

pub type PaintResult<T> = Result<T, PaintError>;

impl PaintError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
