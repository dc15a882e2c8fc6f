//! Error types for the data model

use thiserror::Error;

/// Result type alias for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while validating or converting model values
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid process definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("Invalid window specification: {0}")]
    InvalidWindow(String),

    #[error("Invalid sink descriptor: {0}")]
    InvalidSink(String),

    #[error("Predicate error: {0}")]
    Predicate(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ModelError {
    pub fn definition(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::InvalidDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
