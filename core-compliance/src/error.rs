// =====================================================================================
// File: core-compliance/src/error.rs
// Description: Error types for the compliance domain
// =====================================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for compliance domain operations
pub type ComplianceResult<T> = Result<T, ComplianceError>;

/// Errors raised by domain-level validation and classification
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ComplianceError {
    /// A submitted value failed domain validation
    #[error("Validation error: {field} - {message}")]
    ValidationError { field: String, message: String },

    /// A lifecycle transition that the status machine forbids
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Serialization/deserialization of a domain artifact failed
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    /// Generic domain error
    #[error("Compliance error: {0}")]
    Generic(String),
}

impl ComplianceError {
    pub fn validation_error<S: Into<String>>(field: S, message: S) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition<S: Into<String>>(from: S, to: S) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn serialization_error<S: Into<String>>(message: S) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ComplianceError::validation_error("amount", "must be non-negative");
        assert_eq!(
            err.to_string(),
            "Validation error: amount - must be non-negative"
        );

        let err = ComplianceError::invalid_transition("COMPLETED", "PROCESSING");
        assert!(err.to_string().contains("COMPLETED -> PROCESSING"));
    }
}
