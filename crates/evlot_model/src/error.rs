//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while decoding or validating documents.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Document bytes or fields do not match the expected schema.
    #[error("malformed {collection} document: {message}")]
    Malformed {
        /// Collection the document was read from.
        collection: &'static str,
        /// Description of the problem.
        message: String,
    },

    /// Document is well-formed but violates a domain rule.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Entrant status transition is not allowed.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// A field that is frozen after publishing was modified.
    #[error("field `{field}` is immutable once the event is published")]
    ImmutableField {
        /// Name of the frozen field.
        field: &'static str,
    },

    /// Document cannot be modified at all after creation.
    #[error("{collection} documents are immutable")]
    ImmutableDocument {
        /// Collection of the document.
        collection: &'static str,
    },

    /// QR code contents could not be decoded.
    #[error("invalid QR payload: {0}")]
    InvalidQrPayload(String),

    /// Identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl ModelError {
    /// Creates a malformed-document error.
    pub fn malformed(collection: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            collection,
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ModelError::malformed("events", "missing title");
        assert_eq!(err.to_string(), "malformed events document: missing title");

        let err = ModelError::InvalidTransition {
            from: "Notified".into(),
            to: "CheckedIn".into(),
        };
        assert!(err.to_string().contains("Notified"));
        assert!(err.to_string().contains("CheckedIn"));
    }
}
