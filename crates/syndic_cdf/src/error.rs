//! Error types for the CDF model.

use thiserror::Error;

/// Result type for CDF operations.
pub type CdfResult<T> = Result<T, CdfError>;

/// Errors that can occur while building, encoding or decoding CDF data.
#[derive(Error, Debug)]
pub enum CdfError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A UUID string could not be parsed.
    #[error("invalid uuid: {value}")]
    InvalidUuid {
        /// The offending input.
        value: String,
    },

    /// An attribute type name is not recognized.
    #[error("unknown attribute type: {0}")]
    UnknownAttributeType(String),

    /// The payload is structurally valid JSON but not a valid message.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),
}

impl CdfError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CdfError::InvalidUuid {
            value: "not-a-uuid".into(),
        };
        assert_eq!(err.to_string(), "invalid uuid: not-a-uuid");

        let err = CdfError::invalid_structure("missing entities");
        assert!(err.to_string().contains("missing entities"));
    }
}
