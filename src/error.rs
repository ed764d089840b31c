//! Error types for configuration intelligence
//!
//! Every public operation returns [`IntelligenceResult`]. Non-fatal findings
//! (low confidence, known deviations) are carried as warnings on the result
//! values themselves and never surface as errors.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while inferring, merging or storing configurations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntelligenceError {
    /// Empty or otherwise unusable input
    #[error("Validation error: {0}")]
    Validation(String),

    /// No plugin registered for the requested standard
    #[error("No plugin registered for standard '{standard}'")]
    NoPluginForStandard { standard: String },

    /// Catalog lookup that requires an existing entry
    #[error("Configuration not found: {0}")]
    ConfigurationNotFound(String),

    /// A plugin reported a failure during analysis
    #[error("Analysis failed during {stage}: {message}")]
    Analysis { stage: String, message: String },

    /// Operands of a merge disagree on standard or message type
    #[error(
        "Cannot merge patterns: {field} mismatch ('{primary}' vs '{secondary}')"
    )]
    MergeIncompatibility {
        field: &'static str,
        primary: String,
        secondary: String,
    },

    /// File read/write/deserialize failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Operation observed a cancellation request
    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse error classification, used for logging and by callers that branch
/// on the failure family rather than the exact variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Analysis,
    MergeIncompatibility,
    Persistence,
    Cancelled,
}

/// Result type for intelligence operations
pub type IntelligenceResult<T> = Result<T, IntelligenceError>;

impl IntelligenceError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an analysis error for the given stage
    pub fn analysis(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Analysis {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a no-plugin error
    pub fn no_plugin(standard: impl Into<String>) -> Self {
        Self::NoPluginForStandard {
            standard: standard.into(),
        }
    }

    /// Failure family of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            IntelligenceError::Validation(_) => ErrorKind::Validation,
            IntelligenceError::NoPluginForStandard { .. }
            | IntelligenceError::ConfigurationNotFound(_) => ErrorKind::NotFound,
            IntelligenceError::Analysis { .. } => ErrorKind::Analysis,
            IntelligenceError::MergeIncompatibility { .. } => ErrorKind::MergeIncompatibility,
            IntelligenceError::Persistence(_) => ErrorKind::Persistence,
            IntelligenceError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether orchestration must stop rather than substitute a default.
    ///
    /// Merge incompatibility and cancellation always stop; everything else may
    /// be degraded by the caller depending on which stage produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IntelligenceError::MergeIncompatibility { .. } | IntelligenceError::Cancelled
        )
    }
}

impl From<serde_json::Error> for IntelligenceError {
    fn from(e: serde_json::Error) -> Self {
        IntelligenceError::Persistence(format!("JSON error: {e}"))
    }
}

impl From<std::io::Error> for IntelligenceError {
    fn from(e: std::io::Error) -> Self {
        IntelligenceError::Persistence(format!("IO error: {e}"))
    }
}

impl From<regex::Error> for IntelligenceError {
    fn from(e: regex::Error) -> Self {
        IntelligenceError::Validation(format!("Invalid pattern: {e}"))
    }
}

impl From<StorageError> for IntelligenceError {
    fn from(e: StorageError) -> Self {
        IntelligenceError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IntelligenceError::no_plugin("HL7v23");
        assert!(err.to_string().contains("HL7v23"));

        let err = IntelligenceError::analysis("field analysis", "bad segment");
        assert!(err.to_string().contains("field analysis"));
        assert!(err.to_string().contains("bad segment"));
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            IntelligenceError::no_plugin("FHIR").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            IntelligenceError::ConfigurationNotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            IntelligenceError::validation("empty").kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_merge_incompatibility_is_fatal() {
        let err = IntelligenceError::MergeIncompatibility {
            field: "messageType",
            primary: "ADT^A01".into(),
            secondary: "ORU^R01".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("ADT^A01"));
        assert!(!IntelligenceError::validation("x").is_fatal());
    }

    #[test]
    fn test_from_regex_error() {
        let regex_err = regex::Regex::new("(").unwrap_err();
        let err: IntelligenceError = regex_err.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: IntelligenceError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }
}
