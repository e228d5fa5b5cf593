//! Error types for detection, repair and pixel editing.
//!
//! Codes follow the pattern `ISSUE-XXXX` where:
//! - 1xxx = Configuration errors
//! - 2xxx = Pixel operation errors
//! - 3xxx = Errors surfaced from the layer store

use layer_stack::{LayerError, RecoverySuggestion};
use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for issue operations.
pub type IssueResult<T> = Result<T, IssueError>;

/// Machine-readable error codes for issue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueErrorCode {
    /// ISSUE-1001: Detection configuration is inconsistent
    InvalidDetectionConfig = 1001,
    /// ISSUE-1002: Repair parameters are inconsistent
    InvalidRepairParams = 1002,

    /// ISSUE-2001: Pixel operation rejected
    InvalidPixelOperation = 2001,

    /// ISSUE-3001: Layer store error
    Layer = 3001,
    /// ISSUE-3002: Operation was cancelled
    Cancelled = 3002,
}

impl IssueErrorCode {
    /// Returns the error code as a string in the format `ISSUE-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueErrorCode::InvalidDetectionConfig => "ISSUE-1001",
            IssueErrorCode::InvalidRepairParams => "ISSUE-1002",
            IssueErrorCode::InvalidPixelOperation => "ISSUE-2001",
            IssueErrorCode::Layer => "ISSUE-3001",
            IssueErrorCode::Cancelled => "ISSUE-3002",
        }
    }
}

impl std::fmt::Display for IssueErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur while detecting, repairing or replaying edits.
#[derive(Debug, Error, Diagnostic)]
pub enum IssueError {
    /// Detection configuration cannot be used.
    #[error("invalid detection configuration: {details}")]
    #[diagnostic(code(issues::config::detection))]
    InvalidDetectionConfig { details: String },

    /// Repair parameters cannot be used.
    #[error("invalid repair parameters: {details}")]
    #[diagnostic(code(issues::config::repair))]
    InvalidRepairParams { details: String },

    /// A pixel operation was rejected when added to the history.
    #[error("invalid pixel operation on layer {layer}: {details}")]
    #[diagnostic(
        code(issues::pixel::invalid),
        help("Supports and drain holes cannot be placed on the first layer, and brush sizes must be positive.")
    )]
    InvalidPixelOperation { layer: usize, details: String },

    /// Underlying layer store error.
    #[error("layer operation failed: {0}")]
    #[diagnostic(code(issues::layer::error))]
    Layer(#[from] LayerError),
}

impl IssueError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> IssueErrorCode {
        match self {
            IssueError::InvalidDetectionConfig { .. } => IssueErrorCode::InvalidDetectionConfig,
            IssueError::InvalidRepairParams { .. } => IssueErrorCode::InvalidRepairParams,
            IssueError::InvalidPixelOperation { .. } => IssueErrorCode::InvalidPixelOperation,
            IssueError::Layer(e) if e.is_cancelled() => IssueErrorCode::Cancelled,
            IssueError::Layer(_) => IssueErrorCode::Layer,
        }
    }

    /// Returns a suggestion for recovering from this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            IssueError::InvalidDetectionConfig { details }
            | IssueError::InvalidRepairParams { details } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("configuration".to_string(), details.clone())],
            },
            IssueError::InvalidPixelOperation { .. } => RecoverySuggestion::ManualIntervention {
                description: "Move the edit to a layer above the first one or enlarge the brush"
                    .to_string(),
            },
            IssueError::Layer(e) => e.recovery_suggestion(),
        }
    }

    /// True when the error reports a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IssueError::Layer(e) if e.is_cancelled())
    }

    /// Create a cancellation error for `operation`.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        IssueError::Layer(LayerError::cancelled(operation))
    }

    pub fn invalid_detection_config(details: impl Into<String>) -> Self {
        IssueError::InvalidDetectionConfig {
            details: details.into(),
        }
    }

    pub fn invalid_repair_params(details: impl Into<String>) -> Self {
        IssueError::InvalidRepairParams {
            details: details.into(),
        }
    }

    pub fn invalid_pixel_operation(layer: usize, details: impl Into<String>) -> Self {
        IssueError::InvalidPixelOperation {
            layer,
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(IssueErrorCode::InvalidPixelOperation.as_str(), "ISSUE-2001");
        assert_eq!(IssueErrorCode::Cancelled.to_string(), "ISSUE-3002");
    }

    #[test]
    fn test_from_layer_error() {
        let err: IssueError = LayerError::index_out_of_range(7, 3).into();
        assert!(matches!(err, IssueError::Layer(_)));
        assert_eq!(err.code(), IssueErrorCode::Layer);
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_cancellation_passes_through() {
        let err = IssueError::cancelled("Islands");
        assert!(err.is_cancelled());
        assert_eq!(err.code(), IssueErrorCode::Cancelled);
        assert_eq!(err.recovery_suggestion(), RecoverySuggestion::Retry);
    }

    #[test]
    fn test_pixel_operation_display() {
        let err = IssueError::invalid_pixel_operation(0, "supports need a layer below");
        assert_eq!(
            err.to_string(),
            "invalid pixel operation on layer 0: supports need a layer below"
        );
    }
}
