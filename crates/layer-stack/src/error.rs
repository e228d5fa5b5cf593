//! Error types for layer operations with rich diagnostics.
//!
//! This module provides error handling with:
//! - Machine-readable error codes for programmatic handling
//! - Context (which layer, which range, what went wrong)
//! - Recovery suggestions for common issues
//! - Terminal display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `LAYER-XXXX`:
//! - `LAYER-1xxx`: Codec errors (decoding, encoding layer payloads)
//! - `LAYER-2xxx`: Cancellation
//! - `LAYER-3xxx`: Argument and validation errors
//! - `LAYER-4xxx`: Processing errors inside parallel workers
//!
//! Cancellation is reported as its own variant so callers can tell
//! "user cancelled" apart from "something broke":
//!
//! ```rust,ignore
//! match manager.mutate_erode(0, 99, fade, Some(&progress)) {
//!     Err(e) if e.is_cancelled() => println!("cancelled"),
//!     Err(e) => println!("{} failed: {}", e.code(), e),
//!     Ok(()) => {}
//! }
//! ```

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for layer operations.
pub type LayerResult<T> = Result<T, LayerError>;

/// Machine-readable error codes for layer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Codec errors (1xxx)
    /// LAYER-1001: Payload could not be decoded into an image
    Decode = 1001,
    /// LAYER-1002: Image could not be encoded into a payload
    Encode = 1002,

    // Cancellation (2xxx)
    /// LAYER-2001: Operation was cancelled cooperatively
    Cancelled = 2001,

    // Argument errors (3xxx)
    /// LAYER-3001: Invalid argument supplied at call time
    InvalidArgument = 3001,
    /// LAYER-3002: Layer index outside the store
    LayerIndexOutOfRange = 3002,
    /// LAYER-3003: Invalid closed layer range
    InvalidLayerRange = 3003,
    /// LAYER-3004: Image dimensions do not match
    ImageSizeMismatch = 3004,

    // Processing errors (4xxx)
    /// LAYER-4001: Per-layer processing failed
    ProcessingFailed = 4001,
    /// LAYER-4002: Worker pool could not be created
    ThreadPool = 4002,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `LAYER-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Decode => "LAYER-1001",
            ErrorCode::Encode => "LAYER-1002",
            ErrorCode::Cancelled => "LAYER-2001",
            ErrorCode::InvalidArgument => "LAYER-3001",
            ErrorCode::LayerIndexOutOfRange => "LAYER-3002",
            ErrorCode::InvalidLayerRange => "LAYER-3003",
            ErrorCode::ImageSizeMismatch => "LAYER-3004",
            ErrorCode::ProcessingFailed => "LAYER-4001",
            ErrorCode::ThreadPool => "LAYER-4002",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for layer errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Re-slice or re-export the file that produced the payload.
    ReexportFile,
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Retry, the operation was interrupted rather than failed.
    Retry,
    /// Manual intervention may be required.
    ManualIntervention { description: String },
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::ReexportFile => {
                write!(f, "Try re-slicing the model or re-exporting the file")
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::Retry => write!(f, "Run the operation again"),
            RecoverySuggestion::ManualIntervention { description } => {
                write!(f, "{}", description)
            }
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Errors that can occur during layer operations.
#[derive(Debug, Error, Diagnostic)]
pub enum LayerError {
    /// Payload could not be decoded.
    #[error("failed to decode layer {}: {details}", display_layer(.layer))]
    #[diagnostic(
        code(layer::codec::decode),
        help("The layer payload is missing or malformed. Try re-slicing the model.")
    )]
    Decode {
        layer: Option<usize>,
        details: String,
    },

    /// Image could not be encoded.
    #[error("failed to encode layer image: {details}")]
    #[diagnostic(code(layer::codec::encode))]
    Encode { details: String },

    /// Cooperative cancellation was observed.
    #[error("operation cancelled: {operation}")]
    #[diagnostic(code(layer::cancelled), help("The operation was interrupted by request."))]
    Cancelled { operation: String },

    /// Invalid argument supplied by the caller.
    #[error("invalid argument: {details}")]
    #[diagnostic(code(layer::argument::invalid))]
    InvalidArgument { details: String },

    /// Layer index outside the store.
    #[error("layer index {index} is out of range, the store has {count} layers")]
    #[diagnostic(code(layer::argument::index))]
    LayerIndexOutOfRange { index: usize, count: usize },

    /// Invalid closed layer range.
    #[error("invalid layer range [{start}, {end}] for a store of {count} layers")]
    #[diagnostic(
        code(layer::argument::range),
        help("The range is inclusive on both ends and start must not exceed end.")
    )]
    InvalidLayerRange {
        start: usize,
        end: usize,
        count: usize,
    },

    /// Image dimensions do not match what the operation expects.
    #[error(
        "layer {layer} image is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}"
    )]
    #[diagnostic(code(layer::argument::size))]
    ImageSizeMismatch {
        layer: usize,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Generic failure inside a per-layer worker.
    #[error("layer processing failed: {details}")]
    #[diagnostic(code(layer::processing::failed))]
    ProcessingFailed { details: String },

    /// Worker pool construction failed.
    #[error("failed to build worker pool: {details}")]
    #[diagnostic(
        code(layer::processing::pool),
        help("Try a smaller max_degree_of_parallelism or leave it unset.")
    )]
    ThreadPool { details: String },
}

fn display_layer(layer: &Option<usize>) -> String {
    match layer {
        Some(index) => index.to_string(),
        None => "?".to_string(),
    }
}

impl LayerError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            LayerError::Decode { .. } => ErrorCode::Decode,
            LayerError::Encode { .. } => ErrorCode::Encode,
            LayerError::Cancelled { .. } => ErrorCode::Cancelled,
            LayerError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            LayerError::LayerIndexOutOfRange { .. } => ErrorCode::LayerIndexOutOfRange,
            LayerError::InvalidLayerRange { .. } => ErrorCode::InvalidLayerRange,
            LayerError::ImageSizeMismatch { .. } => ErrorCode::ImageSizeMismatch,
            LayerError::ProcessingFailed { .. } => ErrorCode::ProcessingFailed,
            LayerError::ThreadPool { .. } => ErrorCode::ThreadPool,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            LayerError::Decode { .. } => RecoverySuggestion::ReexportFile,
            LayerError::Encode { .. } => RecoverySuggestion::ManualIntervention {
                description: "The image could not be compressed, check available memory".into(),
            },
            LayerError::Cancelled { .. } => RecoverySuggestion::Retry,
            LayerError::InvalidArgument { details } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("argument".into(), details.clone())],
            },
            LayerError::LayerIndexOutOfRange { count, .. }
            | LayerError::InvalidLayerRange { count, .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![(
                    "layer index".into(),
                    format!("0..={}", count.saturating_sub(1)),
                )],
            },
            LayerError::ImageSizeMismatch { .. } => RecoverySuggestion::ManualIntervention {
                description: "All layers of a file must share the same resolution".into(),
            },
            LayerError::ProcessingFailed { .. } => RecoverySuggestion::None,
            LayerError::ThreadPool { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("max_degree_of_parallelism".into(), "None".into())],
            },
        }
    }

    /// Returns true when this error is a cooperative cancellation.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LayerError::Cancelled { .. })
    }

    // Constructor helpers

    /// Create a Decode error.
    pub fn decode(layer: Option<usize>, details: impl Into<String>) -> Self {
        LayerError::Decode {
            layer,
            details: details.into(),
        }
    }

    /// Create an Encode error.
    pub fn encode(details: impl Into<String>) -> Self {
        LayerError::Encode {
            details: details.into(),
        }
    }

    /// Create a Cancelled error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        LayerError::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        LayerError::InvalidArgument {
            details: details.into(),
        }
    }

    /// Create a LayerIndexOutOfRange error.
    pub fn index_out_of_range(index: usize, count: usize) -> Self {
        LayerError::LayerIndexOutOfRange { index, count }
    }

    /// Create a ProcessingFailed error.
    pub fn processing_failed(details: impl Into<String>) -> Self {
        LayerError::ProcessingFailed {
            details: details.into(),
        }
    }
}
