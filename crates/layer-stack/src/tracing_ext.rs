//! Tracing extensions for layer operations.
//!
//! Structured logging and timing for bulk mutations, detection and repair.
//!
//! Enable output by installing a subscriber in the application:
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // RUST_LOG=layer_stack=debug for per-phase output
//! ```
//!
//! # Log Levels
//!
//! - **INFO**: Operation summaries, timing
//! - **DEBUG**: Per-phase detail, store state
//! - **TRACE**: Per-layer detail

use crate::LayerManager;
use crate::progress::OperationProgress;
use std::time::Instant;
use tracing::{Span, debug, info, trace};

/// Times one operation and logs how long it took when dropped.
///
/// ```rust,ignore
/// fn mutate() {
///     let _timer = OperationTimer::new("mutate_erode");
///     // erode every layer
/// } // elapsed_ms logged here
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Start timing `name`.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("layer_operation", operation = name);
        debug!(target: "layer_stack::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer that records the layer range it works on.
    pub fn with_range(name: &'static str, start: usize, end: usize) -> Self {
        let span = tracing::info_span!(
            "layer_operation",
            operation = name,
            layer_start = start,
            layer_end = end
        );
        debug!(
            target: "layer_stack::timing",
            operation = name,
            layer_start = start,
            layer_end = end,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Time since the timer started.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Span covering the operation.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        info!(
            target: "layer_stack::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Operation completed"
        );
    }
}

/// Log layer store statistics at debug level.
pub fn log_store_stats(manager: &LayerManager, context: &str) {
    let modified = manager.iter().filter(|layer| layer.is_modified()).count();
    let bounds = manager
        .bounding_rectangle()
        .map(|rect| rect.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    debug!(
        target: "layer_stack::store_state",
        context = context,
        layers = manager.len(),
        modified = modified,
        bounds = bounds,
        "Store state"
    );
}

/// Log progress at trace level.
pub fn log_progress(progress: &OperationProgress) {
    trace!(
        target: "layer_stack::progress",
        processed = progress.processed(),
        total = progress.item_count(),
        "{}",
        progress
    );
}
