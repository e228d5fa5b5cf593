//! Layer storage and raster processing for masked-resin (MSLA) print files.
//!
//! A sliced print is an ordered stack of 8-bit grayscale layer images. This
//! crate keeps every layer compressed in memory, decodes on demand, caches
//! per-layer and aggregate bounding rectangles, and runs bulk image
//! mutations over layer ranges in parallel.
//!
//! # Features
//!
//! - **Storage**: [`LayerManager`] over [`Layer`]s with a pluggable [`LayerCodec`]
//!   (PNG by default)
//! - **Bounds**: cached per-layer and aggregate bounding rectangles
//! - **Bulk mutations**: move, resize, flip, rotate, solidify, morphology,
//!   blurs and pattern tiling, with linear iteration fades across a range
//! - **Contours**: outer/hole contour extraction with a parent/child hierarchy
//! - **Cancellation**: [`OperationProgress`] counters shared by every long
//!   operation, cancellable from a callback or a [`CancellationToken`]
//!
//! # Pixel Conventions
//!
//! - Images are 8-bit, one channel, row-major, origin at the top-left.
//! - 0 is unlit resin, 255 is fully cured. Anything above 0 counts as lit
//!   for bounding rectangles.
//! - Foreground connectivity is 8-neighbour, background is 4-neighbour.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use layer_stack::{LayerManager, LayerSource, ParallelConfig, PngCodec};
//!
//! # fn load_payloads() -> Vec<LayerSource> { Vec::new() }
//! let sources = load_payloads();
//! let mut manager =
//!     LayerManager::from_sources(sources, Arc::new(PngCodec), ParallelConfig::global(), None)
//!         .unwrap();
//!
//! println!("{} layers, bounds {:?}", manager.len(), manager.bounding_rectangle());
//!
//! // Close small gaps on the bottom ten layers
//! let end = manager.len().min(10).saturating_sub(1);
//! manager
//!     .mutate_close(0, end, layer_stack::IterationFade::fixed(2), None)
//!     .unwrap();
//! ```
//!
//! # Progress and Cancellation
//!
//! ```
//! use layer_stack::{OperationProgress, ProgressCallback};
//!
//! let callback: ProgressCallback = Box::new(|progress| {
//!     println!("{}", progress);
//!     true // keep going
//! });
//! let progress = OperationProgress::with_callback(callback);
//! let token = progress.token();
//! token.cancel();
//! assert!(progress.is_cancelled());
//! ```
//!
//! # Error Handling
//!
//! Operations return `LayerResult<T>`, which is `Result<T, LayerError>`.
//! Cancellation surfaces as [`LayerError::Cancelled`]:
//!
//! ```
//! use layer_stack::LayerError;
//!
//! fn report(result: Result<(), LayerError>) {
//!     match result {
//!         Ok(()) => println!("done"),
//!         Err(e) if e.is_cancelled() => println!("cancelled"),
//!         Err(e) => println!("[{}] {}", e.code(), e),
//!     }
//! }
//! # report(Ok(()));
//! ```

mod error;
mod layer;
mod manager;
mod parallel;
mod types;

pub mod codec;
pub mod contours;
pub mod draw;
pub mod fade;
pub mod parameters;
pub mod progress;
pub mod raster;
pub mod tracing_ext;
pub mod transform;

pub use codec::{LayerCodec, PngCodec, RawCodec};
pub use contours::{Contour, ContourKind, ContourTree, find_contours};
pub use error::{ErrorCode, LayerError, LayerResult, RecoverySuggestion};
pub use fade::{IterationFade, ResizeFade};
pub use layer::Layer;
pub use manager::{LayerManager, LayerSource};
pub use parallel::ParallelConfig;
pub use parameters::PrintParameterModifier;
pub use progress::{CancellationToken, OperationProgress, Progress, ProgressCallback};
pub use raster::{Kernel, MorphOp};
pub use transform::{
    Anchor, FlipDirection, MoveDestination, MoveOperation, PatternOperation,
};
pub use types::{Point, Rect, Size};

// Image type used throughout the public API.
pub use image::GrayImage;
