//! Printability checks and fixes for [`layer_stack`] prints.
//!
//! # Features
//!
//! - **Islands**: regions with too little cured resin on the layer below
//! - **Resin traps**: sealed cavities that hold uncured resin, found by
//!   following every cavity through the layers above and below it
//! - **Touching bounds** and **empty layers**
//! - **Repair**: small island removal (optionally recursive), trap filling
//!   and a closing/opening pass over a layer range
//! - **Pixel edits**: brush strokes, support pillars and drain holes,
//!   replayed in order and written back in one go
//!
//! # Quick Start
//!
//! ```no_run
//! use layer_issues::{IssueDetectionConfig, IssueDetector, RepairParams, repair_layers};
//! # fn load() -> layer_stack::LayerManager { unimplemented!() }
//!
//! let mut manager = load();
//! let config = IssueDetectionConfig::default();
//! let report = IssueDetector::new(config.clone()).detect(&manager, None).unwrap();
//! println!("{}", report);
//!
//! let end = manager.len() - 1;
//! let result = repair_layers(
//!     &mut manager,
//!     0,
//!     end,
//!     &RepairParams::default(),
//!     &config,
//!     Some(&report),
//!     None,
//! )
//! .unwrap();
//! println!("Filled {} resin traps", result.resin_traps_filled);
//! ```
//!
//! # Error Handling
//!
//! Everything returns `IssueResult<T>`. Errors from the layer store are
//! wrapped in [`IssueError::Layer`]; [`IssueError::is_cancelled`] tells a
//! cancellation from a failure. Detection and repair report cancellation
//! through their result instead and keep what they already did.

mod config;
mod detect;
mod error;
mod issue;
mod pixel;
mod repair;

pub use config::{
    EmptyLayerDetectionConfig, IslandDetectionConfig, IssueDetectionConfig,
    ResinTrapDetectionConfig, TouchingBoundDetectionConfig,
};
pub use detect::IssueDetector;
pub use detect::bounds::{detect_touching_bounds, touching_bound_pixels};
pub use detect::islands::{SupportCount, detect_islands};
pub use error::{IssueError, IssueErrorCode, IssueResult};
pub use issue::{DetectionReport, Issue, IssueKind};
pub use pixel::{BrushShape, PixelHistory, PixelOperation, PixelOperationKind, ReplayResult, replay};
pub use repair::{RepairParams, RepairResult, repair_layers};
