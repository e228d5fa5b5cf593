//! Progress reporting and cooperative cancellation for long-running layer operations.
//!
//! Every bulk operation accepts an optional [`OperationProgress`]. Workers
//! call [`OperationProgress::lock_and_increment`] once per finished layer and
//! poll [`OperationProgress::is_cancelled`] at the top of each loop body.
//!
//! # Example
//!
//! ```ignore
//! use layer_stack::progress::{OperationProgress, ProgressCallback};
//!
//! let callback: ProgressCallback = Box::new(|progress| {
//!     println!("{}", progress);
//!     true // Continue processing (return false to cancel)
//! });
//!
//! let progress = OperationProgress::with_callback(callback);
//! manager.mutate_close(0, 99, fade, Some(&progress))?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Status label used while layers are being decoded.
pub const STATUS_DECODED_LAYERS: &str = "Decoded Layers";
/// Status label used while layers are being encoded.
pub const STATUS_ENCODED_LAYERS: &str = "Encoded Layers";
/// Status label used while per-layer bounds are recomputed.
pub const STATUS_GATHERING_BOUNDS: &str = "Gathering Bounds";
/// Status label used while the aggregate bounds are unioned.
pub const STATUS_CALCULATING_BOUNDS: &str = "Calculating Bounds";
/// Status label used by island and touching-bound detection.
pub const STATUS_ISLANDS: &str = "Layers processed (Islands)";
/// Status label used by resin trap detection.
pub const STATUS_RESIN_TRAPS: &str = "Layers processed (Resin traps)";
/// Status label used by the repair engine.
pub const STATUS_REPAIRED_LAYERS: &str = "Repaired Layers";

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Items processed so far.
    pub processed: u64,

    /// Total number of items, 0 when unknown.
    pub total: u64,

    /// What is being counted, e.g. "Eroded layers".
    pub item_name: String,

    /// Elapsed time since the last reset.
    pub elapsed: Duration,
}

impl Progress {
    /// Processed share of the total, 0.0 to 1.0.
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.processed as f64) / (self.total as f64)
        }
    }

    /// Get progress as a percentage (0.0 to 100.0).
    #[inline]
    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }

    /// True once every item is processed.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.processed >= self.total
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total == 0 {
            write!(f, "{}/? {}", self.processed, self.item_name)
        } else {
            write!(
                f,
                "{}/{} {} | {:.2}%",
                self.processed,
                self.total,
                self.item_name,
                self.percent()
            )
        }
    }
}

/// Callback function for progress reporting.
///
/// Returns `true` to continue, `false` to request cancellation.
pub type ProgressCallback = Box<dyn Fn(&Progress) -> bool + Send + Sync>;

/// Cloneable cancellation signal shared between a caller and workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Shared progress object for a long-running operation.
///
/// The processed counter sits behind a mutex so a caller polling
/// [`OperationProgress::snapshot`] always observes a monotonic count while
/// many rayon workers increment it.
pub struct OperationProgress {
    title: Mutex<String>,
    item_name: Mutex<String>,
    item_count: AtomicU64,
    processed: Mutex<u64>,
    token: CancellationToken,
    callback: Option<ProgressCallback>,
    start_time: Mutex<Instant>,
    last_callback_time: Mutex<Instant>,
    callback_interval: Duration,
}

impl fmt::Debug for OperationProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationProgress")
            .field("title", &self.title())
            .field("item_name", &self.item_name())
            .field("item_count", &self.item_count())
            .field("processed", &self.processed())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Default for OperationProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationProgress {
    /// Create a progress object without a callback.
    pub fn new() -> Self {
        Self {
            title: Mutex::new(String::new()),
            item_name: Mutex::new(String::new()),
            item_count: AtomicU64::new(0),
            processed: Mutex::new(0),
            token: CancellationToken::new(),
            callback: None,
            start_time: Mutex::new(Instant::now()),
            last_callback_time: Mutex::new(Instant::now()),
            callback_interval: Duration::from_millis(100), // Don't callback too frequently
        }
    }

    /// Create a progress object that reports through `callback`.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            ..Self::new()
        }
    }

    /// Create a progress object bound to an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::new()
        }
    }

    /// Set the minimum interval between callback invocations.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.callback_interval = interval;
        self
    }

    /// Restart counting for a new phase.
    pub fn reset(&self, item_name: impl Into<String>, item_count: u64) {
        *lock(&self.item_name) = item_name.into();
        self.item_count.store(item_count, Ordering::Relaxed);
        *lock(&self.processed) = 0;
        *lock(&self.start_time) = Instant::now();
    }

    /// Set the title shown above the item description.
    pub fn set_title(&self, title: impl Into<String>) {
        *lock(&self.title) = title.into();
    }

    pub fn title(&self) -> String {
        lock(&self.title).clone()
    }

    /// Change the item label without resetting the count.
    pub fn set_item_name(&self, item_name: impl Into<String>) {
        *lock(&self.item_name) = item_name.into();
    }

    pub fn item_name(&self) -> String {
        lock(&self.item_name).clone()
    }

    pub fn set_item_count(&self, item_count: u64) {
        self.item_count.store(item_count, Ordering::Relaxed);
    }

    #[inline]
    pub fn item_count(&self) -> u64 {
        self.item_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn processed(&self) -> u64 {
        *lock(&self.processed)
    }

    /// Increment the processed counter by one and notify the callback.
    ///
    /// Returns the new count.
    pub fn lock_and_increment(&self) -> u64 {
        let value = {
            let mut processed = lock(&self.processed);
            *processed += 1;
            *processed
        };
        self.maybe_callback();
        value
    }

    /// The cancellation token workers poll.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Elapsed time since the last reset.
    pub fn elapsed(&self) -> Duration {
        lock(&self.start_time).elapsed()
    }

    /// Create a Progress snapshot.
    pub fn snapshot(&self) -> Progress {
        Progress {
            processed: self.processed(),
            total: self.item_count(),
            item_name: self.item_name(),
            elapsed: self.elapsed(),
        }
    }

    /// Call the callback if enough time has passed since the last call.
    ///
    /// A callback returning `false` cancels the operation.
    fn maybe_callback(&self) {
        let Some(callback) = &self.callback else {
            return;
        };
        if self.is_cancelled() {
            return;
        }

        let now = Instant::now();
        {
            let mut last = lock(&self.last_callback_time);
            if !self.callback_interval.is_zero()
                && now.duration_since(*last) < self.callback_interval
            {
                return;
            }
            *last = now;
        }

        if !callback(&self.snapshot()) {
            self.cancel();
        }
    }
}

impl fmt::Display for OperationProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.snapshot())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_progress_fraction() {
        let progress = Progress {
            processed: 25,
            total: 100,
            item_name: "Eroded layers".into(),
            elapsed: Duration::ZERO,
        };
        assert!((progress.fraction() - 0.25).abs() < 1e-10);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_progress_display() {
        let progress = Progress {
            processed: 1,
            total: 3,
            item_name: STATUS_ISLANDS.into(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(
            progress.to_string(),
            "1/3 Layers processed (Islands) | 33.33%"
        );

        let unknown = Progress {
            total: 0,
            ..progress
        };
        assert_eq!(unknown.to_string(), "1/? Layers processed (Islands)");
    }

    #[test]
    fn test_parallel_increments_are_counted() {
        let progress = OperationProgress::new();
        progress.reset("Dilated layers", 1000);
        (0..1000).into_par_iter().for_each(|_| {
            progress.lock_and_increment();
        });
        assert_eq!(progress.processed(), 1000);
        assert!(progress.snapshot().is_complete());
    }

    #[test]
    fn test_reset_clears_counter() {
        let progress = OperationProgress::new();
        progress.reset("A", 2);
        progress.lock_and_increment();
        progress.reset("B", 5);
        assert_eq!(progress.processed(), 0);
        assert_eq!(progress.item_count(), 5);
        assert_eq!(progress.item_name(), "B");
    }

    #[test]
    fn test_callback_can_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let progress = OperationProgress::with_callback(Box::new(move |p| {
            seen.fetch_add(1, Ordering::Relaxed);
            p.processed < 3
        }))
        .with_interval(Duration::ZERO);

        progress.reset("Layers", 10);
        for _ in 0..5 {
            progress.lock_and_increment();
        }
        assert!(progress.is_cancelled());
        // Callback is not called again once cancelled.
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_token_shared_with_caller() {
        let token = CancellationToken::new();
        let progress = OperationProgress::with_token(token.clone());
        assert!(!progress.is_cancelled());
        token.cancel();
        assert!(progress.is_cancelled());
    }
}
