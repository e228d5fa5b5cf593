//! Explicit parallelism configuration.
//!
//! A [`ParallelConfig`] travels with the [`crate::LayerManager`] instead of
//! living in process-wide state, so two stores can run with different
//! degrees of parallelism side by side.

use crate::error::{LayerError, LayerResult};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// How many worker threads bulk operations may use.
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    max_degree_of_parallelism: Option<usize>,
    pool: Option<Arc<ThreadPool>>,
}

impl ParallelConfig {
    /// Use rayon's global pool.
    pub fn global() -> Self {
        Self::default()
    }

    /// Cap the number of worker threads. `None` or `Some(0)` uses the global pool.
    pub fn new(max_degree_of_parallelism: Option<usize>) -> LayerResult<Self> {
        match max_degree_of_parallelism {
            None | Some(0) => Ok(Self::global()),
            Some(threads) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("layer-worker-{}", i))
                    .build()
                    .map_err(|e| LayerError::ThreadPool {
                        details: e.to_string(),
                    })?;
                Ok(Self {
                    max_degree_of_parallelism: Some(threads),
                    pool: Some(Arc::new(pool)),
                })
            }
        }
    }

    /// Run every operation on a single worker.
    pub fn sequential() -> LayerResult<Self> {
        Self::new(Some(1))
    }

    pub fn max_degree_of_parallelism(&self) -> Option<usize> {
        self.max_degree_of_parallelism
    }

    /// Number of threads parallel sections will use.
    pub fn current_num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Run `op` inside the configured pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}
