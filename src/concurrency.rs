//! Concurrency helpers: dedicated bounded pools and the shared cancellation flag.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A private rayon pool with exactly `limit` threads. Work submitted here may block on
/// child processes without starving the global pool.
pub fn bounded_pool(limit: usize, name: &'static str) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(limit.max(1))
        .thread_name(move |i| format!("{name}-{i}"))
        .build()
        .with_context(|| format!("build {name} pool with {limit} threads"))
}

/// Cloneable stop flag shared between the signal handler and the pools.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
