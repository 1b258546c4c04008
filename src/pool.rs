//! Worker pool used for the parallel copy path.
//!
//! Wraps a [`rayon::ThreadPool`], or the rayon global pool when no dedicated
//! pool was configured. Work is handed out through [`WorkerPool::scope`]: every
//! unit spawned inside the scope has finished by the time `scope` returns, which
//! is the join barrier the batching stage relies on.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct WorkerPool {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl WorkerPool {
    /// Share rayon's global pool.
    #[must_use]
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Build a dedicated pool. `None` sizes it to the number of logical CPUs.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread pool cannot be spawned.
    pub fn with_threads(threads: Option<usize>) -> Result<Self> {
        let threads = threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("batch-copy-{i}"))
            .build()
            .context("Failed to build worker pool")?;
        tracing::debug!(threads, "built dedicated worker pool");
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Run `op` with a scope that units of work can be spawned into, blocking
    /// until all of them complete.
    pub fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&rayon::Scope<'scope>) -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.scope(op),
            None => rayon::scope(op),
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("dedicated", &self.pool.is_some())
            .field("threads", &self.num_threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn scope_waits_for_all_units() {
        let pool = WorkerPool::with_threads(Some(3)).unwrap();
        assert_eq!(pool.num_threads(), 3);

        let done = AtomicUsize::new(0);
        pool.scope(|s| {
            for _ in 0..64 {
                s.spawn(|_| {
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(done.load(Ordering::SeqCst), 64);
    }
}
