//! Bounded worker pool with parent/child task groups (C9).
//!
//! A [`WorkerPool`] hands out [`TaskGroup`]s that track a batch of spawned
//! tasks together. Each task only occupies a pool slot for the duration of
//! its own body; a task that spawns further children into a *different*
//! group and then awaits them via [`TaskGroup::sync`] is not holding a slot
//! while it waits, so deep recursion (directories spawning directories)
//! cannot deadlock against a pool sized for leaf-level parallelism. Callers
//! get this by construction by using a separate, effectively-unbounded
//! group for fan-out/traversal work and a bounded group only for the actual
//! I/O-heavy leaf work — this is how [`crate::writer`]'s directory pool and
//! file pool are split.
//!
//! Grounded on `examples/original_source/src/rekord/repository_write.cc`'s
//! `dir_async`/`file_async` pool pair (`PutContext`) and on the default
//! thread-count formula in `config.cc`'s `rk_ComputeDefaultThreads`.

use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// `REKORD_THREADS` env var if set to a valid positive integer, else six
/// times the available parallelism — mirrors `rk_ComputeDefaultThreads`.
pub fn default_worker_count() -> usize {
    if let Ok(value) = std::env::var("REKORD_THREADS") {
        if let Ok(n) = value.parse::<usize>() {
            if n > 0 {
                return n;
            }
        }
    }
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4) * 6
}

/// A named pool of `capacity` concurrent slots. Capacity is a soft cap on
/// work actually running at once, not on how many tasks may be queued.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// A pool wide enough that traversal/fan-out tasks never meaningfully
    /// queue on it; only the leaf-work pool should be sized to the
    /// configured thread count.
    pub fn unbounded_for_fanout() -> Self {
        Self::new(4096)
    }

    pub fn group(&self) -> TaskGroup {
        TaskGroup {
            semaphore: self.semaphore.clone(),
            handles: Vec::new(),
        }
    }
}

/// A batch of tasks spawned into one [`WorkerPool`], awaited together.
pub struct TaskGroup {
    semaphore: Arc<Semaphore>,
    handles: Vec<JoinHandle<Result<()>>>,
}

impl TaskGroup {
    /// Spawns `work` to run as soon as a pool slot frees up. The slot is
    /// acquired inside the spawned task itself, so `spawn` (and `sync`,
    /// below) never block the caller and never hold a slot on the caller's
    /// behalf.
    pub fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("worker pool semaphore is never closed");
            work.await
        });
        self.handles.push(handle);
    }

    /// Waits for every task in this group to finish. Every task is awaited
    /// even after the first failure, so siblings get a chance to complete
    /// (and their own errors, if any, are still logged by the caller via
    /// `tracing`); the first error encountered is returned.
    pub async fn sync(self) -> Result<()> {
        let mut first_err = None;
        for handle in self.handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(join_err) => {
                    first_err.get_or_insert(join_err.into());
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn group_runs_all_tasks_and_reports_count() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = pool.group();
        for _ in 0..10 {
            let counter = counter.clone();
            group.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(group.len(), 10);
        group.sync().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn first_error_is_surfaced() {
        let pool = WorkerPool::new(4);
        let mut group = pool.group();
        group.spawn(async { Ok(()) });
        group.spawn(async { Err(crate::error::Error::Backend("boom".into())) });
        assert!(group.sync().await.is_err());
    }

    #[tokio::test]
    async fn nested_groups_do_not_deadlock_a_saturated_pool() {
        // A single-slot leaf pool plus an unbounded fan-out pool: parents
        // recurse freely while only actual leaf work contends for the one
        // slot.
        let fanout = WorkerPool::unbounded_for_fanout();
        let leaves = WorkerPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut parents = fanout.group();
        for _ in 0..8 {
            let leaves = leaves.clone();
            let counter = counter.clone();
            parents.spawn(async move {
                let mut children = leaves.group();
                for _ in 0..4 {
                    let counter = counter.clone();
                    children.spawn(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    });
                }
                children.sync().await
            });
        }
        parents.sync().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }
}
