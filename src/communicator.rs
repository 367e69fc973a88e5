//! Join-on-scope task pool and typed all-reduce, replacing the original
//! implementation's home-grown MPI-style Communicator while preserving its
//! bit-identical-reduction guarantee.

use rayon::prelude::*;

/// A single-process stand-in for a distributed communicator: "workers"
/// are rayon tasks rather than separate ranks, but the reduction order is
/// fixed (sequential fold over task-index order) so results are
/// bit-identical regardless of how rayon schedules the underlying threads.
#[derive(Debug, Clone, Copy)]
pub struct Communicator {
    num_workers: usize,
}

impl Communicator {
    /// `num_workers = 0` defers to rayon's default thread count for
    /// scheduling, but all_reduce semantics are unaffected by the actual
    /// thread count.
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Runs `task(worker_ix)` for every worker in parallel and reduces the
    /// results with `reduce`, folding in ascending worker-index order so
    /// floating-point summation order — and therefore the bit pattern of
    /// the result — does not depend on scheduling.
    pub fn all_reduce<T, F, R>(&self, n: usize, task: F, reduce: R, identity: T) -> T
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
        R: Fn(T, T) -> T,
    {
        let mut results: Vec<T> = (0..n).into_par_iter().map(&task).collect();
        let mut acc = identity;
        for r in results.drain(..) {
            acc = reduce(acc, r);
        }
        acc
    }

    /// Convenience specialization for the common case of summing a
    /// per-worker `f64` contribution (e.g. partial hessian/gradient sums).
    pub fn all_reduce_sum<F>(&self, n: usize, task: F) -> f64
    where
        F: Fn(usize) -> f64 + Sync,
    {
        self.all_reduce(n, task, |a, b| a + b, 0.0)
    }

    /// Runs a join-on-scope task pool: every closure in `tasks` executes to
    /// completion before this call returns.
    pub fn join_scope<T: Send>(&self, tasks: Vec<Box<dyn FnOnce() -> T + Send>>) -> Vec<T> {
        tasks.into_par_iter().map(|task| task()).collect()
    }
}
