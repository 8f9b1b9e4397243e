//! Trial- and chain-level fan-out on a dedicated worker pool

use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;

/// Run `work(index)` for every index in `0..count` on a pool of `num_jobs`
/// threads (0 lets rayon pick), preserving index order in the output
pub(crate) fn run_indexed<T, F>(num_jobs: usize, count: usize, work: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync + Send,
{
    debug!(num_jobs, count, "run_indexed: called");
    let pool = rayon::ThreadPoolBuilder::new().num_threads(num_jobs).build()?;
    pool.install(|| (0..count).into_par_iter().map(&work).collect())
}
