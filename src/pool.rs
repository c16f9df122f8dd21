//! Worker pool for per-file patch work.
//!
//! Patch files are independent of each other, so apply and rebuild fan out
//! over a rayon pool and merge results afterwards. Output order always
//! matches input order.

use rayon::prelude::*;

/// Map `f` over `items` on `workers` threads (0 picks rayon's default).
///
/// Falls back to sequential execution when the pool cannot be built.
pub fn map_parallel<T, R, F>(workers: usize, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    if items.len() <= 1 {
        return items.iter().map(&f).collect();
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build();

    match pool {
        Ok(pool) => pool.install(|| items.par_iter().map(&f).collect()),
        Err(e) => {
            tracing::warn!("could not build worker pool, running sequentially: {e}");
            items.iter().map(&f).collect()
        }
    }
}
