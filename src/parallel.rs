use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

/// Runs `run` on a dedicated pool of `threads` workers, or on the global
/// rayon pool when no count (or zero) is requested.
pub fn with_threads<T, F>(threads: Option<usize>, run: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send,
    T: Send,
{
    match threads {
        None => run(),
        Some(0) => {
            warn!("0 threads requested; using the global pool");
            run()
        }
        Some(n) => {
            let pool = ThreadPoolBuilder::new()
                .num_threads(n)
                .thread_name(|i| format!("mbat-{i}"))
                .build()
                .context("build mbat thread pool")?;
            debug!("running on {n} threads");
            pool.install(run)
        }
    }
}
