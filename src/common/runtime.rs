use tokio::runtime::Runtime;

/// Builds the multi-thread runtime a launched server runs on. Zero values fall back to one
/// thread.
pub(crate) fn new(worker_threads: usize, blocking_threads: usize) -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .max_blocking_threads(blocking_threads.max(1))
        .thread_name("httpstub-worker")
        .enable_all()
        .build()
}
