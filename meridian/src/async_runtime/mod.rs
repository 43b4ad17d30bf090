use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Spawns the future on the runtime, returning the handle to abort it.
///
/// The task is detached: it keeps running until it completes or is aborted.
pub fn spawn<T>(runtime: &Handle, future: T) -> AbortHandle
where
    T: Future + Send + 'static,
    T::Output: Send + 'static,
{
    runtime.spawn(future).abort_handle()
}
