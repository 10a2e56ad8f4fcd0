//! Scoped background tasks.
//!
//! A `ScopedTask` aborts its task when dropped, so a timer can never fire
//! into a component that has already been torn down. Replacing the handle in
//! an `Option` field cancels the previous timer.

use std::future::Future;

use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct ScopedTask {
    handle: JoinHandle<()>,
}

impl ScopedTask {
    /// Spawn `fut` on the current tokio runtime.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
