use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use tributary_common::error::{TributaryError, TributaryResult};

/// Fixed-size pool bounding how many tasks run at once.
///
/// `spawn` waits for a free slot before the task is started, so tasks begin in
/// submission order and never more than `size` are in flight.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> TributaryResult<Self> {
        if size == 0 {
            return Err(TributaryError::Validation(
                "worker pool size must be at least 1".to_owned(),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Start `task` on `set` once a slot is free; the slot is released when the
    /// task finishes, panics included.
    pub async fn spawn<F>(&self, set: &mut JoinSet<F::Output>, task: F) -> TributaryResult<()>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TributaryError::Internal("worker pool closed".to_owned()))?;

        set.spawn(async move {
            let _permit = permit;
            task.await
        });
        Ok(())
    }
}
