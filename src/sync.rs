use std::sync::Arc;

use crate::error::DiskError;

/// Counting semaphore shared between tasks and the completion signal.
///
/// `up` never blocks and can be called from any thread, which is what lets a
/// device worker wake the server loop.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<tokio::sync::Semaphore>,
}

impl Semaphore {
    pub fn create(initial: usize) -> Result<Self, DiskError> {
        if initial > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(DiskError::SyncInit { initial });
        }

        Ok(Self {
            inner: Arc::new(tokio::sync::Semaphore::new(initial)),
        })
    }

    /// Waits for a unit and consumes it.
    pub async fn down(&self) -> Result<(), DiskError> {
        let permit = self
            .inner
            .acquire()
            .await
            .map_err(|_| DiskError::Stopped)?;
        permit.forget();
        Ok(())
    }

    pub fn up(&self) {
        self.inner.add_permits(1);
    }

    pub fn count(&self) -> usize {
        self.inner.available_permits()
    }
}
