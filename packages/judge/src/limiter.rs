use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Counting resource bounding in-flight Execution Service calls across all
/// submissions judged by this process.
///
/// Cloning shares the same underlying counter. Acquiring a permit and
/// dropping (or releasing) it are the only operations that mutate it.
#[derive(Debug, Clone)]
pub struct DispatchLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Slot held for the duration of one Execution Service call.
#[derive(Debug)]
pub struct DispatchPermit {
    _permit: OwnedSemaphorePermit,
}

impl DispatchPermit {
    pub fn release(self) {}
}

impl DispatchLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<DispatchPermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        Ok(DispatchPermit { _permit: permit })
    }

    pub fn try_acquire(&self) -> Option<DispatchPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| DispatchPermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}
