use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::sync::Semaphore;

/// Raised by the device when the in-flight command finishes.
///
/// It only flips the free flag and posts one unit of work; the server loop
/// does the bookkeeping under the manager lock.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    free: Arc<AtomicBool>,
    work: Semaphore,
}

impl CompletionSignal {
    pub(crate) fn new(free: Arc<AtomicBool>, work: Semaphore) -> Self {
        Self { free, work }
    }

    pub fn raise(&self) {
        self.free.store(true, Ordering::Release);
        self.work.up();
    }
}
