use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context, Poll, Waker},
};

use crate::error::DiskError;

// State of the rendezvous between a suspended caller and the server loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoStatus {
    Pending = 0,   // Caller is suspended
    Resumed = 1,   // Server loop resumed the caller
    Abandoned = 2, // Request dropped without being serviced
}

impl IoStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IoStatus::Resumed,
            2 => IoStatus::Abandoned,
            _ => IoStatus::Pending,
        }
    }
}

struct IoSlot {
    status: AtomicU8,
    waker: Mutex<Option<Waker>>,
}

/// The caller's side: resolves once the owning request has been completed.
pub struct IoFuture {
    slot: Arc<IoSlot>,
}

/// The request's side: resumes the caller at most once.
pub struct Wakeup {
    slot: Arc<IoSlot>,
}

pub fn io_pair() -> (Wakeup, IoFuture) {
    let slot = Arc::new(IoSlot {
        status: AtomicU8::new(IoStatus::Pending as u8),
        waker: Mutex::new(None),
    });

    (
        Wakeup {
            slot: Arc::clone(&slot),
        },
        IoFuture { slot },
    )
}

impl Wakeup {
    /// Returns false if the caller had already been resumed or abandoned.
    pub fn resume(&self) -> bool {
        self.finish(IoStatus::Resumed)
    }

    fn finish(&self, status: IoStatus) -> bool {
        let swapped = self
            .slot
            .status
            .compare_exchange(
                IoStatus::Pending as u8,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if swapped {
            let waker = self
                .slot
                .waker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(waker) = waker {
                waker.wake();
            }
        }

        swapped
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        self.finish(IoStatus::Abandoned);
    }
}

impl IoFuture {
    fn status(&self) -> IoStatus {
        IoStatus::from_u8(self.slot.status.load(Ordering::Acquire))
    }

    fn ready(status: IoStatus) -> Poll<Result<(), DiskError>> {
        match status {
            IoStatus::Resumed => Poll::Ready(Ok(())),
            IoStatus::Abandoned => Poll::Ready(Err(DiskError::Stopped)),
            IoStatus::Pending => Poll::Pending,
        }
    }
}

impl Future for IoFuture {
    type Output = Result<(), DiskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Poll::Ready(result) = Self::ready(self.status()) {
            return Poll::Ready(result);
        }

        {
            let mut waker_guard = self
                .slot
                .waker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *waker_guard = Some(cx.waker().clone());
        }

        // The wakeup may have fired between the first check and storing the waker.
        Self::ready(self.status())
    }
}
