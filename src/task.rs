//! Cooperative task host.
//!
//! Tasks are tokio tasks; on a current-thread runtime only one of them runs at a
//! time and control changes hands only at `.await` points. Every task spawned
//! through a [`Host`] carries its own [`Tid`], everything else counts as the
//! main task.

use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tokio::task::{JoinError, JoinHandle};

tokio::task_local! {
    static CURRENT_TASK: Tid;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(u64);

impl Tid {
    pub const MAIN: Tid = Tid(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:02}", self.0)
    }
}

/// The task currently executing.
pub fn current() -> Tid {
    CURRENT_TASK.try_with(|tid| *tid).unwrap_or(Tid::MAIN)
}

type ExitListener = Box<dyn FnOnce() + Send>;

struct HostInner {
    next_tid: AtomicU64,
    main_terminated: AtomicBool,
    exit_listeners: Mutex<Vec<ExitListener>>,
}

#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl Host {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HostInner {
                next_tid: AtomicU64::new(1),
                main_terminated: AtomicBool::new(false),
                exit_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawns `future` as a new task. Must be called from inside a tokio runtime.
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let tid = Tid(self.inner.next_tid.fetch_add(1, Ordering::SeqCst));
        let join = tokio::spawn(CURRENT_TASK.scope(tid, future));
        TaskHandle { tid, join }
    }

    pub fn main_terminated(&self) -> bool {
        self.inner.main_terminated.load(Ordering::Acquire)
    }

    /// Marks the main task as terminated and runs the exit listeners once.
    pub fn exit_main(&self) {
        if self.inner.main_terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        let listeners: Vec<ExitListener> = {
            let mut guard = self
                .inner
                .exit_listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };

        for listener in listeners {
            listener();
        }
    }

    /// Runs `listener` when the main task terminates, or right away if it already has.
    pub fn on_main_exit(&self, listener: impl FnOnce() + Send + 'static) {
        let mut guard = self
            .inner
            .exit_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.main_terminated() {
            drop(guard);
            listener();
        } else {
            guard.push(Box::new(listener));
        }
    }
}

pub struct TaskHandle<T> {
    tid: Tid,
    join: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn abort(&self) {
        self.join.abort();
    }

    /// Waits for the task to exit.
    pub async fn join(self) -> Result<T, JoinError> {
        self.join.await
    }
}
