use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{storage::device::DiskCmd, task::Tid};

use super::completion::{io_pair, IoFuture, Wakeup};

/// Caller-owned block buffer. The manager only ever clones the handle.
pub type BlockBuffer = Arc<Mutex<Box<[u8]>>>;

pub fn block_buffer(size: usize) -> BlockBuffer {
    Arc::new(Mutex::new(vec![0u8; size].into_boxed_slice()))
}

pub fn buffer_len(buffer: &BlockBuffer) -> usize {
    buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// What hooks get to see of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestInfo {
    pub id: RequestId,
    pub operation: Operation,
    pub block: u64,
    pub task: Tid,
}

// A pending read or write. Dropping it without `resume` wakes the owner with an error.
pub struct Request {
    id: RequestId,
    operation: Operation,
    block: u64,
    buffer: BlockBuffer,
    task: Tid,
    wakeup: Wakeup,
}

impl Request {
    pub fn new(
        id: RequestId,
        operation: Operation,
        block: u64,
        buffer: BlockBuffer,
        task: Tid,
    ) -> (Self, IoFuture) {
        let (wakeup, future) = io_pair();
        let request = Self {
            id,
            operation,
            block,
            buffer,
            task,
            wakeup,
        };
        (request, future)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn task(&self) -> Tid {
        self.task
    }

    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            id: self.id,
            operation: self.operation,
            block: self.block,
            task: self.task,
        }
    }

    pub fn command(&self) -> DiskCmd {
        let buffer = Arc::clone(&self.buffer);
        match self.operation {
            Operation::Read => DiskCmd::Read {
                block: self.block,
                buffer,
            },
            Operation::Write => DiskCmd::Write {
                block: self.block,
                buffer,
            },
        }
    }

    /// Wakes the owning task and destroys the request.
    pub fn resume(self) -> bool {
        self.wakeup.resume()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("block", &self.block)
            .field("task", &self.task)
            .finish()
    }
}
