use thiserror::Error;

/// Errors reported by the disk manager to the initializer or to a submitting task.
#[derive(Debug, Error)]
pub enum DiskError {
    /// The device could not be initialized or reported an unusable geometry.
    #[error("disk initialization failed: {0}")]
    DeviceInit(#[source] DeviceError),

    #[error("failed to create disk synchronization primitive (initial count {initial})")]
    SyncInit { initial: usize },

    /// Registering the completion notification with the device failed.
    #[error("failed to register disk completion signal: {0}")]
    SignalInit(#[source] DeviceError),

    #[error("could not allocate a disk request")]
    Allocation,

    #[error("block {block} is outside of the disk (0..{num_blocks})")]
    InvalidBlock { block: u64, num_blocks: usize },

    #[error("buffer of {len} bytes cannot hold a block of {block_size} bytes")]
    BufferTooSmall { len: usize, block_size: usize },

    /// The server loop went away before the request was serviced.
    #[error("disk manager stopped")]
    Stopped,
}

/// Errors returned by a device for a single command.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device is busy")]
    Busy,

    #[error("device has not been initialized")]
    NotInitialized,

    #[error("block {0} is out of range")]
    BlockOutOfRange(u64),

    #[error("invalid geometry: {num_blocks} blocks of {block_size} bytes")]
    InvalidGeometry { num_blocks: usize, block_size: usize },

    #[error("completion signal already registered")]
    AlreadyRegistered,

    #[error("device worker is gone")]
    Disconnected,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
