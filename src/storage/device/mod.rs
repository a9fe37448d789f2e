pub mod sim;

use std::fmt;

use crate::{
    error::DeviceError,
    storage::disk::{request::BlockBuffer, signal::CompletionSignal},
};

/// Command sent to a block device.
pub enum DiskCmd {
    Init,
    DiskSize,
    BlockSize,
    Read { block: u64, buffer: BlockBuffer },
    Write { block: u64, buffer: BlockBuffer },
}

impl fmt::Debug for DiskCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskCmd::Init => write!(f, "Init"),
            DiskCmd::DiskSize => write!(f, "DiskSize"),
            DiskCmd::BlockSize => write!(f, "BlockSize"),
            DiskCmd::Read { block, .. } => write!(f, "Read({})", block),
            DiskCmd::Write { block, .. } => write!(f, "Write({})", block),
        }
    }
}

/// Driver interface of a block device.
///
/// `Init`, `DiskSize` and `BlockSize` answer synchronously. `Read` and `Write`
/// return as soon as the device accepted them; the device raises the
/// registered [`CompletionSignal`] once the transfer is done.
pub trait BlockDevice: Send + Sync {
    fn disk_cmd(&self, cmd: DiskCmd) -> Result<usize, DeviceError>;

    fn register_completion(&self, signal: CompletionSignal) -> Result<(), DeviceError>;
}
