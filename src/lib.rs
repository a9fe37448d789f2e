pub mod config;
pub mod error;
pub mod hooks;
pub mod storage;
pub mod sync;
pub mod task;

mod tests;

pub use config::DiskOptions;
pub use error::{DeviceError, DiskError};
pub use storage::{
    device::{sim::SimulatedDisk, BlockDevice, DiskCmd},
    disk::{
        manager::{DiskManager, DiskManagerBuilder, Geometry},
        request::{block_buffer, BlockBuffer, Operation},
        scheduler::Policy,
        signal::CompletionSignal,
    },
};
pub use task::{Host, Tid};
