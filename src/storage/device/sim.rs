use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{ensure, Context};
use log::{debug, error, trace};

use crate::{
    config::DiskOptions,
    error::DeviceError,
    storage::disk::{request::BlockBuffer, request::Operation, signal::CompletionSignal},
};

use super::{BlockDevice, DiskCmd};

// Where the blocks live.
enum Storage {
    Memory(Vec<u8>),
    File(File),
}

impl Storage {
    fn open(options: &DiskOptions) -> anyhow::Result<Self> {
        let len = options
            .num_blocks
            .checked_mul(options.block_size)
            .context("disk size overflows")?;

        match &options.image {
            None => Ok(Storage::Memory(vec![0u8; len])),
            Some(path) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)
                    .with_context(|| format!("failed to open disk image {}", path.display()))?;
                file.set_len(len as u64)
                    .with_context(|| format!("failed to size disk image {}", path.display()))?;
                Ok(Storage::File(file))
            }
        }
    }

    fn read_block(&mut self, block: u64, block_size: usize, buf: &mut [u8]) -> anyhow::Result<()> {
        ensure!(buf.len() >= block_size, "buffer smaller than a block");
        let offset = block as usize * block_size;

        match self {
            Storage::Memory(data) => {
                buf[..block_size].copy_from_slice(&data[offset..offset + block_size]);
            }
            Storage::File(file) => {
                file.seek(SeekFrom::Start(offset as u64))
                    .with_context(|| format!("seek to block {} failed", block))?;
                file.read_exact(&mut buf[..block_size])
                    .with_context(|| format!("read of block {} failed", block))?;
            }
        }
        Ok(())
    }

    fn write_block(&mut self, block: u64, block_size: usize, buf: &[u8]) -> anyhow::Result<()> {
        ensure!(buf.len() >= block_size, "buffer smaller than a block");
        let offset = block as usize * block_size;

        match self {
            Storage::Memory(data) => {
                data[offset..offset + block_size].copy_from_slice(&buf[..block_size]);
            }
            Storage::File(file) => {
                file.seek(SeekFrom::Start(offset as u64))
                    .with_context(|| format!("seek to block {} failed", block))?;
                file.write_all(&buf[..block_size])
                    .with_context(|| format!("write of block {} failed", block))?;
                file.flush()
                    .with_context(|| format!("flush of block {} failed", block))?;
            }
        }
        Ok(())
    }
}

struct Job {
    operation: Operation,
    block: u64,
    buffer: BlockBuffer,
    latency: Duration,
}

struct SimShared {
    options: DiskOptions,
    storage: Mutex<Option<Storage>>,
    busy: AtomicBool,
    head: AtomicU64,
    signal: Mutex<Option<CompletionSignal>>,
    served: AtomicU64,
}

impl SimShared {
    fn storage(&self) -> std::sync::MutexGuard<'_, Option<Storage>> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, job: Job) {
        if !job.latency.is_zero() {
            thread::sleep(job.latency);
        }

        let block_size = self.options.block_size;
        let result = {
            let mut storage = self.storage();
            let mut buffer = job.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            match storage.as_mut() {
                Some(storage) => match job.operation {
                    Operation::Read => storage.read_block(job.block, block_size, &mut buffer),
                    Operation::Write => storage.write_block(job.block, block_size, &buffer),
                },
                None => Err(anyhow::anyhow!("disk storage is gone")),
            }
        };

        if let Err(err) = result {
            error!("simulated disk {} of block {} failed: {:#}", job.operation, job.block, err);
        } else {
            trace!("simulated disk {} of block {} done", job.operation, job.block);
        }

        self.served.fetch_add(1, Ordering::Relaxed);
        self.busy.store(false, Ordering::Release);

        let signal = self
            .signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(signal) = signal {
            signal.raise();
        }
    }
}

/// A disk that executes one command at a time on a worker thread and raises
/// the completion signal when each transfer is done.
pub struct SimulatedDisk {
    shared: Arc<SimShared>,
    jobs: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedDisk {
    pub fn new(options: DiskOptions) -> Self {
        Self {
            shared: Arc::new(SimShared {
                options,
                storage: Mutex::new(None),
                busy: AtomicBool::new(false),
                head: AtomicU64::new(0),
                signal: Mutex::new(None),
                served: AtomicU64::new(0),
            }),
            jobs: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &DiskOptions {
        &self.shared.options
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Number of transfers carried out so far.
    pub fn served(&self) -> u64 {
        self.shared.served.load(Ordering::Relaxed)
    }

    /// Copy of a block, read directly from storage.
    pub fn peek_block(&self, block: u64) -> Result<Vec<u8>, DeviceError> {
        self.check_block(block)?;
        let block_size = self.shared.options.block_size;
        let mut data = vec![0u8; block_size];
        let mut storage = self.shared.storage();
        let storage = storage.as_mut().ok_or(DeviceError::NotInitialized)?;
        storage.read_block(block, block_size, &mut data)?;
        Ok(data)
    }

    /// Overwrites a block directly in storage, bypassing the command interface.
    pub fn poke_block(&self, block: u64, data: &[u8]) -> Result<(), DeviceError> {
        self.check_block(block)?;
        let mut storage = self.shared.storage();
        let storage = storage.as_mut().ok_or(DeviceError::NotInitialized)?;
        storage.write_block(block, self.shared.options.block_size, data)?;
        Ok(())
    }

    fn check_block(&self, block: u64) -> Result<(), DeviceError> {
        if block >= self.shared.options.num_blocks as u64 {
            return Err(DeviceError::BlockOutOfRange(block));
        }
        Ok(())
    }

    fn initialized(&self) -> bool {
        self.shared.storage().is_some()
    }

    fn init(&self) -> Result<usize, DeviceError> {
        let options = &self.shared.options;
        if options.num_blocks == 0 || options.block_size == 0 {
            return Err(DeviceError::InvalidGeometry {
                num_blocks: options.num_blocks,
                block_size: options.block_size,
            });
        }

        {
            let mut storage = self.shared.storage();
            if storage.is_some() {
                return Ok(0);
            }
            *storage = Some(Storage::open(options)?);
        }

        let (tx, rx) = mpsc::channel();
        *self.jobs.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(self.start_worker(rx));

        debug!(
            "simulated disk ready: {} blocks of {} bytes",
            options.num_blocks, options.block_size
        );
        Ok(0)
    }

    fn start_worker(&self, rx: Receiver<Job>) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                shared.run(job);
            }
        })
    }

    fn submit(&self, operation: Operation, block: u64, buffer: BlockBuffer) -> Result<usize, DeviceError> {
        if !self.initialized() {
            return Err(DeviceError::NotInitialized);
        }
        self.check_block(block)?;

        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DeviceError::Busy);
        }

        let from = self.shared.head.swap(block, Ordering::AcqRel);
        let job = Job {
            operation,
            block,
            buffer,
            latency: self.shared.options.latency_for(from.abs_diff(block)),
        };

        let sent = match self.jobs.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };

        if !sent {
            self.shared.busy.store(false, Ordering::Release);
            return Err(DeviceError::Disconnected);
        }
        Ok(0)
    }
}

impl BlockDevice for SimulatedDisk {
    fn disk_cmd(&self, cmd: DiskCmd) -> Result<usize, DeviceError> {
        match cmd {
            DiskCmd::Init => self.init(),
            DiskCmd::DiskSize if self.initialized() => Ok(self.shared.options.num_blocks),
            DiskCmd::BlockSize if self.initialized() => Ok(self.shared.options.block_size),
            DiskCmd::DiskSize | DiskCmd::BlockSize => Err(DeviceError::NotInitialized),
            DiskCmd::Read { block, buffer } => self.submit(Operation::Read, block, buffer),
            DiskCmd::Write { block, buffer } => self.submit(Operation::Write, block, buffer),
        }
    }

    fn register_completion(&self, signal: CompletionSignal) -> Result<(), DeviceError> {
        let mut slot = self.shared.signal.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(DeviceError::AlreadyRegistered);
        }
        *slot = Some(signal);
        Ok(())
    }
}

impl Drop for SimulatedDisk {
    fn drop(&mut self) {
        // Closing the channel stops the worker after its current job.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = worker.join();
        }
    }
}
