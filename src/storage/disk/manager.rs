use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use log::{debug, error, info, trace, warn};
use tokio::sync::Mutex;

use crate::{
    error::{DeviceError, DiskError},
    hooks::{DiskHooks, NoHooks},
    storage::device::{BlockDevice, DiskCmd},
    sync::Semaphore,
    task::{self, Host, TaskHandle},
};

use super::{
    queue::RequestQueue,
    request::{buffer_len, BlockBuffer, Operation, Request, RequestId},
    scheduler::{self, Policy},
    signal::CompletionSignal,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub num_blocks: usize,
    pub block_size: usize,
}

// Everything the manager lock protects.
struct DiskState {
    queue: RequestQueue,
    in_flight: Option<Request>,
    head: u64,
    policy: Policy,
    // Set by the server loop on its way out; nothing is queued after that.
    stopped: bool,
}

impl DiskState {
    // Marks the loop gone and abandons anything it can no longer serve.
    fn shut_down(&mut self) {
        self.stopped = true;
        let abandoned = self.queue.size() + usize::from(self.in_flight.take().is_some());
        self.queue = RequestQueue::new();
        if abandoned > 0 {
            warn!("disk server loop stopped with {} requests outstanding", abandoned);
        }
    }
}

struct Shared {
    geometry: Geometry,
    state: Mutex<DiskState>,
    // Posted once per submission and once per completion.
    work: Semaphore,
    // Cleared on dispatch, set again by the completion signal.
    free: Arc<AtomicBool>,
    // Written under the lock, read without it.
    travel: AtomicU64,
    next_request: AtomicU64,
    device: Arc<dyn BlockDevice>,
    host: Host,
    hooks: Arc<dyn DiskHooks>,
}

impl Shared {
    fn is_free(&self) -> bool {
        self.free.load(Ordering::Acquire)
    }

    fn signal(&self) -> CompletionSignal {
        CompletionSignal::new(Arc::clone(&self.free), self.work.clone())
    }
}

pub struct DiskManagerBuilder {
    device: Arc<dyn BlockDevice>,
    host: Host,
    hooks: Arc<dyn DiskHooks>,
}

impl DiskManagerBuilder {
    pub fn host(mut self, host: Host) -> Self {
        self.host = host;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn DiskHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Brings the device up and starts the server loop.
    /// Must run inside a tokio runtime, before any read or write.
    pub async fn init(self) -> Result<DiskManager, DiskError> {
        let device = self.device;

        device.disk_cmd(DiskCmd::Init).map_err(DiskError::DeviceInit)?;
        let num_blocks = device.disk_cmd(DiskCmd::DiskSize).map_err(DiskError::DeviceInit)?;
        let block_size = device.disk_cmd(DiskCmd::BlockSize).map_err(DiskError::DeviceInit)?;
        if num_blocks == 0 || block_size == 0 {
            return Err(DiskError::DeviceInit(DeviceError::InvalidGeometry {
                num_blocks,
                block_size,
            }));
        }

        let work = Semaphore::create(0)?;

        let shared = Arc::new(Shared {
            geometry: Geometry {
                num_blocks,
                block_size,
            },
            state: Mutex::new(DiskState {
                queue: RequestQueue::new(),
                in_flight: None,
                head: 0,
                policy: Policy::Fcfs,
                stopped: false,
            }),
            work,
            free: Arc::new(AtomicBool::new(true)),
            travel: AtomicU64::new(0),
            next_request: AtomicU64::new(0),
            device,
            host: self.host,
            hooks: self.hooks,
        });

        let server = shared.host.spawn(serve(Arc::clone(&shared)));

        if let Err(err) = shared.device.register_completion(shared.signal()) {
            server.abort();
            return Err(DiskError::SignalInit(err));
        }

        // The loop has to look at the queue again once main is gone.
        let work = shared.work.clone();
        shared.host.on_main_exit(move || work.up());

        info!(
            "disk manager started: {} blocks of {} bytes, server task {}",
            num_blocks,
            block_size,
            server.tid()
        );

        Ok(DiskManager {
            shared,
            server: Mutex::new(Some(server)),
        })
    }
}

/// Front end of the disk: queues requests from tasks and hands them to the
/// server loop, which owns the device.
pub struct DiskManager {
    shared: Arc<Shared>,
    server: Mutex<Option<TaskHandle<()>>>,
}

impl DiskManager {
    pub fn builder(device: Arc<dyn BlockDevice>) -> DiskManagerBuilder {
        DiskManagerBuilder {
            device,
            host: Host::new(),
            hooks: Arc::new(NoHooks),
        }
    }

    pub async fn init(device: Arc<dyn BlockDevice>, host: Host) -> Result<DiskManager, DiskError> {
        Self::builder(device).host(host).init().await
    }

    /// Reads `block` into `buffer`, suspending the calling task until done.
    pub async fn read(&self, block: u64, buffer: &BlockBuffer) -> Result<(), DiskError> {
        self.submit(Operation::Read, block, buffer).await
    }

    /// Writes `buffer` to `block`, suspending the calling task until done.
    pub async fn write(&self, block: u64, buffer: &BlockBuffer) -> Result<(), DiskError> {
        self.submit(Operation::Write, block, buffer).await
    }

    async fn submit(&self, operation: Operation, block: u64, buffer: &BlockBuffer) -> Result<(), DiskError> {
        let geometry = self.shared.geometry;
        if block >= geometry.num_blocks as u64 {
            return Err(DiskError::InvalidBlock {
                block,
                num_blocks: geometry.num_blocks,
            });
        }
        let len = buffer_len(buffer);
        if len < geometry.block_size {
            return Err(DiskError::BufferTooSmall {
                len,
                block_size: geometry.block_size,
            });
        }

        let id = RequestId(self.shared.next_request.fetch_add(1, Ordering::Relaxed));
        let (request, done) = Request::new(id, operation, block, Arc::clone(buffer), task::current());
        let info = request.info();

        {
            let mut state = self.shared.state.lock().await;
            if state.stopped {
                return Err(DiskError::Stopped);
            }
            state.queue.try_insert(request)?;
        }
        self.shared.hooks.on_submit(&info);
        trace!("{} queued {} of block {} ({:?})", info.task, operation, block, id);

        self.shared.work.up();
        done.await
    }

    /// Takes effect at the next dispatch.
    pub async fn set_policy(&self, policy: Policy) {
        let mut state = self.shared.state.lock().await;
        if state.policy != policy {
            debug!("disk scheduling policy {} -> {}", state.policy, policy);
        }
        state.policy = policy;
    }

    pub async fn policy(&self) -> Policy {
        self.shared.state.lock().await.policy
    }

    pub async fn reset_travel(&self) {
        let _state = self.shared.state.lock().await;
        self.shared.travel.store(0, Ordering::Release);
    }

    /// Blocks travelled by the head since start or the last reset.
    pub fn travel(&self) -> u64 {
        self.shared.travel.load(Ordering::Acquire)
    }

    pub fn num_blocks(&self) -> usize {
        self.shared.geometry.num_blocks
    }

    pub fn block_size(&self) -> usize {
        self.shared.geometry.block_size
    }

    pub fn geometry(&self) -> Geometry {
        self.shared.geometry
    }

    /// Requests waiting for dispatch.
    pub async fn pending(&self) -> usize {
        self.shared.state.lock().await.queue.size()
    }

    pub async fn head_position(&self) -> u64 {
        self.shared.state.lock().await.head
    }

    pub async fn is_running(&self) -> bool {
        match self.server.lock().await.as_ref() {
            Some(server) => !server.is_finished(),
            None => false,
        }
    }

    /// Waits for the server loop to terminate.
    pub async fn stopped(&self) {
        let server = self.server.lock().await.take();
        if let Some(server) = server {
            if let Err(err) = server.join().await {
                warn!("disk server task ended abnormally: {}", err);
            }
        }
    }
}

async fn serve(shared: Arc<Shared>) {
    debug!("disk server loop running as {}", task::current());

    loop {
        if let Err(err) = shared.work.down().await {
            error!("disk work semaphore failed: {}", err);
            shared.state.lock().await.shut_down();
            break;
        }

        let mut state = shared.state.lock().await;
        handle_completion(&shared, &mut state);
        dispatch(&shared, &mut state);

        if shared.host.main_terminated() && state.queue.is_empty() && state.in_flight.is_none() {
            state.shut_down();
            break;
        }
    }

    let travel = shared.travel.load(Ordering::Acquire);
    shared.hooks.on_stop(travel);
    info!("disk server loop stopped, head travelled {} blocks", travel);
}

fn handle_completion(shared: &Shared, state: &mut DiskState) {
    if !shared.is_free() {
        return;
    }

    if let Some(request) = state.in_flight.take() {
        let info = request.info();
        shared.hooks.on_complete(&info);
        if !request.resume() {
            warn!("{:?} had already been resumed", info.id);
        }
        trace!("{} resumed after {} of block {}", info.task, info.operation, info.block);
    }
}

fn dispatch(shared: &Shared, state: &mut DiskState) {
    if !shared.is_free() || state.queue.is_empty() {
        return;
    }

    let Some(index) = scheduler::select_next(&state.queue, state.head, state.policy) else {
        return;
    };
    let Some(request) = state.queue.remove_selected(index) else {
        return;
    };

    shared.free.store(false, Ordering::Release);

    let from = state.head;
    let distance = from.abs_diff(request.block());
    shared.travel.fetch_add(distance, Ordering::AcqRel);
    state.head = request.block();

    let info = request.info();
    let cmd = request.command();
    state.in_flight = Some(request);
    shared.hooks.on_dispatch(&info, from);
    trace!(
        "dispatching {} of block {} for {} ({}, head {} -> {})",
        info.operation,
        info.block,
        info.task,
        state.policy,
        from,
        info.block
    );

    if let Err(err) = shared.device.disk_cmd(cmd) {
        // No completion will come for this command; finish it as if one had.
        error!("device rejected {} of block {}: {}", info.operation, info.block, err);
        shared.signal().raise();
    }
}
