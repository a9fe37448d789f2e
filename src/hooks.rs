//! Observation points around the request lifecycle.
//!
//! Hooks run inside the submission path and the server loop, sometimes with
//! the manager lock held. They must not block and cannot change any outcome.

use crossbeam_queue::SegQueue;

use crate::storage::disk::request::RequestInfo;

pub trait DiskHooks: Send + Sync {
    fn on_submit(&self, _request: &RequestInfo) {}

    /// The head moved from `from` to the request's block.
    fn on_dispatch(&self, _request: &RequestInfo, _from: u64) {}

    fn on_complete(&self, _request: &RequestInfo) {}

    fn on_stop(&self, _travel: u64) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl DiskHooks for NoHooks {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskEvent {
    Submitted(RequestInfo),
    Dispatched { request: RequestInfo, from: u64 },
    Completed(RequestInfo),
    Stopped { travel: u64 },
}

/// Records every event in order.
#[derive(Debug, Default)]
pub struct TraceHooks {
    events: SegQueue<DiskEvent>,
}

impl TraceHooks {
    pub fn new() -> Self {
        Self {
            events: SegQueue::new(),
        }
    }

    pub fn drain(&self) -> Vec<DiskEvent> {
        let mut events = Vec::with_capacity(self.events.len());
        while let Some(event) = self.events.pop() {
            events.push(event);
        }
        events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl DiskHooks for TraceHooks {
    fn on_submit(&self, request: &RequestInfo) {
        self.events.push(DiskEvent::Submitted(*request));
    }

    fn on_dispatch(&self, request: &RequestInfo, from: u64) {
        self.events.push(DiskEvent::Dispatched {
            request: *request,
            from,
        });
    }

    fn on_complete(&self, request: &RequestInfo) {
        self.events.push(DiskEvent::Completed(*request));
    }

    fn on_stop(&self, travel: u64) {
        self.events.push(DiskEvent::Stopped { travel });
    }
}

/// Blocks in dispatch order.
pub fn dispatched_blocks(events: &[DiskEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            DiskEvent::Dispatched { request, .. } => Some(request.block),
            _ => None,
        })
        .collect()
}
