use std::collections::VecDeque;

use crate::error::DiskError;

use super::request::Request;

/// Pending requests in arrival order.
///
/// Policies scan the whole queue and pull out whichever entry they pick, so
/// only FCFS relies on the order itself.
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: VecDeque<Request>,
    // Caps growth so allocation failure can be exercised.
    limit: Option<usize>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            limit: None,
        }
    }

    /// A queue that refuses to grow past `limit` entries.
    #[cfg(test)]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: Some(limit),
        }
    }

    pub fn insert(&mut self, request: Request) {
        self.entries.push_back(request);
    }

    /// Appends `request` unless the queue cannot grow. On failure the request
    /// is dropped and nothing is queued.
    pub fn try_insert(&mut self, request: Request) -> Result<(), DiskError> {
        if self.limit.map_or(false, |limit| self.entries.len() >= limit) {
            return Err(DiskError::Allocation);
        }
        self.entries
            .try_reserve(1)
            .map_err(|_| DiskError::Allocation)?;
        self.entries.push_back(request);
        Ok(())
    }

    /// Takes the entry at `index`, as returned by the scheduler.
    pub fn remove_selected(&mut self, index: usize) -> Option<Request> {
        self.entries.remove(index)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> + '_ {
        self.entries.iter()
    }

    pub fn blocks(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(Request::block)
    }
}
