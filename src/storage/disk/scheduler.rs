use std::{fmt, str::FromStr};

use super::queue::RequestQueue;

/// Disk-head scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// First come, first served.
    #[default]
    Fcfs,
    /// Shortest seek time first.
    Sstf,
    /// Circular scan towards higher blocks, wrapping to the lowest pending block.
    CScan,
}

impl Policy {
    pub const ALL: [Policy; 3] = [Policy::Fcfs, Policy::Sstf, Policy::CScan];

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Fcfs => "fcfs",
            Policy::Sstf => "sstf",
            Policy::CScan => "cscan",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fcfs" => Ok(Policy::Fcfs),
            "sstf" => Ok(Policy::Sstf),
            "cscan" | "c-scan" => Ok(Policy::CScan),
            other => Err(format!("unknown scheduling policy {:?}", other)),
        }
    }
}

impl TryFrom<u8> for Policy {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Policy::Fcfs),
            1 => Ok(Policy::Sstf),
            2 => Ok(Policy::CScan),
            other => Err(other),
        }
    }
}

/// Index in `queue` of the next request to dispatch, or `None` if it is empty.
pub fn select_next(queue: &RequestQueue, head: u64, policy: Policy) -> Option<usize> {
    pick(queue.blocks(), head, policy)
}

/// Same selection over plain block numbers in arrival order.
/// Ties go to the earliest entry.
pub fn pick(blocks: impl IntoIterator<Item = u64>, head: u64, policy: Policy) -> Option<usize> {
    let mut blocks = blocks.into_iter().enumerate().peekable();
    blocks.peek()?;

    match policy {
        Policy::Fcfs => Some(0),
        Policy::Sstf => shortest_seek(blocks, head),
        Policy::CScan => circular_scan(blocks, head),
    }
}

fn shortest_seek(blocks: impl Iterator<Item = (usize, u64)>, head: u64) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;

    for (index, block) in blocks {
        let distance = block.abs_diff(head);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((index, distance)),
        }
    }

    best.map(|(index, _)| index)
}

fn circular_scan(blocks: impl Iterator<Item = (usize, u64)>, head: u64) -> Option<usize> {
    // Nearest block at or ahead of the head
    let mut ahead: Option<(usize, u64)> = None;
    // Lowest block overall, used when nothing is ahead
    let mut lowest: Option<(usize, u64)> = None;

    for (index, block) in blocks {
        if block >= head {
            let distance = block - head;
            match ahead {
                Some((_, best)) if distance >= best => {}
                _ => ahead = Some((index, distance)),
            }
        }

        match lowest {
            Some((_, min)) if block >= min => {}
            _ => lowest = Some((index, block)),
        }
    }

    ahead.or(lowest).map(|(index, _)| index)
}
