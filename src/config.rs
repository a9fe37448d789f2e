use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

pub const DEFAULT_NUM_BLOCKS: usize = 256;
pub const DEFAULT_BLOCK_SIZE: usize = 64;

// Fixed cost of every command plus the cost of moving the head by one block.
pub const DEFAULT_BASE_LATENCY: Duration = Duration::from_micros(500);
pub const DEFAULT_SEEK_LATENCY: Duration = Duration::from_micros(20);

pub const ENV_NUM_BLOCKS: &str = "DISK_NUM_BLOCKS";
pub const ENV_BLOCK_SIZE: &str = "DISK_BLOCK_SIZE";
pub const ENV_BASE_LATENCY_US: &str = "DISK_BASE_LATENCY_US";
pub const ENV_SEEK_LATENCY_US: &str = "DISK_SEEK_LATENCY_US";
pub const ENV_IMAGE: &str = "DISK_IMAGE";

/// Geometry and timing of a simulated disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskOptions {
    pub num_blocks: usize,
    pub block_size: usize,
    pub base_latency: Duration,
    pub seek_latency: Duration,
    // Backing image file. The disk lives in memory when unset.
    pub image: Option<PathBuf>,
}

impl Default for DiskOptions {
    fn default() -> Self {
        Self {
            num_blocks: DEFAULT_NUM_BLOCKS,
            block_size: DEFAULT_BLOCK_SIZE,
            base_latency: DEFAULT_BASE_LATENCY,
            seek_latency: DEFAULT_SEEK_LATENCY,
            image: None,
        }
    }
}

impl DiskOptions {
    /// Defaults overridden by the `DISK_*` environment variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();

        if let Some(value) = parse::<usize>(&lookup, ENV_NUM_BLOCKS)? {
            options.num_blocks = value;
        }
        if let Some(value) = parse::<usize>(&lookup, ENV_BLOCK_SIZE)? {
            options.block_size = value;
        }
        if let Some(value) = parse::<u64>(&lookup, ENV_BASE_LATENCY_US)? {
            options.base_latency = Duration::from_micros(value);
        }
        if let Some(value) = parse::<u64>(&lookup, ENV_SEEK_LATENCY_US)? {
            options.seek_latency = Duration::from_micros(value);
        }
        if let Some(path) = lookup(ENV_IMAGE) {
            options.image = Some(PathBuf::from(path));
        }

        Ok(options)
    }

    /// Same geometry, no artificial latency.
    pub fn instant(mut self) -> Self {
        self.base_latency = Duration::ZERO;
        self.seek_latency = Duration::ZERO;
        self
    }

    pub fn latency_for(&self, distance: u64) -> Duration {
        let distance = u32::try_from(distance).unwrap_or(u32::MAX);
        self.base_latency + self.seek_latency.saturating_mul(distance)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value {:?} for {}", raw, key))
        })
        .transpose()
}
