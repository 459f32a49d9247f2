//! Machine-specific memory and parallelism budget for batch launches.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

/// Memory assumed per concurrently running batch task when nothing else is configured.
pub const DEFAULT_TASK_SIZE_MB: u64 = 512;

/// Assumed memory on hosts where it cannot be measured: 16GB total minus 2GB for the OS.
pub const FALLBACK_AVAILABLE_MB: u64 = 14 * 1024;

/// Where `available_memory_mb` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Override,
    Detected,
    Fallback,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Override => "override",
            MemorySource::Detected => "detected",
            MemorySource::Fallback => "fallback",
        }
    }
}

/// Computed once per invocation and passed by value into graph synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceBudget {
    pub available_memory_mb: u64,
    pub task_size_mb: u64,
    pub cpu_count: u64,
    pub parallelism: u64,
    pub source: MemorySource,
}

impl ResourceBudget {
    /// Heap handed to each batch launch: never more than what all cores could use at once.
    pub fn batch_heap_mb(&self) -> u64 {
        self.available_memory_mb
            .min(self.cpu_count.saturating_mul(self.task_size_mb))
    }
}

pub fn parallelism(cpu_count: u64, available_memory_mb: u64, task_size_mb: u64) -> u64 {
    cpu_count.min(available_memory_mb / task_size_mb).max(1)
}

/// Source of the kernel's "available memory" figure, in kilobytes.
pub trait MemoryProbe {
    fn available_kb(&self) -> Result<u64>;
}

/// Reads `MemAvailable` from a meminfo-formatted file (normally `/proc/meminfo`).
#[derive(Debug, Clone)]
pub struct ProcMeminfo {
    path: PathBuf,
}

impl ProcMeminfo {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self::new("/proc/meminfo")
    }
}

impl MemoryProbe for ProcMeminfo {
    fn available_kb(&self) -> Result<u64> {
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            Error::Config(format!(
                "cannot read memory information from {}: {}",
                self.path.display(),
                e
            ))
        })?;
        parse_mem_available(&raw)
    }
}

fn parse_mem_available(meminfo: &str) -> Result<u64> {
    let line = meminfo
        .lines()
        .find(|l| l.starts_with("MemAvailable"))
        .ok_or_else(|| Error::Config("MemAvailable not reported by the host".to_string()))?;
    let digits: String = line
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u64>().map_err(|_| {
        Error::Config(format!(
            "non-numeric available memory reported: '{}'",
            line.trim()
        ))
    })
}

/// Derives the budget. An explicit override wins; otherwise Linux hosts are
/// measured (keeping 10% headroom) and every other host gets the fixed fallback.
pub fn compute_budget(
    explicit_override_mb: Option<u64>,
    task_size_mb: u64,
    host_is_linux: bool,
    cpu_count: u64,
    probe: &dyn MemoryProbe,
) -> Result<ResourceBudget> {
    if task_size_mb == 0 {
        return Err(Error::Config("task size must be at least 1MB".to_string()));
    }
    let cpu_count = cpu_count.max(1);
    let (available_memory_mb, source) = match explicit_override_mb {
        Some(mb) => (mb, MemorySource::Override),
        None if host_is_linux => {
            let detected_mb = probe.available_kb()? / 1024;
            tracing::info!("Detected {}MB RAM available.", detected_mb);
            (detected_mb * 9 / 10, MemorySource::Detected)
        }
        None => (FALLBACK_AVAILABLE_MB, MemorySource::Fallback),
    };
    Ok(ResourceBudget {
        available_memory_mb,
        task_size_mb,
        cpu_count,
        parallelism: parallelism(cpu_count, available_memory_mb, task_size_mb),
        source,
    })
}

/// Logical CPUs visible to this process.
pub fn host_cpu_count() -> u64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(1)
}
