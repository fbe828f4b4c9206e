//! System resource sampling for admission control.
//!
//! - [`SystemSampler`]: live probe reading `/proc/stat`, `/proc/meminfo` and
//!   running `iostat`.
//! - [`ResourceProbe`]: the seam the scheduler samples through, so tests can
//!   substitute synthetic readings.
//!
//! Every sampling failure is fatal to the run: these are required signals.

pub mod cpu;
pub mod disk;
pub mod memory;

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitStatus;

use tracing::trace;

use cpu::CpuTracker;
use memory::MemorySample;

/// Resource readings for one poll iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub disk_percent: f64,
    pub swap_used: u64,
    pub swap_unit: String,
}

/// Source of resource snapshots.
pub trait ResourceProbe {
    /// Take one snapshot. Errors abort the run.
    fn sample(&mut self) -> impl Future<Output = Result<ResourceSnapshot, SampleError>>;
}

/// Live sampler backed by the kernel statistics files and `iostat`.
#[derive(Debug)]
pub struct SystemSampler {
    proc_root: PathBuf,
    iostat_bin: PathBuf,
    cpu: CpuTracker,
}

impl SystemSampler {
    pub fn new(proc_root: impl Into<PathBuf>, iostat_bin: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            iostat_bin: iostat_bin.into(),
            cpu: CpuTracker::default(),
        }
    }

    fn read(&self, name: &str) -> Result<String, SampleError> {
        let path = self.proc_root.join(name);
        std::fs::read_to_string(&path).map_err(|source| SampleError::Read { path, source })
    }

    /// CPU utilization since the previous call.
    pub fn sample_cpu(&mut self) -> Result<f64, SampleError> {
        let times = cpu::parse_cpu_times(&self.read("stat")?)?;
        Ok(self.cpu.update(times))
    }

    /// Memory utilization and swap usage.
    pub fn sample_memory(&self) -> Result<MemorySample, SampleError> {
        Ok(memory::parse_meminfo(&self.read("meminfo")?))
    }

    /// Peak disk utilization; blocks for the utility's one-second interval.
    pub async fn sample_disk(&self) -> Result<f64, SampleError> {
        disk::parse_peak_util(&disk::run_iostat(&self.iostat_bin).await?)
    }
}

impl ResourceProbe for SystemSampler {
    async fn sample(&mut self) -> Result<ResourceSnapshot, SampleError> {
        let cpu_percent = self.sample_cpu()?;
        let disk_percent = self.sample_disk().await?;
        let memory = self.sample_memory()?;
        trace!(
            cpu = cpu_percent,
            mem = memory.used_percent,
            disk = disk_percent,
            "Sampled resources"
        );
        Ok(ResourceSnapshot {
            cpu_percent,
            mem_percent: memory.used_percent,
            disk_percent,
            swap_used: memory.swap_used,
            swap_unit: memory.swap_unit,
        })
    }
}

/// Errors from reading a required resource signal.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed CPU statistics: {0}")]
    CpuParse(String),

    #[error("Failed to run disk utility {}: {source}", .bin.display())]
    DiskSpawn {
        bin: PathBuf,
        source: std::io::Error,
    },

    #[error("Disk utility {} exited with {status}: {stderr}", .bin.display())]
    DiskFailed {
        bin: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Malformed disk utility output: {0}")]
    DiskParse(String),
}
