//! The launch decision for one poll iteration.

use std::fmt;

use crate::sampler::ResourceSnapshot;

/// Ceilings a launch must stay under. Compared literally, never clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub max_cpu_percent: f64,
    pub max_mem_percent: f64,
    pub max_disk_percent: f64,
    pub max_processes: i64,
}

impl Limits {
    /// Limits that never block a launch.
    pub const fn unbounded() -> Self {
        Self {
            max_cpu_percent: f64::INFINITY,
            max_mem_percent: f64::INFINITY,
            max_disk_percent: f64::INFINITY,
            max_processes: i64::MAX,
        }
    }
}

/// Why a launch was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    ProcessLimit,
    Cpu,
    Memory,
    Disk,
    NothingToLaunch,
    Cooldown,
}

impl fmt::Display for Blocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProcessLimit => "process limit",
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::NothingToLaunch => "nothing to launch",
            Self::Cooldown => "launch delay",
        })
    }
}

/// Inputs to the admission test besides the resource snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Occupancy {
    pub active: usize,
    pub unlaunched: i64,
    pub sleep_countdown: i64,
}

/// Decide whether one more command may be launched now.
///
/// All conditions must hold; the first failing one is reported. A NaN
/// reading never compares under a limit, so it blocks.
#[allow(clippy::cast_possible_wrap, clippy::neg_cmp_op_on_partial_ord)]
pub fn admit(limits: &Limits, snapshot: &ResourceSnapshot, occupancy: Occupancy) -> Result<(), Blocked> {
    if (occupancy.active as i64) >= limits.max_processes {
        return Err(Blocked::ProcessLimit);
    }
    if !(snapshot.cpu_percent < limits.max_cpu_percent) {
        return Err(Blocked::Cpu);
    }
    if !(snapshot.mem_percent < limits.max_mem_percent) {
        return Err(Blocked::Memory);
    }
    if !(snapshot.disk_percent < limits.max_disk_percent) {
        return Err(Blocked::Disk);
    }
    if occupancy.unlaunched <= 0 {
        return Err(Blocked::NothingToLaunch);
    }
    if occupancy.sleep_countdown > 0 {
        return Err(Blocked::Cooldown);
    }
    Ok(())
}
