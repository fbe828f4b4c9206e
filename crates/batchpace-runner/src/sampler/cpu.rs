//! Aggregate CPU utilization from `/proc/stat`.

use super::SampleError;

/// Cumulative CPU time counters summed across all cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_times(stat: &str) -> Result<CpuTimes, SampleError> {
    let line = stat
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| SampleError::CpuParse("no aggregate cpu line".to_string()))?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SampleError::CpuParse(format!("{e} in '{line}'")))?;

    // user nice system idle ...
    let idle = *fields
        .get(3)
        .ok_or_else(|| SampleError::CpuParse(format!("too few fields in '{line}'")))?;
    Ok(CpuTimes {
        idle,
        total: fields.iter().sum(),
    })
}

/// Turns successive counter readings into a utilization percentage.
#[derive(Debug, Default)]
pub struct CpuTracker {
    prev: Option<CpuTimes>,
    last_usage: f64,
}

impl CpuTracker {
    /// Record a reading and return usage since the previous one.
    ///
    /// Without a usable delta (first reading, or no time elapsed) the last
    /// computed usage is returned, which starts at 0.
    #[allow(clippy::cast_precision_loss)]
    pub fn update(&mut self, now: CpuTimes) -> f64 {
        let Some(prev) = self.prev.replace(now) else {
            return self.last_usage;
        };
        let d_total = now.total.saturating_sub(prev.total);
        let d_idle = now.idle.saturating_sub(prev.idle);
        if d_total == 0 {
            return self.last_usage;
        }
        self.last_usage = 100.0 * d_total.saturating_sub(d_idle) as f64 / d_total as f64;
        self.last_usage
    }
}
