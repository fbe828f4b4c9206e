//! Memory and swap utilization from `/proc/meminfo`.

/// One reading of memory pressure.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySample {
    pub used_percent: f64,
    pub swap_used: u64,
    /// Unit as reported by the source, e.g. `kB`.
    pub swap_unit: String,
}

fn field<'a>(meminfo: &'a str, key: &str) -> Option<(u64, &'a str)> {
    meminfo.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != key {
            return None;
        }
        let mut parts = rest.split_whitespace();
        let value = parts.next()?.parse().ok()?;
        Some((value, parts.next().unwrap_or("")))
    })
}

/// Parse `/proc/meminfo` contents.
///
/// A missing or zero `MemTotal` reports 100% so that admission throttles.
#[allow(clippy::cast_precision_loss)]
pub fn parse_meminfo(meminfo: &str) -> MemorySample {
    let total = field(meminfo, "MemTotal").map_or(0, |(v, _)| v);
    let free = field(meminfo, "MemFree").map_or(0, |(v, _)| v);
    let cached = field(meminfo, "Cached").map_or(0, |(v, _)| v);

    let used_percent = if total == 0 {
        100.0
    } else {
        100.0 * (total as f64 - free as f64 - cached as f64) / total as f64
    };

    let (swap_total, swap_unit) = field(meminfo, "SwapTotal").unwrap_or((0, ""));
    let swap_free = field(meminfo, "SwapFree").map_or(0, |(v, _)| v);

    MemorySample {
        used_percent,
        swap_used: swap_total.saturating_sub(swap_free),
        swap_unit: swap_unit.to_string(),
    }
}
