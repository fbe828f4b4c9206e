//! Peak disk utilization across block devices, via `iostat`.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::SampleError;

/// Run the disk utility for one fresh one-second interval and return its output.
///
/// `iostat -d -x 1 2` prints a since-boot report followed by the interval
/// report; only the latter is used.
pub async fn run_iostat(bin: &Path) -> Result<String, SampleError> {
    let output = Command::new(bin)
        .args(["-d", "-x", "1", "2"])
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| SampleError::DiskSpawn {
            bin: bin.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(SampleError::DiskFailed {
            bin: bin.to_path_buf(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Highest `%util` among the devices of the last report in `output`.
///
/// A report with no device rows yields 0.
pub fn parse_peak_util(output: &str) -> Result<f64, SampleError> {
    let mut util_column: Option<usize> = None;
    let mut last_report_peak: Option<f64> = None;

    for line in output.lines() {
        let Some(first) = line.split_whitespace().next() else {
            util_column = None;
            continue;
        };

        if first.starts_with("Device") {
            let index = line
                .split_whitespace()
                .position(|c| c == "%util")
                .ok_or_else(|| SampleError::DiskParse(format!("no %util column in '{line}'")))?;
            util_column = Some(index);
            last_report_peak = Some(0.0);
            continue;
        }

        let (Some(index), Some(peak)) = (util_column, last_report_peak.as_mut()) else {
            continue;
        };
        let raw = line
            .split_whitespace()
            .nth(index)
            .ok_or_else(|| SampleError::DiskParse(format!("short device row '{line}'")))?;
        let util: f64 = raw
            .parse()
            .map_err(|_| SampleError::DiskParse(format!("bad %util value '{raw}'")))?;
        debug!(device = first, util, "Disk utilization");
        *peak = peak.max(util);
    }

    last_report_peak
        .ok_or_else(|| SampleError::DiskParse("no device report found".to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    const OUTPUT: &str = "\
Linux 6.1.0 (host) \t10/18/2026 \t_x86_64_\t(8 CPU)

Device            r/s     w/s     rkB/s     wkB/s   %util
sda              1.00    2.00     10.00     20.00   99.00
sdb              0.00    0.00      0.00      0.00    1.00

Device            r/s     w/s     rkB/s     wkB/s   %util
sda              0.00    1.00      0.00      4.00   12.50
sdb              3.00    9.00     40.00     80.00   47.25
nvme0n1          0.00    0.00      0.00      0.00    0.00

";

    #[test]
    fn takes_peak_of_last_report() {
        assert_eq!(parse_peak_util(OUTPUT).unwrap(), 47.25);
    }

    #[test]
    fn older_header_with_colon_is_recognised() {
        let output = "Device: rrqm/s %util\nsda 0.00 33.0\n";
        assert_eq!(parse_peak_util(output).unwrap(), 33.0);
    }

    #[test]
    fn report_without_devices_is_zero() {
        let output = "Device r/s %util\n\n";
        assert_eq!(parse_peak_util(output).unwrap(), 0.0);
    }

    #[test]
    fn missing_header_is_error() {
        assert!(parse_peak_util("Linux 6.1.0\n\n").is_err());
    }

    #[test]
    fn missing_util_column_is_error() {
        assert!(parse_peak_util("Device r/s w/s\nsda 1 2\n").is_err());
    }

    #[tokio::test]
    async fn missing_utility_is_error() {
        let result = run_iostat(Path::new("/nonexistent/iostat")).await;
        assert!(matches!(result, Err(SampleError::DiskSpawn { .. })));
    }
}
