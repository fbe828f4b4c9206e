//! Configuration resolution for batchpace.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config_dir>/batchpace/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Settings files may be partial: each layer only overrides the keys it names.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Complete batchpace configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub limits: LimitsConfig,
    pub pacing: PacingConfig,
    pub runner: RunnerConfig,
}

/// Admission ceilings. Compared literally: zero or negative values are not clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_cpu_percent: f64,
    pub max_mem_percent: f64,
    pub max_disk_percent: f64,
    pub max_processes: i64,
    /// Total launch cap; `None` means unlimited.
    pub max_launches: Option<usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_cpu_percent: 95.0,
            max_mem_percent: 80.0,
            max_disk_percent: 90.0,
            max_processes: 128,
            max_launches: None,
        }
    }
}

/// Timing of the polling loop, in ticks unless stated otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Ticks to wait after a launch before the next one is admitted.
    pub launch_delay_ticks: i64,
    /// One-time pause after the first successful launch (seconds).
    pub warmup_secs: u64,
    /// Ticks between periodic status lines.
    pub status_period_ticks: i64,
    /// Length of one polling tick in milliseconds.
    pub tick_millis: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            launch_delay_ticks: 5,
            warmup_secs: 5,
            status_period_ticks: 5,
            tick_millis: 1000,
        }
    }
}

/// Process execution and reporting behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Shell used to run each command as `<shell> -c <command>`.
    pub shell: String,
    pub stop_on_first_error: bool,
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    /// Root of the kernel statistics filesystem.
    pub proc_root: PathBuf,
    /// Disk utilization sampling utility.
    pub iostat_bin: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            stop_on_first_error: true,
            quiet: false,
            log_level: "info".to_string(),
            log_json: false,
            proc_root: PathBuf::from("/proc"),
            iostat_bin: PathBuf::from("iostat"),
        }
    }
}

impl Config {
    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.pacing.tick_millis == 0 {
            return Err(Error::Config("tick_millis must be greater than 0".into()));
        }
        if self.runner.shell.trim().is_empty() {
            return Err(Error::Config("shell must not be empty".into()));
        }
        Ok(())
    }
}

/// A resolved configuration plus what happened while resolving it.
///
/// Resolution runs before the tracing subscriber exists (the log level is
/// itself configurable), so its diagnostics are collected here and emitted
/// by [`LoadedConfig::log_resolution`] once logging is up.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    pub config: Config,
    /// Settings files merged in, lowest priority first.
    pub sources: Vec<PathBuf>,
    /// Environment overrides that could not be parsed and were skipped.
    pub ignored_env: Vec<IgnoredOverride>,
}

/// An environment variable whose value did not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredOverride {
    pub key: String,
    pub value: String,
}

impl LoadedConfig {
    /// Emit the resolution diagnostics through `tracing`.
    pub fn log_resolution(&self) {
        for path in &self.sources {
            debug!(path = %path.display(), "Loaded config file");
        }
        for ignored in &self.ignored_env {
            warn!(
                key = %ignored.key,
                value = %ignored.value,
                "Ignoring unparseable environment override"
            );
        }
    }
}

/// Load configuration with hierarchical resolution from the process environment.
///
/// `explicit` must exist when given; the global file is optional. The result
/// is not validated: CLI flags still apply on top, so callers validate last.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with(explicit, |key| std::env::var(key).ok())
}

/// Like [`load_config`], reading environment variables through `lookup`.
pub fn load_config_with<F>(explicit: Option<&Path>, lookup: F) -> Result<LoadedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut layered = serde_json::to_value(Config::default())?;
    let mut sources = Vec::new();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_json(&mut layered, load_config_file(&global_path)?);
        sources.push(global_path);
    }

    if let Some(path) = explicit {
        merge_json(&mut layered, load_config_file(path)?);
        sources.push(path.to_path_buf());
    }

    let mut config: Config = serde_json::from_value(layered)?;
    let ignored_env = apply_env_overrides(&mut config, lookup);
    Ok(LoadedConfig {
        config,
        sources,
        ignored_env,
    })
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("batchpace").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

/// Recursively overlay `overlay` onto `base`; objects merge, everything else replaces.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `BATCHPACE_*` overrides using `lookup` to read variables.
///
/// Unparseable values leave the setting untouched and are returned.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Vec<IgnoredOverride>
where
    F: Fn(&str) -> Option<String>,
{
    let mut ignored = Vec::new();

    if let Some(v) = parse_override("BATCHPACE_MAX_CPU", &lookup, &mut ignored) {
        config.limits.max_cpu_percent = v;
    }
    if let Some(v) = parse_override("BATCHPACE_MAX_MEM", &lookup, &mut ignored) {
        config.limits.max_mem_percent = v;
    }
    if let Some(v) = parse_override("BATCHPACE_MAX_DISK", &lookup, &mut ignored) {
        config.limits.max_disk_percent = v;
    }
    if let Some(v) = parse_override("BATCHPACE_MAX_PROCESSES", &lookup, &mut ignored) {
        config.limits.max_processes = v;
    }
    if let Some(v) = parse_override("BATCHPACE_MAX_LAUNCHES", &lookup, &mut ignored) {
        config.limits.max_launches = Some(v);
    }
    if let Some(v) = parse_override("BATCHPACE_LAUNCH_DELAY", &lookup, &mut ignored) {
        config.pacing.launch_delay_ticks = v;
    }
    if let Some(v) = parse_override("BATCHPACE_WARMUP", &lookup, &mut ignored) {
        config.pacing.warmup_secs = v;
    }
    if let Some(v) = parse_override("BATCHPACE_STATUS_PERIOD", &lookup, &mut ignored) {
        config.pacing.status_period_ticks = v;
    }
    if let Some(v) = parse_override("BATCHPACE_TICK_MILLIS", &lookup, &mut ignored) {
        config.pacing.tick_millis = v;
    }
    if let Some(v) = parse_override("BATCHPACE_STOP_ON_ERROR", &lookup, &mut ignored) {
        config.runner.stop_on_first_error = v;
    }
    if let Some(v) = parse_override("BATCHPACE_QUIET", &lookup, &mut ignored) {
        config.runner.quiet = v;
    }
    if let Some(val) = lookup("BATCHPACE_SHELL") {
        config.runner.shell = val;
    }
    if let Some(val) = lookup("BATCHPACE_LOG_LEVEL") {
        config.runner.log_level = val;
    }

    ignored
}

fn parse_override<T, F>(key: &str, lookup: &F, ignored: &mut Vec<IgnoredOverride>) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    if let Ok(value) = raw.trim().parse() {
        return Some(value);
    }
    ignored.push(IgnoredOverride {
        key: key.to_string(),
        value: raw,
    });
    None
}
