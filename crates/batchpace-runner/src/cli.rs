//! Command-line interface.
//!
//! Every tuning flag is optional: an unset flag leaves the value resolved
//! from defaults, settings files and `BATCHPACE_*` variables untouched.

use std::path::PathBuf;

use batchpace_core::Config;
use clap::{ArgGroup, Parser};

use crate::source::{CommandSource, DirectorySource, FileSource, SourceError};

#[derive(Parser, Debug, Clone)]
#[command(name = "batchpace")]
#[command(
    version,
    about = "Run a batch of shell commands, launching each only while CPU, memory and disk have headroom"
)]
#[command(group(ArgGroup::new("input").required(true).args(["file", "dir"])))]
pub struct Args {
    /// File with one shell command per line (blank lines and `#` comments skipped)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Directory whose matching files each produce one command
    #[arg(short, long, requires = "pattern", requires = "command")]
    pub dir: Option<PathBuf>,

    /// Regular expression selecting file names in --dir
    #[arg(short, long, requires = "dir")]
    pub pattern: Option<String>,

    /// Command template for --dir; placeholders: {path} {name} {stem} {dir}
    #[arg(short, long, requires = "dir")]
    pub command: Option<String>,

    /// Settings file (JSON), layered over the global settings
    #[arg(long, env = "BATCHPACE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Admit launches only while CPU utilization is below this percentage
    #[arg(long, allow_negative_numbers = true)]
    pub max_cpu: Option<f64>,

    /// Admit launches only while memory utilization is below this percentage
    #[arg(long, allow_negative_numbers = true)]
    pub max_mem: Option<f64>,

    /// Admit launches only while peak disk utilization is below this percentage
    #[arg(long, allow_negative_numbers = true)]
    pub max_disk: Option<f64>,

    /// Maximum number of concurrently running commands
    #[arg(long, allow_negative_numbers = true)]
    pub max_processes: Option<i64>,

    /// Launch at most this many commands from the front of the list
    #[arg(short = 'n', long)]
    pub max_launches: Option<usize>,

    /// Ticks to wait between two launches
    #[arg(long, allow_negative_numbers = true)]
    pub launch_delay: Option<i64>,

    /// Seconds to pause after the first launch
    #[arg(long)]
    pub warmup: Option<u64>,

    /// Ticks between status lines
    #[arg(long, allow_negative_numbers = true)]
    pub status_period: Option<i64>,

    /// Length of one tick in milliseconds
    #[arg(long)]
    pub tick_millis: Option<u64>,

    /// Shell used to run each command as `<shell> -c <command>`
    #[arg(long)]
    pub shell: Option<String>,

    /// Print only the final summary
    #[arg(short, long)]
    pub quiet: bool,

    /// Keep launching after a command fails
    #[arg(long)]
    pub keep_going: bool,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Print the resolved command list and exit without running anything
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    /// Apply the flags that were given on top of `config`.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(v) = self.max_cpu {
            config.limits.max_cpu_percent = v;
        }
        if let Some(v) = self.max_mem {
            config.limits.max_mem_percent = v;
        }
        if let Some(v) = self.max_disk {
            config.limits.max_disk_percent = v;
        }
        if let Some(v) = self.max_processes {
            config.limits.max_processes = v;
        }
        if let Some(v) = self.max_launches {
            config.limits.max_launches = Some(v);
        }
        if let Some(v) = self.launch_delay {
            config.pacing.launch_delay_ticks = v;
        }
        if let Some(v) = self.warmup {
            config.pacing.warmup_secs = v;
        }
        if let Some(v) = self.status_period {
            config.pacing.status_period_ticks = v;
        }
        if let Some(v) = self.tick_millis {
            config.pacing.tick_millis = v;
        }
        if let Some(shell) = &self.shell {
            config.runner.shell.clone_from(shell);
        }
        if let Some(level) = &self.log_level {
            config.runner.log_level.clone_from(level);
        }
        if self.quiet {
            config.runner.quiet = true;
        }
        if self.keep_going {
            config.runner.stop_on_first_error = false;
        }
        if self.log_json {
            config.runner.log_json = true;
        }
    }

    /// Build the command source selected by `--file` or `--dir`.
    pub fn command_source(&self) -> Result<Box<dyn CommandSource>, SourceError> {
        if let Some(file) = &self.file {
            return Ok(Box::new(FileSource::new(file)));
        }
        let dir = self.dir.clone().unwrap_or_default();
        let pattern = self.pattern.as_deref().unwrap_or_default();
        let template = self.command.clone().unwrap_or_default();
        Ok(Box::new(DirectorySource::new(dir, pattern, template)?))
    }
}
