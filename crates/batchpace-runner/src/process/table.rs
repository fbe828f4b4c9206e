//! Table of running child processes.
//!
//! Manages spawning, non-blocking liveness checks, and exit classification
//! for the launched commands. Children are never killed by the table: they
//! run as independent OS processes and are only observed.

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::counters::Counters;

/// A launched command that has not yet been observed to exit.
#[derive(Debug)]
pub struct RunningProcess {
    pub pid: u32,
    pub command: String,
    pub started_at: Instant,
    child: Child,
}

/// How a reaped process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with status 0.
    Success,
    /// Exited with a non-zero code.
    Failed(i32),
    /// Terminated by a signal.
    Signaled(i32),
    /// The status could not be retrieved.
    Unknown(String),
}

impl ExitOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            return Self::Success;
        }
        if let Some(code) = status.code() {
            return Self::Failed(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::Unknown(status.to_string())
    }
}

/// A process removed from the table after it exited.
#[derive(Debug, Clone)]
pub struct Reaped {
    pub pid: u32,
    pub command: String,
    pub outcome: ExitOutcome,
    pub runtime: Duration,
}

/// Running processes keyed by pid.
#[derive(Debug)]
pub struct ProcessTable {
    processes: BTreeMap<u32, RunningProcess>,
    /// Shell used as `<shell> -c <command>`.
    shell: String,
}

impl ProcessTable {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            processes: BTreeMap::new(),
            shell: shell.into(),
        }
    }

    /// Start `command` through the shell and track it.
    ///
    /// Counts the attempt either way; a failed spawn also counts as a launch
    /// failure and settles the command, which is never retried.
    pub fn launch(&mut self, command: &str, counters: &mut Counters) -> Result<u32, LaunchError> {
        counters.attempted += 1;
        match self.spawn(command) {
            Ok(process) => {
                let pid = process.pid;
                info!(pid, command, "Launched process");
                self.processes.insert(pid, process);
                Ok(pid)
            }
            Err(e) => {
                counters.launch_failures += 1;
                counters.settle_one();
                warn!(command, error = %e, "Launch failed");
                Err(e)
            }
        }
    }

    fn spawn(&self, command: &str) -> Result<RunningProcess, LaunchError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);

        let child = cmd.spawn().map_err(|e| LaunchError::SpawnFailed {
            shell: self.shell.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or(LaunchError::NoPid)?;

        Ok(RunningProcess {
            pid,
            command: command.to_string(),
            started_at: Instant::now(),
            child,
        })
    }

    /// Remove every process that has exited, classifying its status.
    ///
    /// Never blocks. Returns the reaped processes in pid order; with nothing
    /// finished the table and counters are left untouched.
    pub fn reap_finished(&mut self, counters: &mut Counters) -> Vec<Reaped> {
        let mut exited = Vec::new();
        for (pid, process) in &mut self.processes {
            match process.child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => exited.push((*pid, ExitOutcome::from_status(status))),
                Err(e) => {
                    warn!(pid, error = %e, "Failed to query process status");
                    exited.push((*pid, ExitOutcome::Unknown(e.to_string())));
                }
            }
        }

        let mut reaped = Vec::with_capacity(exited.len());
        for (pid, outcome) in exited {
            let Some(process) = self.processes.remove(&pid) else {
                continue;
            };
            if outcome.is_success() {
                counters.completed_ok += 1;
            } else {
                counters.completed_with_error += 1;
            }
            counters.settle_one();

            let runtime = process.started_at.elapsed();
            debug!(pid, ?outcome, runtime_ms = runtime.as_millis(), "Reaped process");
            reaped.push(Reaped {
                pid,
                command: process.command,
                outcome,
                runtime,
            });
        }
        reaped
    }

    /// Number of processes still being supervised.
    pub fn active_count(&self) -> usize {
        self.processes.len()
    }

    /// Running processes in pid order.
    pub fn active(&self) -> impl Iterator<Item = &RunningProcess> {
        self.processes.values()
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

/// Errors from launching a command.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn {shell}: {reason}")]
    SpawnFailed { shell: String, reason: String },

    #[error("Spawned process has no pid")]
    NoPid,
}
