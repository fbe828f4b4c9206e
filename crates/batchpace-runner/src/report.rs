//! Operator-facing progress output.
//!
//! The reporter only formats what the scheduler tells it; it makes no
//! decisions. Quiet mode keeps the final summary and drops everything else.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use tracing::warn;

use crate::process::{Counters, ExitOutcome, Reaped, RunningProcess};
use crate::sampler::ResourceSnapshot;

/// How a run ended, for the final summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// Queue drained and every process reaped.
    Drained,
    /// Stopped admitting after a process failed.
    HaltedOnError,
    /// Stopped admitting after an operator interrupt.
    Interrupted,
}

/// Writes progress lines to `out`.
pub struct StatusReporter<W: Write> {
    out: W,
    quiet: bool,
    write_failed: bool,
}

impl<W: Write> StatusReporter<W> {
    pub const fn new(out: W, quiet: bool) -> Self {
        Self {
            out,
            quiet,
            write_failed: false,
        }
    }

    fn emit(&mut self, line: fmt::Arguments<'_>) {
        if let Err(e) = self.out.write_fmt(line).and_then(|()| self.out.write_all(b"\n")) {
            if !self.write_failed {
                warn!(error = %e, "Failed to write report output");
            }
            self.write_failed = true;
        }
    }

    pub fn launched(&mut self, pid: u32, command: &str) {
        if !self.quiet {
            self.emit(format_args!("launched pid {pid}: {command}"));
        }
    }

    pub fn launch_failed(&mut self, command: &str, error: &dyn fmt::Display) {
        if !self.quiet {
            self.emit(format_args!("launch failed: {command}: {error}"));
        }
    }

    pub fn reaped(&mut self, reaped: &Reaped) {
        if self.quiet {
            return;
        }
        let pid = reaped.pid;
        match &reaped.outcome {
            ExitOutcome::Success => self.emit(format_args!("pid {pid} finished ok")),
            ExitOutcome::Failed(code) => {
                self.emit(format_args!("pid {pid} finished with error (exit {code})"));
            }
            ExitOutcome::Signaled(signal) => {
                self.emit(format_args!("pid {pid} finished with error (signal {signal})"));
            }
            ExitOutcome::Unknown(reason) => {
                self.emit(format_args!("pid {pid} finished with error (status unknown: {reason})"));
            }
        }
    }

    /// Periodic status line with the live process list.
    pub fn status<'a>(
        &mut self,
        elapsed: Duration,
        snapshot: &ResourceSnapshot,
        counters: &Counters,
        active: impl Iterator<Item = &'a RunningProcess>,
    ) {
        if self.quiet {
            return;
        }
        let running = active
            .map(|p| format!("{} ({})", p.pid, p.command))
            .collect::<Vec<_>>();
        let running = if running.is_empty() {
            "none".to_string()
        } else {
            running.join(", ")
        };
        self.emit(format_args!(
            "[{}s] cpu {:.1}% mem {:.1}% disk {:.1}% swap {} {} | ok {} err {} remaining {} | running: {}",
            elapsed.as_secs(),
            snapshot.cpu_percent,
            snapshot.mem_percent,
            snapshot.disk_percent,
            snapshot.swap_used,
            snapshot.swap_unit,
            counters.completed_ok,
            counters.completed_with_error,
            counters.remaining,
            running,
        ));
    }

    /// Final summary; printed even in quiet mode.
    pub fn summary(&mut self, elapsed: Duration, counters: &Counters, end: RunEnd, still_running: usize) {
        self.emit(format_args!(
            "finished in {}s: attempted {}, ok {}, errors {}, launch failures {}, abandoned {}",
            elapsed.as_secs(),
            counters.attempted,
            counters.completed_ok,
            counters.completed_with_error,
            counters.launch_failures,
            counters.abandoned,
        ));
        // Only a halt legitimately leaves commands unsettled.
        if end != RunEnd::HaltedOnError && counters.remaining != 0 {
            self.emit(format_args!(
                "WARNING: internal accounting error: remaining counter is {} at exit, expected 0",
                counters.remaining
            ));
        }
        match end {
            RunEnd::Drained => {}
            RunEnd::HaltedOnError => {
                self.emit(format_args!(
                    "stopped after first error; {still_running} process(es) left running"
                ));
            }
            RunEnd::Interrupted => {
                self.emit(format_args!("interrupted; {} queued command(s) abandoned", counters.abandoned));
            }
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
