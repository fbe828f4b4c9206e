//! Admission-control loop.
//!
//! The [`Scheduler`] polls resources once per iteration, reaps finished
//! processes, and launches at most one queued command per iteration when
//! [`admission::admit`] allows it. All state lives in one
//! [`SchedulerState`] owned by the scheduler; there is a single writer.
//!
//! Time is counted in ticks. An iteration that does not launch sleeps one
//! tick and advances both countdowns; an iteration that launches does not.

pub mod admission;

use std::io::Write;
use std::time::{Duration, Instant};

use batchpace_core::Config;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::process::{Counters, ExitOutcome, ProcessTable};
use crate::queue::CommandQueue;
use crate::report::{RunEnd, StatusReporter};
use crate::sampler::{ResourceProbe, SampleError};

pub use admission::{Blocked, Limits, Occupancy};

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub limits: Limits,
    /// Ticks between two launches.
    pub launch_delay_ticks: i64,
    /// One-time pause after the first successful launch.
    pub warmup: Duration,
    /// Ticks between status lines.
    pub status_period_ticks: i64,
    pub tick: Duration,
    pub stop_on_first_error: bool,
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            limits: Limits {
                max_cpu_percent: config.limits.max_cpu_percent,
                max_mem_percent: config.limits.max_mem_percent,
                max_disk_percent: config.limits.max_disk_percent,
                max_processes: config.limits.max_processes,
            },
            launch_delay_ticks: config.pacing.launch_delay_ticks,
            warmup: Duration::from_secs(config.pacing.warmup_secs),
            status_period_ticks: config.pacing.status_period_ticks,
            tick: Duration::from_millis(config.pacing.tick_millis),
            stop_on_first_error: config.runner.stop_on_first_error,
        }
    }
}

/// Everything the loop mutates.
#[derive(Debug)]
pub struct SchedulerState {
    pub queue: CommandQueue,
    pub table: ProcessTable,
    pub counters: Counters,
}

/// Something that happened to a command, with its offset from run start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Launched {
        pid: u32,
        command: String,
        at: Duration,
    },
    LaunchFailed {
        command: String,
        error: String,
        at: Duration,
    },
    Finished {
        pid: u32,
        command: String,
        outcome: ExitOutcome,
        at: Duration,
    },
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub counters: Counters,
    pub elapsed: Duration,
    pub end: RunEnd,
    /// Processes still running when the loop ended (non-zero only after a halt).
    pub still_running: usize,
    pub events: Vec<RunEvent>,
}

impl RunSummary {
    /// No launch failed, no process failed, and the run was not cut short.
    pub const fn succeeded(&self) -> bool {
        !self.counters.any_failure() && matches!(self.end, RunEnd::Drained)
    }

    pub const fn exit_code(&self) -> u8 {
        if self.succeeded() { 0 } else { 1 }
    }

    /// Commands in the order they were launched (successfully or not).
    pub fn launch_order(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Launched { command, .. } | RunEvent::LaunchFailed { command, .. } => {
                    Some(command.as_str())
                }
                RunEvent::Finished { .. } => None,
            })
            .collect()
    }
}

/// The admission-control and supervision loop.
pub struct Scheduler<P, W: Write> {
    config: SchedulerConfig,
    probe: P,
    reporter: StatusReporter<W>,
    state: SchedulerState,
    shutdown: Option<watch::Receiver<bool>>,
    events: Vec<RunEvent>,
    started: Instant,
    warmed_up: bool,
}

impl<P: ResourceProbe, W: Write> Scheduler<P, W> {
    pub fn new(
        config: SchedulerConfig,
        queue: CommandQueue,
        table: ProcessTable,
        probe: P,
        reporter: StatusReporter<W>,
    ) -> Self {
        let counters = Counters::new(queue.initial_len());
        Self {
            config,
            probe,
            reporter,
            state: SchedulerState {
                queue,
                table,
                counters,
            },
            shutdown: None,
            events: Vec::new(),
            started: Instant::now(),
            warmed_up: false,
        }
    }

    /// Stop admitting and abandon the queue once `shutdown` becomes `true`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub const fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Give back the report writer.
    pub fn into_output(self) -> W {
        self.reporter.into_inner()
    }

    /// Run until the queue is empty and no process is active, a process fails
    /// with stop-on-first-error set, or a sampling error occurs.
    ///
    /// After a halt the remaining children are left running and not waited for.
    pub async fn run(&mut self) -> Result<RunSummary, SchedulerError> {
        self.started = Instant::now();
        let mut sleep_countdown: i64 = 0;
        let mut print_countdown = self.config.status_period_ticks;
        let mut end = RunEnd::Drained;

        info!(
            commands = self.state.queue.len(),
            shell = self.state.table.shell(),
            max_processes = self.config.limits.max_processes,
            stop_on_first_error = self.config.stop_on_first_error,
            "Starting run"
        );

        while !self.state.queue.is_empty() || self.state.table.active_count() > 0 {
            if end != RunEnd::Interrupted && self.shutdown_requested() {
                end = RunEnd::Interrupted;
                self.abandon_queue();
            }

            let snapshot = self.probe.sample().await?;

            if self.reap() && self.config.stop_on_first_error {
                warn!(
                    still_running = self.state.table.active_count(),
                    "Process failed; halting further launches"
                );
                end = RunEnd::HaltedOnError;
                break;
            }

            let active = self.state.table.active_count();
            let occupancy = Occupancy {
                active,
                unlaunched: self.state.counters.unlaunched(active),
                sleep_countdown,
            };
            let next = match admission::admit(&self.config.limits, &snapshot, occupancy) {
                Ok(()) => self.state.queue.pop(),
                Err(reason) => {
                    trace!(%reason, active, "Launch not admitted");
                    None
                }
            };

            if let Some(command) = next {
                self.launch(command).await;
                sleep_countdown = self.config.launch_delay_ticks;
            } else {
                self.pause(self.config.tick).await;
                sleep_countdown -= 1;
                print_countdown -= 1;
            }

            if print_countdown <= 0 {
                self.reporter.status(
                    self.started.elapsed(),
                    &snapshot,
                    &self.state.counters,
                    self.state.table.active(),
                );
                print_countdown = self.config.status_period_ticks;
            }
        }

        Ok(self.finish(end))
    }

    /// Reap exited processes. Returns whether any of them failed.
    fn reap(&mut self) -> bool {
        let reaped = self.state.table.reap_finished(&mut self.state.counters);
        let mut any_failed = false;
        for process in reaped {
            if !process.outcome.is_success() {
                warn!(pid = process.pid, outcome = ?process.outcome, command = %process.command, "Process failed");
                any_failed = true;
            }
            self.reporter.reaped(&process);
            self.events.push(RunEvent::Finished {
                pid: process.pid,
                command: process.command,
                outcome: process.outcome,
                at: self.started.elapsed(),
            });
        }
        any_failed
    }

    async fn launch(&mut self, command: String) {
        match self.state.table.launch(&command, &mut self.state.counters) {
            Ok(pid) => {
                self.reporter.launched(pid, &command);
                self.events.push(RunEvent::Launched {
                    pid,
                    command,
                    at: self.started.elapsed(),
                });
                if !self.warmed_up {
                    self.warmed_up = true;
                    if !self.config.warmup.is_zero() {
                        info!(
                            warmup_ms = self.config.warmup.as_millis(),
                            "Warming up after first launch"
                        );
                        self.pause(self.config.warmup).await;
                    }
                }
            }
            Err(e) => {
                self.reporter.launch_failed(&command, &e);
                self.events.push(RunEvent::LaunchFailed {
                    command,
                    error: e.to_string(),
                    at: self.started.elapsed(),
                });
            }
        }
    }

    fn shutdown_requested(&mut self) -> bool {
        self.shutdown
            .as_mut()
            .is_some_and(|rx| *rx.borrow_and_update())
    }

    fn abandon_queue(&mut self) {
        let abandoned = self.state.queue.drain();
        info!(
            abandoned = abandoned.len(),
            still_running = self.state.table.active_count(),
            "Shutdown requested; no further launches"
        );
        for _ in &abandoned {
            self.state.counters.abandoned += 1;
            self.state.counters.settle_one();
        }
    }

    /// Sleep for `duration`, returning early if shutdown is signalled.
    async fn pause(&mut self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration;
        let Some(rx) = self.shutdown.as_mut() else {
            tokio::time::sleep_until(deadline).await;
            return;
        };
        let changed = tokio::time::timeout_at(deadline, rx.changed()).await;
        if matches!(changed, Ok(Err(_))) {
            // Sender gone: nothing can interrupt us any more.
            self.shutdown = None;
            tokio::time::sleep_until(deadline).await;
        }
    }

    fn finish(&mut self, end: RunEnd) -> RunSummary {
        let elapsed = self.started.elapsed();
        let counters = self.state.counters.clone();
        let still_running = self.state.table.active_count();

        if end != RunEnd::HaltedOnError && counters.remaining != 0 {
            error!(
                remaining = counters.remaining,
                "Remaining counter is nonzero at exit"
            );
        }
        self.reporter.summary(elapsed, &counters, end, still_running);
        info!(
            attempted = counters.attempted,
            ok = counters.completed_ok,
            errors = counters.completed_with_error,
            launch_failures = counters.launch_failures,
            abandoned = counters.abandoned,
            elapsed_secs = elapsed.as_secs(),
            ?end,
            "Run finished"
        );

        RunSummary {
            counters,
            elapsed,
            end,
            still_running,
            events: std::mem::take(&mut self.events),
        }
    }
}

/// Ask a running scheduler to stop admitting.
///
/// Returns `false` when no scheduler is listening any more, which happens
/// when the run ended before the signal arrived.
pub fn request_shutdown(shutdown: &watch::Sender<bool>) -> bool {
    let delivered = shutdown.send(true).is_ok();
    if !delivered {
        debug!("Run already finished; shutdown signal not delivered");
    }
    delivered
}

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Resource sampling failed: {0}")]
    Sample(#[from] SampleError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sampler::ResourceSnapshot;

    /// Returns a fixed snapshot; optionally signals shutdown after `n` samples.
    struct FixedProbe {
        snapshot: ResourceSnapshot,
        samples: usize,
        shutdown_after: Option<(usize, watch::Sender<bool>)>,
    }

    impl FixedProbe {
        fn new(load: f64) -> Self {
            Self {
                snapshot: ResourceSnapshot {
                    cpu_percent: load,
                    mem_percent: load,
                    disk_percent: load,
                    swap_used: 0,
                    swap_unit: "kB".to_string(),
                },
                samples: 0,
                shutdown_after: None,
            }
        }
    }

    impl ResourceProbe for FixedProbe {
        async fn sample(&mut self) -> Result<ResourceSnapshot, SampleError> {
            self.samples += 1;
            if let Some((n, tx)) = &self.shutdown_after {
                if self.samples == *n {
                    tx.send_replace(true);
                }
            }
            Ok(self.snapshot.clone())
        }
    }

    struct FailingProbe;

    impl ResourceProbe for FailingProbe {
        async fn sample(&mut self) -> Result<ResourceSnapshot, SampleError> {
            Err(SampleError::CpuParse("unavailable".to_string()))
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            limits: Limits::unbounded(),
            launch_delay_ticks: 0,
            warmup: Duration::ZERO,
            status_period_ticks: 1_000,
            tick: Duration::from_millis(10),
            stop_on_first_error: true,
        }
    }

    fn queue(commands: &[&str], cap: Option<usize>) -> CommandQueue {
        CommandQueue::from_ordered(commands.iter().map(|c| (*c).to_string()).collect(), cap)
    }

    fn scheduler<P: ResourceProbe>(
        config: SchedulerConfig,
        commands: &[&str],
        probe: P,
    ) -> Scheduler<P, Vec<u8>> {
        Scheduler::new(
            config,
            queue(commands, None),
            ProcessTable::new("sh"),
            probe,
            StatusReporter::new(Vec::new(), false),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_resources_never_launch_and_loop_ends_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let mut probe = FixedProbe::new(100.0);
        probe.shutdown_after = Some((5, tx));
        let config = SchedulerConfig {
            limits: Limits {
                max_cpu_percent: 50.0,
                max_mem_percent: 50.0,
                max_disk_percent: 50.0,
                max_processes: 10,
            },
            ..fast_config()
        };

        let mut sched = scheduler(config, &["true", "true", "true"], probe).with_shutdown(rx);
        let summary = sched.run().await.unwrap();

        assert_eq!(summary.counters.attempted, 0);
        assert_eq!(summary.counters.abandoned, 3);
        assert_eq!(summary.counters.remaining, 0);
        assert_eq!(summary.end, RunEnd::Interrupted);
        assert!(summary.events.is_empty());
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn cap_limits_attempts() {
        let mut sched = Scheduler::new(
            fast_config(),
            queue(&["true", "true", "true", "true", "true"], Some(2)),
            ProcessTable::new("sh"),
            FixedProbe::new(0.0),
            StatusReporter::new(Vec::new(), true),
        );
        let summary = sched.run().await.unwrap();
        assert_eq!(summary.counters.attempted, 2);
        assert_eq!(summary.counters.completed_ok, 2);
        assert_eq!(summary.counters.remaining, 0);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn launches_follow_original_order() {
        let mut sched = scheduler(
            fast_config(),
            &["echo c1", "echo c2", "echo c3"],
            FixedProbe::new(0.0),
        );
        let summary = sched.run().await.unwrap();
        assert_eq!(summary.launch_order(), vec!["echo c1", "echo c2", "echo c3"]);
    }

    #[tokio::test]
    async fn stop_on_first_error_prevents_third_launch() {
        let config = SchedulerConfig {
            limits: Limits {
                max_processes: 1,
                ..Limits::unbounded()
            },
            ..fast_config()
        };
        let mut sched = scheduler(config, &["true", "exit 1", "true"], FixedProbe::new(0.0));
        let summary = sched.run().await.unwrap();

        assert_eq!(summary.launch_order(), vec!["true", "exit 1"]);
        assert_eq!(summary.counters.attempted, 2);
        assert_eq!(summary.counters.completed_with_error, 1);
        assert_eq!(summary.end, RunEnd::HaltedOnError);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(sched.state().queue.len(), 1);
    }

    #[tokio::test]
    async fn keep_going_runs_everything_but_still_fails() {
        let config = SchedulerConfig {
            stop_on_first_error: false,
            ..fast_config()
        };
        let mut sched = scheduler(config, &["true", "exit 1", "true"], FixedProbe::new(0.0));
        let summary = sched.run().await.unwrap();

        assert_eq!(summary.counters.attempted, 3);
        assert_eq!(summary.counters.completed_ok, 2);
        assert_eq!(summary.counters.completed_with_error, 1);
        assert_eq!(summary.counters.remaining, 0);
        assert_eq!(summary.end, RunEnd::Drained);
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn launch_failures_are_consumed_and_counted() {
        let mut sched = Scheduler::new(
            fast_config(),
            queue(&["echo a", "echo b"], None),
            ProcessTable::new("/nonexistent/shell"),
            FixedProbe::new(0.0),
            StatusReporter::new(Vec::new(), false),
        );
        let summary = sched.run().await.unwrap();

        assert_eq!(summary.counters.attempted, 2);
        assert_eq!(summary.counters.launch_failures, 2);
        assert_eq!(summary.counters.remaining, 0);
        assert_eq!(summary.end, RunEnd::Drained);
        assert_eq!(summary.exit_code(), 1);

        let output = String::from_utf8(sched.into_output()).unwrap();
        assert!(output.contains("launch failed: echo a"), "got: {output}");
    }

    #[tokio::test]
    async fn empty_queue_reports_zeros() {
        let mut sched = scheduler(fast_config(), &[], FixedProbe::new(0.0));
        let summary = sched.run().await.unwrap();

        assert_eq!(summary.counters, Counters::new(0));
        assert_eq!(summary.exit_code(), 0);
        let output = String::from_utf8(sched.into_output()).unwrap();
        assert!(output.starts_with("finished in 0s: attempted 0, ok 0, errors 0"));
    }

    #[tokio::test]
    async fn launch_delay_spaces_out_launches() {
        let config = SchedulerConfig {
            launch_delay_ticks: 3,
            tick: Duration::from_millis(20),
            ..fast_config()
        };
        let mut sched = scheduler(config, &["true", "true"], FixedProbe::new(0.0));
        let summary = sched.run().await.unwrap();

        let launched: Vec<Duration> = summary
            .events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Launched { at, .. } => Some(*at),
                _ => None,
            })
            .collect();
        assert_eq!(launched.len(), 2);
        assert!(
            launched[1] - launched[0] >= Duration::from_millis(60),
            "launches too close: {launched:?}"
        );
    }

    #[tokio::test]
    async fn status_lines_are_printed_while_waiting() {
        let config = SchedulerConfig {
            status_period_ticks: 1,
            ..fast_config()
        };
        let mut sched = scheduler(config, &["sleep 0.1"], FixedProbe::new(0.0));
        sched.run().await.unwrap();

        let output = String::from_utf8(sched.into_output()).unwrap();
        assert!(
            output.lines().any(|l| l.contains("| running: ") && l.contains("(sleep 0.1)")),
            "got: {output}"
        );
    }

    fn launch_times(summary: &RunSummary) -> Vec<Duration> {
        summary
            .events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Launched { at, .. } | RunEvent::LaunchFailed { at, .. } => Some(*at),
                RunEvent::Finished { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn warmup_follows_first_successful_launch_only() {
        let warmup = Duration::from_millis(300);
        let config = SchedulerConfig {
            warmup,
            ..fast_config()
        };
        // The nul byte makes the first spawn fail.
        let mut sched = scheduler(
            config,
            &["bad\0command", "true", "true", "true"],
            FixedProbe::new(0.0),
        );
        let summary = sched.run().await.unwrap();

        assert!(matches!(summary.events[0], RunEvent::LaunchFailed { .. }));
        assert_eq!(summary.counters.launch_failures, 1);
        assert_eq!(summary.counters.completed_ok, 3);

        let at = launch_times(&summary);
        assert_eq!(at.len(), 4);
        assert!(at[1] - at[0] < warmup, "failed launch must not warm up: {at:?}");
        assert!(at[2] - at[1] >= warmup, "no warmup after first launch: {at:?}");
        assert!(at[3] - at[2] < warmup, "warmup repeated: {at:?}");
    }

    #[tokio::test]
    async fn interrupt_lets_running_child_finish() {
        let (tx, rx) = watch::channel(false);
        let mut probe = FixedProbe::new(0.0);
        probe.shutdown_after = Some((5, tx));
        let config = SchedulerConfig {
            limits: Limits {
                max_processes: 1,
                ..Limits::unbounded()
            },
            ..fast_config()
        };

        let mut sched =
            scheduler(config, &["sleep 1", "true", "true"], probe).with_shutdown(rx);
        let summary = sched.run().await.unwrap();

        assert_eq!(summary.launch_order(), vec!["sleep 1"]);
        assert_eq!(summary.counters.completed_ok, 1);
        assert_eq!(summary.counters.abandoned, 2);
        assert_eq!(summary.counters.remaining, 0);
        assert_eq!(summary.still_running, 0);
        assert_eq!(summary.end, RunEnd::Interrupted);
        assert_eq!(summary.exit_code(), 1);
        assert!(summary.events.iter().any(|e| matches!(
            e,
            RunEvent::Finished { command, outcome: ExitOutcome::Success, .. } if command == "sleep 1"
        )));

        let output = String::from_utf8(sched.into_output()).unwrap();
        assert!(!output.contains("WARNING"), "got: {output}");
    }

    #[test]
    fn shutdown_request_reports_whether_anyone_listened() {
        let (tx, rx) = watch::channel(false);
        assert!(request_shutdown(&tx));
        assert!(*rx.borrow());

        drop(rx);
        assert!(!request_shutdown(&tx));
    }

    #[tokio::test]
    async fn sampling_error_aborts_run() {
        let mut sched = scheduler(fast_config(), &["true"], FailingProbe);
        let result = sched.run().await;
        assert!(matches!(result, Err(SchedulerError::Sample(_))));
        assert_eq!(sched.state().counters.attempted, 0);
    }
}
