//! `batchpace`
//!
//! Runs a list of shell commands, launching each one only while CPU, memory
//! and disk utilization stay below their limits.

use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use batchpace_core::config::load_config;
use batchpace_core::tracing_init::{default_filter, init_tracing};
use batchpace_runner::cli::Args;
use batchpace_runner::process::ProcessTable;
use batchpace_runner::queue::CommandQueue;
use batchpace_runner::report::StatusReporter;
use batchpace_runner::sampler::SystemSampler;
use batchpace_runner::scheduler::{Scheduler, SchedulerConfig, request_shutdown};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let loaded = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    let mut config = loaded.config.clone();
    args.apply_to(&mut config);

    init_tracing(
        &default_filter(
            "batchpace_runner",
            &config.runner.log_level,
            config.runner.quiet,
        ),
        config.runner.log_json,
    );
    loaded.log_resolution();
    config.validate()?;

    let commands = args
        .command_source()?
        .materialize()
        .context("Failed to build command list")?;
    let queue = CommandQueue::from_ordered(commands, config.limits.max_launches);

    if args.dry_run {
        let mut out = std::io::stdout().lock();
        for command in queue.pending() {
            writeln!(out, "{command}")?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commands = queue.len(),
        max_cpu = config.limits.max_cpu_percent,
        max_mem = config.limits.max_mem_percent,
        max_disk = config.limits.max_disk_percent,
        "Starting batchpace"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            warn!(error = %e, "Failed to install signal handlers");
            return;
        }
        request_shutdown(&shutdown_tx);
    });

    let sampler = SystemSampler::new(&config.runner.proc_root, &config.runner.iostat_bin);
    let mut scheduler = Scheduler::new(
        SchedulerConfig::from(&config),
        queue,
        ProcessTable::new(config.runner.shell.clone()),
        sampler,
        StatusReporter::new(std::io::stdout(), config.runner.quiet),
    )
    .with_shutdown(shutdown_rx);

    let summary = scheduler.run().await?;
    signal_task.abort();

    Ok(ExitCode::from(summary.exit_code()))
}

/// Resolve on Ctrl+C or SIGTERM.
async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C; finishing running commands");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM; finishing running commands");
        }
    }
    Ok(())
}
