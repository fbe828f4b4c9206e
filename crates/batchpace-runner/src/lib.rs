//! `batchpace` Runner Library
//!
//! Launches a batch of shell commands while the host has headroom:
//! - Command sources (command file or templated directory listing)
//! - Resource sampling (CPU, memory, disk)
//! - Admission-control scheduler with launch pacing
//! - Child process supervision and run accounting
//! - Operator status reporting

pub mod cli;
pub mod process;
pub mod queue;
pub mod report;
pub mod sampler;
pub mod scheduler;
pub mod source;
