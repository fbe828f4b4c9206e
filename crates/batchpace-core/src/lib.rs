//! `batchpace` Core Library
//!
//! Shared functionality for `batchpace` components:
//! - Layered configuration (defaults, settings files, environment)
//! - Common error types
//! - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
