//! Child process supervision: the process table and run counters.

pub mod counters;
pub mod table;

pub use counters::Counters;
pub use table::{ExitOutcome, LaunchError, ProcessTable, Reaped, RunningProcess};
