//! Run-wide totals maintained by the process table and scheduler.

/// Counters for one run.
///
/// `remaining` starts at the number of queued commands and drops by one for
/// every command that reaches a terminal state: reaped, failed to launch, or
/// abandoned. It is signed so an accounting bug shows up as a negative value
/// instead of wrapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub initial: usize,
    pub attempted: usize,
    pub launch_failures: usize,
    pub completed_ok: usize,
    pub completed_with_error: usize,
    pub abandoned: usize,
    pub remaining: i64,
}

impl Counters {
    pub fn new(initial: usize) -> Self {
        Self {
            initial,
            remaining: i64::try_from(initial).unwrap_or(i64::MAX),
            ..Self::default()
        }
    }

    pub(crate) const fn settle_one(&mut self) {
        self.remaining -= 1;
    }

    /// Commands neither finished, failed to start, abandoned, nor running.
    #[allow(clippy::cast_possible_wrap)]
    pub const fn unlaunched(&self, active: usize) -> i64 {
        self.initial as i64
            - self.completed_ok as i64
            - self.completed_with_error as i64
            - self.launch_failures as i64
            - self.abandoned as i64
            - active as i64
    }

    /// Whether the run should report failure.
    pub const fn any_failure(&self) -> bool {
        self.launch_failures > 0 || self.completed_with_error > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_starts_with_everything_remaining() {
        let counters = Counters::new(4);
        assert_eq!(counters.remaining, 4);
        assert_eq!(counters.unlaunched(0), 4);
        assert!(!counters.any_failure());
    }

    #[test]
    fn unlaunched_excludes_running_and_settled() {
        let counters = Counters {
            initial: 10,
            completed_ok: 2,
            completed_with_error: 1,
            launch_failures: 1,
            abandoned: 0,
            ..Counters::default()
        };
        assert_eq!(counters.unlaunched(3), 3);
    }

    #[test]
    fn any_failure_tracks_both_failure_kinds() {
        let mut counters = Counters::new(2);
        counters.launch_failures = 1;
        assert!(counters.any_failure());

        let mut counters = Counters::new(2);
        counters.completed_with_error = 1;
        assert!(counters.any_failure());
    }
}
