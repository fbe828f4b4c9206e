//! Stack-ordered queue of commands waiting to be launched.

/// Commands not yet launched, consumed last-to-first.
///
/// The ordered input is reversed on construction so that popping the stack
/// yields commands in their original order.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    stack: Vec<String>,
    initial_len: usize,
}

impl CommandQueue {
    /// Build a queue from commands in launch order, keeping at most `cap` of them.
    pub fn from_ordered(mut commands: Vec<String>, cap: Option<usize>) -> Self {
        if let Some(cap) = cap {
            commands.truncate(cap);
        }
        commands.reverse();
        Self {
            initial_len: commands.len(),
            stack: commands,
        }
    }

    /// Remove the next command to launch.
    pub fn pop(&mut self) -> Option<String> {
        self.stack.pop()
    }

    /// Remove every queued command, in launch order.
    pub fn drain(&mut self) -> Vec<String> {
        let mut drained: Vec<String> = self.stack.drain(..).collect();
        drained.reverse();
        drained
    }

    pub const fn len(&self) -> usize {
        self.stack.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Number of commands the queue was built with, after the cap.
    pub const fn initial_len(&self) -> usize {
        self.initial_len
    }

    /// Queued commands in launch order.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.stack.iter().rev().map(String::as_str)
    }
}
