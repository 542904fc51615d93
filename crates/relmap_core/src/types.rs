//! Core type definitions for relmap.

use std::fmt;

/// Identifier of a command within one command graph.
///
/// Command IDs are assigned in enqueue order and double as the sequencer's
/// tie-break: among commands that are ready at the same time, the lower ID
/// runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(pub usize);

impl CommandId {
    /// Creates a new command ID.
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_id_ordering() {
        assert!(CommandId::new(1) < CommandId::new(2));
    }

    #[test]
    fn command_id_display() {
        assert_eq!(format!("{}", CommandId::new(42)), "cmd:42");
    }
}
