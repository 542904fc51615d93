//! Engine configuration.

/// Configuration for a [`crate::Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Whether `run()` opens, commits and rolls back its own physical
    /// transaction. When false the caller's ambient transaction is used and
    /// never touched.
    pub manage_transaction: bool,

    /// Whether dependency cycles may be broken by deferred updates.
    pub split_cycles: bool,

    /// Upper bound on split rounds per run.
    pub max_split_rounds: usize,

    /// Whether a failed run restores the heap to its state before the run.
    pub reset_heap_on_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manage_transaction: true,
            split_cycles: true,
            max_split_rounds: 1024,
            reset_heap_on_failure: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the engine manages the physical transaction.
    #[must_use]
    pub const fn manage_transaction(mut self, value: bool) -> Self {
        self.manage_transaction = value;
        self
    }

    /// Sets whether cycles may be split.
    #[must_use]
    pub const fn split_cycles(mut self, value: bool) -> Self {
        self.split_cycles = value;
        self
    }

    /// Sets the split round limit.
    #[must_use]
    pub const fn max_split_rounds(mut self, rounds: usize) -> Self {
        self.max_split_rounds = rounds;
        self
    }

    /// Sets whether a failed run restores the heap.
    #[must_use]
    pub const fn reset_heap_on_failure(mut self, value: bool) -> Self {
        self.reset_heap_on_failure = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.manage_transaction);
        assert!(config.split_cycles);
        assert!(!config.reset_heap_on_failure);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .manage_transaction(false)
            .split_cycles(false)
            .max_split_rounds(4)
            .reset_heap_on_failure(true);

        assert!(!config.manage_transaction);
        assert!(!config.split_cycles);
        assert_eq!(config.max_split_rounds, 4);
        assert!(config.reset_heap_on_failure);
    }
}
