//! Failure injection for row stores.

use relmap_store::{Execution, InMemoryRowStore, Row, RowStore, Select, Statement, StoreError, StoreResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// When a [`FaultyStore`] fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Fail the n-th executed statement (1-based).
    pub at_statement: Option<usize>,
    /// Fail every statement against this table.
    pub on_table: Option<String>,
}

impl Faults {
    /// Fails the n-th executed statement (1-based).
    #[must_use]
    pub fn at_statement(n: usize) -> Self {
        Self {
            at_statement: Some(n),
            on_table: None,
        }
    }

    /// Fails every statement against `table`.
    #[must_use]
    pub fn on_table(table: impl Into<String>) -> Self {
        Self {
            at_statement: None,
            on_table: Some(table.into()),
        }
    }
}

/// Wraps an [`InMemoryRowStore`] and fails selected statements with
/// [`StoreError::Injected`]. A failed statement never reaches the inner
/// store, so its statement log only shows what succeeded.
#[derive(Debug)]
pub struct FaultyStore {
    inner: InMemoryRowStore,
    faults: Faults,
    attempts: AtomicUsize,
}

impl FaultyStore {
    /// Creates a wrapper over `inner`.
    pub fn new(inner: InMemoryRowStore, faults: Faults) -> Self {
        Self {
            inner,
            faults,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of statements the engine tried to execute.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    pub fn inner(&self) -> &InMemoryRowStore {
        &self.inner
    }
}

impl RowStore for FaultyStore {
    fn execute(&self, statement: &Statement) -> StoreResult<Execution> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.faults.at_statement == Some(attempt) {
            debug!(attempt, %statement, "failing statement");
            return Err(StoreError::Injected(format!("statement {attempt}: {statement}")));
        }
        if self.faults.on_table.as_deref() == Some(statement.table()) {
            debug!(attempt, table = statement.table(), "failing statement on table");
            return Err(StoreError::Injected(format!("table {}", statement.table())));
        }
        self.inner.execute(statement)
    }

    fn query(&self, select: &Select) -> StoreResult<Vec<Row>> {
        self.inner.query(select)
    }

    fn begin(&self) -> StoreResult<()> {
        self.inner.begin()
    }

    fn commit(&self) -> StoreResult<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> StoreResult<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}
