//! Row-store trait definition.

use crate::error::StoreResult;
use crate::statement::{Execution, Select, Statement};
use crate::value::Row;

/// The relational row store consumed by the persistence engine.
///
/// A row store executes one structured statement at a time. It knows
/// nothing about entities or relations; rendering SQL, binding parameters
/// and casting column types are the implementor's concern.
///
/// # Invariants
///
/// - `execute` either applies the whole statement or fails without effect
/// - an insert into a table with a store-generated key reports that key in
///   [`Execution::last_insert_id`]
/// - `rollback` discards every statement executed since `begin`
/// - Implementations must be `Send + Sync`; methods take `&self` and use
///   interior locking so one handle can be shared with lazy loaders
///
/// # Implementors
///
/// - [`super::InMemoryRowStore`] - For testing and ephemeral use
pub trait RowStore: Send + Sync {
    /// Executes a write statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement violates a constraint or the
    /// driver fails.
    fn execute(&self, statement: &Statement) -> StoreResult<Execution>;

    /// Fetches rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or the driver fails.
    fn query(&self, select: &Select) -> StoreResult<Vec<Row>>;

    /// Begins a physical transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already active.
    fn begin(&self) -> StoreResult<()>;

    /// Commits the active transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active.
    fn commit(&self) -> StoreResult<()>;

    /// Rolls back the active transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active.
    fn rollback(&self) -> StoreResult<()>;

    /// Returns true while a transaction is active.
    fn in_transaction(&self) -> bool;
}
