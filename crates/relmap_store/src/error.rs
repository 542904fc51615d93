//! Error types for row-store operations.

use thiserror::Error;

/// Result type for row-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while executing statements against a row store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The statement references a table that does not exist.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The statement references a column the table does not declare.
    #[error("unknown column {column} in table {table}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A NOT NULL column received a null value.
    #[error("column {table}.{column} cannot be null")]
    NotNullViolation {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A primary key value is already taken.
    #[error("duplicate primary key in table {table}: {key}")]
    DuplicateKey {
        /// Table name.
        table: String,
        /// Rendered key value.
        key: String,
    },

    /// A foreign key points to a missing row, or a referenced row was deleted.
    #[error("foreign key violation on {table}({columns}) referencing {ref_table}")]
    ForeignKeyViolation {
        /// Referencing table.
        table: String,
        /// Referencing columns, comma separated.
        columns: String,
        /// Referenced table.
        ref_table: String,
    },

    /// `commit` or `rollback` was called without an active transaction.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// `begin` was called while a transaction is already active.
    #[error("a transaction is already active")]
    TransactionAlreadyActive,

    /// A failure injected by a test harness.
    #[error("injected failure: {0}")]
    Injected(String),

    /// Any other driver-level failure.
    #[error("backend error: {0}")]
    Backend(String),
}
