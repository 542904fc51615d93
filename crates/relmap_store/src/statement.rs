//! Structured write statements and selects.

use crate::value::{Row, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// INSERT.
    Insert,
    /// UPDATE.
    Update,
    /// DELETE.
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Insert => write!(f, "insert"),
            StatementKind::Update => write!(f, "update"),
            StatementKind::Delete => write!(f, "delete"),
        }
    }
}

/// A single write against one table.
///
/// Criteria are conjunctions of column equalities; that is all the
/// persistence engine ever needs to address a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Insert one row.
    Insert {
        /// Target table.
        table: String,
        /// Column values.
        values: Row,
    },
    /// Update rows matching `criteria`.
    Update {
        /// Target table.
        table: String,
        /// Columns to set.
        values: Row,
        /// Equality criteria.
        criteria: Row,
    },
    /// Delete rows matching `criteria`.
    Delete {
        /// Target table.
        table: String,
        /// Equality criteria.
        criteria: Row,
    },
}

impl Statement {
    /// Creates an insert statement.
    pub fn insert(table: impl Into<String>, values: Row) -> Self {
        Statement::Insert {
            table: table.into(),
            values,
        }
    }

    /// Creates an update statement.
    pub fn update(table: impl Into<String>, values: Row, criteria: Row) -> Self {
        Statement::Update {
            table: table.into(),
            values,
            criteria,
        }
    }

    /// Creates a delete statement.
    pub fn delete(table: impl Into<String>, criteria: Row) -> Self {
        Statement::Delete {
            table: table.into(),
            criteria,
        }
    }

    /// Returns the statement kind.
    #[must_use]
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Insert { .. } => StatementKind::Insert,
            Statement::Update { .. } => StatementKind::Update,
            Statement::Delete { .. } => StatementKind::Delete,
        }
    }

    /// Returns the target table.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    /// Returns the values written by an insert or update.
    #[must_use]
    pub fn values(&self) -> Option<&Row> {
        match self {
            Statement::Insert { values, .. } | Statement::Update { values, .. } => Some(values),
            Statement::Delete { .. } => None,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn pairs(row: &Row, sep: &str) -> String {
            row.iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect::<Vec<_>>()
                .join(sep)
        }
        match self {
            Statement::Insert { table, values } => {
                let cols: Vec<_> = values.keys().map(String::as_str).collect();
                let vals: Vec<_> = values.values().map(Value::to_string).collect();
                write!(f, "INSERT INTO {table} ({}) VALUES ({})", cols.join(", "), vals.join(", "))
            }
            Statement::Update {
                table,
                values,
                criteria,
            } => write!(
                f,
                "UPDATE {table} SET {} WHERE {}",
                pairs(values, ", "),
                pairs(criteria, " AND ")
            ),
            Statement::Delete { table, criteria } => {
                write!(f, "DELETE FROM {table} WHERE {}", pairs(criteria, " AND "))
            }
        }
    }
}

/// An equality-filtered read of one table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Select {
    /// Source table.
    pub table: String,
    /// Equality criteria; empty selects every row.
    pub criteria: Row,
}

impl Select {
    /// Selects every row of `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            criteria: Row::new(),
        }
    }

    /// Adds an equality criterion.
    #[must_use]
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criteria.insert(column.into(), value.into());
        self
    }

    /// Replaces all criteria.
    #[must_use]
    pub fn with_criteria(mut self, criteria: Row) -> Self {
        self.criteria = criteria;
        self
    }
}

/// Outcome of one executed statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Execution {
    /// Number of rows inserted, updated or deleted.
    pub affected_rows: u64,
    /// Key generated by the store for an insert, if any.
    pub last_insert_id: Option<Value>,
}

impl Execution {
    /// Creates an outcome for `affected_rows` rows without a generated key.
    #[must_use]
    pub const fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            last_insert_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn display_insert() {
        let stmt = Statement::insert("users", row! { "id" => 1, "name" => "ann" });
        assert_eq!(stmt.to_string(), "INSERT INTO users (id, name) VALUES (1, 'ann')");
        assert_eq!(stmt.kind(), StatementKind::Insert);
    }

    #[test]
    fn display_update_and_delete() {
        let upd = Statement::update("users", row! { "name" => "bob" }, row! { "id" => 1 });
        assert_eq!(upd.to_string(), "UPDATE users SET name = 'bob' WHERE id = 1");
        let del = Statement::delete("users", row! { "a" => 1, "b" => 2 });
        assert_eq!(del.to_string(), "DELETE FROM users WHERE a = 1 AND b = 2");
        assert!(del.values().is_none());
    }

    #[test]
    fn select_builder() {
        let sel = Select::new("posts").filter("user_id", 3);
        assert_eq!(sel.table, "posts");
        assert_eq!(sel.criteria.get("user_id"), Some(&Value::Integer(3)));
    }
}
