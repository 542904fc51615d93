//! # Relmap Store
//!
//! Row-store boundary for relmap.
//!
//! The persistence engine never builds SQL. It hands structured
//! [`Statement`]s to a [`RowStore`] and reads rows back through [`Select`].
//! A SQL driver adapter implements [`RowStore`] by rendering those
//! statements; this crate ships the trait plus an in-memory implementation.
//!
//! ## Design Principles
//!
//! - Stores execute one statement at a time and report affected rows and
//!   generated keys
//! - No knowledge of entities, relations or the identity map
//! - Must be `Send + Sync` so a handle can be shared by the engine and by
//!   lazy relation loaders
//! - Transactions are driven from outside (`begin` / `commit` / `rollback`)
//!
//! ## Available Stores
//!
//! - [`InMemoryRowStore`] - Tables in memory with key generation and
//!   NOT NULL / primary key / foreign key enforcement
//!
//! ## Example
//!
//! ```rust
//! use relmap_store::{InMemoryRowStore, RowStore, Select, Statement, TableDef, Value, row};
//!
//! let store = InMemoryRowStore::new();
//! store.create_table(TableDef::new("users").columns(["id", "name"]).primary_key(["id"]).auto_increment("id"));
//!
//! let exec = store.execute(&Statement::insert("users", row! { "name" => "ann" })).unwrap();
//! assert_eq!(exec.last_insert_id, Some(Value::Integer(1)));
//!
//! let rows = store.query(&Select::new("users")).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod statement;
mod store;
mod value;

pub use error::{StoreError, StoreResult};
pub use memory::{ForeignKey, InMemoryRowStore, TableDef};
pub use statement::{Execution, Select, Statement, StatementKind};
pub use store::RowStore;
pub use value::{Row, Value};
