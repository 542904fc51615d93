//! # Relmap Core
//!
//! Persistence transaction engine for relmap.
//!
//! This crate provides:
//! - An identity map ([`Heap`]) of tracked entity [`Node`]s
//! - Relation resolvers for belongs-to, has-one, has-many, many-to-many,
//!   refers-to and embedded relations
//! - A command graph builder that turns entity graphs into write commands
//! - A sequencer that orders commands by foreign-key dependency and splits
//!   dependency cycles into insert + deferred update
//! - An executor that runs the plan against a [`RowStore`] and keeps the heap
//!   in sync
//!
//! ## Example
//!
//! ```rust,ignore
//! use relmap_core::{Entity, Heap, Transaction};
//!
//! let user = Entity::new("user").with_field("name", "ann");
//! let post = Entity::new("post").with_field("title", "hello");
//! post.set_one("author", Some(&user));
//!
//! let mut tx = Transaction::new(store, schema, Heap::shared());
//! tx.persist(&post);
//! let summary = tx.run()?;
//! assert_eq!(summary.inserts, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod command;
mod config;
mod entity;
mod error;
mod executor;
mod heap;
mod mapper;
mod relation;
mod schema;
mod sequencer;
mod stats;
mod transaction;
mod types;

pub use builder::{BuiltGraph, GraphBuilder, RelationUpdate};
pub use command::{Binding, Command, CommandGraph, CommandKind, Fragment, Phase, Scope};
pub use config::Config;
pub use entity::{Entity, EntityId, Loader, Promise, RelationValue};
pub use error::{CoreError, CoreResult};
pub use executor::{Executor, RunSummary};
pub use heap::{Heap, HeapCheckpoint, Node, NodeStatus, RelationState, SharedHeap};
pub use mapper::Mapper;
pub use relation::{resolver_for, Position, Resolver};
pub use schema::{
    EntitySchema, RelationKind, RelationSchema, Schema, SchemaBuilder, SchemaError, ThroughSchema,
};
pub use sequencer::{Plan, Sequencer};
pub use stats::{EngineStats, StatsSnapshot};
pub use transaction::Transaction;
pub use types::CommandId;

pub use relmap_store::{row, Row, RowStore, StoreError, Value};
