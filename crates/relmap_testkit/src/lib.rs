//! # Relmap Testkit
//!
//! Test utilities for relmap.
//!
//! This crate provides:
//! - Ready-made schemas with matching in-memory tables ([`Fixture`])
//! - A row store wrapper that injects failures ([`FaultyStore`])
//! - Property-based test generators using proptest
//! - A tracing initializer for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relmap_testkit::prelude::*;
//!
//! #[test]
//! fn pair_resolves() {
//!     let fx = Fixture::pair();
//!     let (a, b) = fx.new_pair();
//!     let mut tx = fx.transaction();
//!     tx.persist(&a);
//!     let summary = tx.run().unwrap();
//!     assert_eq!(summary.split_updates, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use relmap_core::{
        row, CoreError, Entity, NodeStatus, RelationValue, Row, RowStore, RunSummary, Value,
    };
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // another harness may already have installed a subscriber
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
