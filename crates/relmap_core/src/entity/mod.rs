//! Entities, identity tokens and lazy relation values.

mod id;
mod record;
mod reference;

pub use id::EntityId;
pub use record::Entity;
pub use reference::{Loader, Promise, RelationValue};
