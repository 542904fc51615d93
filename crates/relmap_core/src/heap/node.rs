//! Tracked per-entity state.

use crate::entity::Entity;
use crate::schema::EntitySchema;
use relmap_store::{Row, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Persistence status of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// Never persisted.
    New,
    /// Persisted and tracked.
    Managed,
    /// An insert is planned in the current run.
    ScheduledForInsert,
    /// An update is planned in the current run.
    ScheduledForUpdate,
    /// A delete is planned in the current run.
    ScheduledForDelete,
    /// Physically deleted. Deleted nodes are evicted from the heap.
    Deleted,
}

impl NodeStatus {
    /// Returns true for any `Scheduled*` status.
    #[must_use]
    pub const fn is_scheduled(self) -> bool {
        matches!(
            self,
            Self::ScheduledForInsert | Self::ScheduledForUpdate | Self::ScheduledForDelete
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Managed => "managed",
            Self::ScheduledForInsert => "scheduled-for-insert",
            Self::ScheduledForUpdate => "scheduled-for-update",
            Self::ScheduledForDelete => "scheduled-for-delete",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Last persisted state of a relation slot.
#[derive(Debug, Clone, Default)]
pub enum RelationState {
    /// Never loaded; previous links are unknown.
    #[default]
    Unloaded,
    /// Last persisted to-one link.
    One(Option<Entity>),
    /// Last persisted to-many links.
    Many(Vec<Entity>),
}

impl RelationState {
    /// Linked entities, empty when unloaded.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        match self {
            Self::Unloaded => Vec::new(),
            Self::One(one) => one.iter().cloned().collect(),
            Self::Many(many) => many.clone(),
        }
    }

    /// Returns true if the previous links are known.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        !matches!(self, Self::Unloaded)
    }
}

/// Tracked metadata for one entity instance.
///
/// `data` is keyed by field name and holds the last values known to be in
/// storage. It is the baseline for diffs.
#[derive(Debug, Clone)]
pub struct Node {
    /// Role of the entity.
    pub role: String,
    /// Current status.
    pub status: NodeStatus,
    /// Last persisted field values.
    pub data: Row,
    /// Last persisted relation links.
    pub relations: BTreeMap<String, RelationState>,
}

impl Node {
    /// Creates a node.
    pub fn new(role: impl Into<String>, status: NodeStatus, data: Row) -> Self {
        Self {
            role: role.into(),
            status,
            data,
            relations: BTreeMap::new(),
        }
    }

    /// Returns true if the row exists in storage.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        matches!(
            self.status,
            NodeStatus::Managed | NodeStatus::ScheduledForUpdate | NodeStatus::ScheduledForDelete
        )
    }

    /// Persisted values of `fields`, if all are known and non-null.
    #[must_use]
    pub fn key(&self, fields: &[String]) -> Option<Vec<Value>> {
        EntitySchema::key_of(&self.data, fields)
    }

    /// Last persisted state of relation `name`.
    #[must_use]
    pub fn relation(&self, name: &str) -> &RelationState {
        static UNLOADED: RelationState = RelationState::Unloaded;
        self.relations.get(name).unwrap_or(&UNLOADED)
    }

    /// Persisted value of `field`, `Null` when unknown.
    #[must_use]
    pub fn value(&self, field: &str) -> Value {
        self.data.get(field).cloned().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_store::row;

    #[test]
    fn key_needs_all_columns() {
        let node = Node::new("pair", NodeStatus::Managed, row! { "a" => 1, "b" => 2 });
        let fields = vec!["a".to_string(), "b".to_string()];
        assert_eq!(node.key(&fields), Some(vec![Value::Integer(1), Value::Integer(2)]));
        assert_eq!(node.key(&["c".to_string()]), None);
        assert!(node.is_persisted());
    }

    #[test]
    fn relation_defaults_to_unloaded() {
        let node = Node::new("user", NodeStatus::New, Row::new());
        assert!(!node.relation("posts").is_loaded());
        assert!(node.relation("posts").entities().is_empty());
        assert!(!node.is_persisted());
        assert_eq!(node.value("name"), Value::Null);
    }

    #[test]
    fn scheduled_statuses() {
        assert!(NodeStatus::ScheduledForDelete.is_scheduled());
        assert!(!NodeStatus::Managed.is_scheduled());
        assert_eq!(NodeStatus::ScheduledForInsert.to_string(), "scheduled-for-insert");
    }
}
