//! Entity handle.

use super::id::EntityId;
use super::reference::RelationValue;
use crate::error::CoreResult;
use parking_lot::RwLock;
use relmap_store::{Row, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
struct EntityState {
    fields: Row,
    relations: BTreeMap<String, RelationValue>,
}

struct EntityInner {
    id: EntityId,
    role: String,
    state: RwLock<EntityState>,
}

/// A user-level entity: one row of a role, plus its relation slots.
///
/// `Entity` is a shared handle. Cloning it yields another handle to the same
/// instance, and equality is identity ([`EntityId`]), never field equality.
/// Fields are addressed by field name; the schema maps them to columns.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl Entity {
    /// Creates an empty entity of `role`.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                id: EntityId::new(),
                role: role.into(),
                state: RwLock::new(EntityState::default()),
            }),
        }
    }

    /// Creates an entity of `role` with initial field values.
    pub fn from_fields(role: impl Into<String>, fields: Row) -> Self {
        let entity = Self::new(role);
        entity.inner.state.write().fields = fields;
        entity
    }

    /// Sets a field and returns the handle.
    #[must_use]
    pub fn with_field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a relation slot and returns the handle.
    #[must_use]
    pub fn with_relation(self, name: impl Into<String>, value: RelationValue) -> Self {
        self.set_relation(name, value);
        self
    }

    /// Identity token.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    /// Role (entity type tag).
    #[must_use]
    pub fn role(&self) -> &str {
        &self.inner.role
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.state.read().fields.get(field).cloned()
    }

    /// Sets a field value.
    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .state
            .write()
            .fields
            .insert(field.into(), value.into());
    }

    /// Removes a field, leaving it unset.
    pub fn unset(&self, field: &str) -> Option<Value> {
        self.inner.state.write().fields.remove(field)
    }

    pub(crate) fn replace_fields(&self, fields: Row) {
        self.inner.state.write().fields = fields;
    }

    /// Returns a copy of all fields.
    #[must_use]
    pub fn fields(&self) -> Row {
        self.inner.state.read().fields.clone()
    }

    /// Returns the relation slot, if set.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<RelationValue> {
        self.inner.state.read().relations.get(name).cloned()
    }

    /// Replaces a relation slot.
    pub fn set_relation(&self, name: impl Into<String>, value: RelationValue) {
        self.inner
            .state
            .write()
            .relations
            .insert(name.into(), value);
    }

    /// Points a to-one relation at `target`.
    pub fn set_one(&self, name: impl Into<String>, target: Option<&Entity>) {
        self.set_relation(name, RelationValue::One(target.cloned()));
    }

    /// Replaces a to-many relation.
    pub fn set_many(&self, name: impl Into<String>, targets: Vec<Entity>) {
        self.set_relation(name, RelationValue::Many(targets));
    }

    /// Returns the loaded to-one target, if any.
    #[must_use]
    pub fn related_one(&self, name: &str) -> Option<Entity> {
        match self.relation(name) {
            Some(RelationValue::One(target)) => target,
            _ => None,
        }
    }

    /// Returns the loaded to-many targets (empty when unset or deferred).
    #[must_use]
    pub fn related_many(&self, name: &str) -> Vec<Entity> {
        match self.relation(name) {
            Some(RelationValue::Many(targets)) => targets,
            _ => Vec::new(),
        }
    }

    /// Resolves a deferred relation slot in place and returns its value.
    ///
    /// # Errors
    ///
    /// Propagates the promise loader's error.
    pub fn fetch(&self, name: &str) -> CoreResult<Option<RelationValue>> {
        let promise = match self.relation(name) {
            Some(RelationValue::Deferred(promise)) => promise,
            other => return Ok(other),
        };
        // the lock is not held while the loader runs
        let value = promise.resolve()?;
        self.set_relation(name, value.clone());
        Ok(Some(value))
    }

    /// Appends `target` to a to-many relation, loading it first if deferred.
    ///
    /// # Errors
    ///
    /// Propagates the promise loader's error.
    pub fn push_related(&self, name: &str, target: &Entity) -> CoreResult<()> {
        let mut targets = match self.fetch(name)? {
            Some(RelationValue::Many(targets)) => targets,
            Some(RelationValue::One(one)) => one.into_iter().collect(),
            _ => Vec::new(),
        };
        if !targets.contains(target) {
            targets.push(target.clone());
        }
        self.set_many(name, targets);
        Ok(())
    }

    /// Removes `target` from a to-many relation, loading it first if
    /// deferred. Returns true if it was present.
    ///
    /// # Errors
    ///
    /// Propagates the promise loader's error.
    pub fn remove_related(&self, name: &str, target: &Entity) -> CoreResult<bool> {
        let Some(RelationValue::Many(mut targets)) = self.fetch(name)? else {
            return Ok(false);
        };
        let before = targets.len();
        targets.retain(|t| t != target);
        let removed = targets.len() != before;
        self.set_many(name, targets);
        Ok(removed)
    }

    /// Returns the names of all set relation slots.
    #[must_use]
    pub fn relation_names(&self) -> Vec<String> {
        self.inner.state.read().relations.keys().cloned().collect()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Entity {
    // relations are omitted: cyclic graphs would recurse forever
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Entity")
            .field("role", &self.inner.role)
            .field("id", &self.inner.id)
            .field("fields", &state.fields)
            .field("relations", &state.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Promise;
    use relmap_store::row;

    #[test]
    fn clones_share_identity_and_state() {
        let a = Entity::new("user").with_field("name", "ann");
        let b = a.clone();
        b.set("name", "bob");
        assert_eq!(a, b);
        assert_eq!(a.get("name"), Some(Value::from("bob")));
    }

    #[test]
    fn equal_fields_are_not_equal_entities() {
        let a = Entity::new("user").with_field("id", 1);
        let b = Entity::new("user").with_field("id", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn to_one_and_to_many_slots() {
        let user = Entity::new("user");
        let post = Entity::new("post");
        post.set_one("author", Some(&user));
        assert_eq!(post.related_one("author"), Some(user.clone()));

        user.push_related("posts", &post).unwrap();
        user.push_related("posts", &post).unwrap();
        assert_eq!(user.related_many("posts").len(), 1);
        assert!(user.remove_related("posts", &post).unwrap());
        assert!(user.related_many("posts").is_empty());
    }

    #[test]
    fn fetch_resolves_deferred_slot() {
        let user = Entity::new("user");
        let promise = Promise::new("post", row! { "user_id" => 1 })
            .with_loader(|_| Ok(RelationValue::Many(vec![Entity::new("post")])));
        user.set_relation("posts", RelationValue::Deferred(promise));

        let value = user.fetch("posts").unwrap().unwrap();
        assert!(value.is_loaded());
        assert_eq!(user.related_many("posts").len(), 1);
    }

    #[test]
    fn cyclic_graph_debug_terminates() {
        let a = Entity::new("node");
        let b = Entity::new("node");
        a.set_one("next", Some(&b));
        b.set_one("next", Some(&a));
        let text = format!("{a:?}");
        assert!(text.contains("next"));
    }

    #[test]
    fn from_fields_and_unset() {
        let e = Entity::from_fields("tag", row! { "name" => "rust" });
        assert_eq!(e.unset("name"), Some(Value::from("rust")));
        assert!(e.fields().is_empty());
    }
}
