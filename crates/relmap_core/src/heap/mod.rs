//! Identity map of tracked entities.
//!
//! The [`Heap`] maps an entity's identity token to its [`Node`]. It holds at
//! most one node per entity and iterates in registration order so that every
//! walk over it is deterministic.
//!
//! Persisted values are indexed by `(role, field, value)` so that
//! [`Heap::find_by_key`] does not scan the heap. Values written through
//! [`Heap::get_mut`] or [`Heap::node_mut`] are picked up by a full reindex
//! on the next lookup.
//!
//! A heap is not synchronized. Transactions share one through
//! [`SharedHeap`] and hold its lock for the duration of a run.

mod node;

pub use node::{Node, NodeStatus, RelationState};

use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use relmap_store::{Row, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Heap shared between transactions and the mapper.
pub type SharedHeap = Arc<Mutex<Heap>>;

/// `(role, field, value)`; values are rendered since floats have no `Hash`.
type IndexKey = (String, String, String);

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    entity: Entity,
    node: Node,
}

/// Identity map from entity to node.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    slots: HashMap<EntityId, Slot>,
    order: BTreeMap<u64, EntityId>,
    next_seq: u64,
    index: HashMap<IndexKey, BTreeSet<u64>>,
    stale: bool,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty heap behind a shared lock.
    #[must_use]
    pub fn shared() -> SharedHeap {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Tracks a never-persisted entity with status `New`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateNode`] if the entity is already tracked.
    pub fn register(&mut self, entity: &Entity, role: &str, data: Row) -> CoreResult<&mut Node> {
        self.insert(entity, Node::new(role, NodeStatus::New, data))
    }

    /// Tracks an entity loaded from storage with status `Managed`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateNode`] if the entity is already tracked.
    pub fn attach(&mut self, entity: &Entity, role: &str, data: Row) -> CoreResult<&mut Node> {
        self.insert(entity, Node::new(role, NodeStatus::Managed, data))
    }

    fn insert(&mut self, entity: &Entity, node: Node) -> CoreResult<&mut Node> {
        let id = entity.id();
        if let Some(existing) = self.slots.get(&id) {
            return Err(CoreError::DuplicateNode {
                entity: id,
                role: node.role,
                existing_role: existing.node.role.clone(),
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, id);
        index_values(&mut self.index, seq, &node.role, &node.data);
        let slot = self.slots.entry(id).or_insert(Slot {
            seq,
            entity: entity.clone(),
            node,
        });
        Ok(&mut slot.node)
    }

    /// Node of `entity`.
    #[must_use]
    pub fn get(&self, entity: &Entity) -> Option<&Node> {
        self.slots.get(&entity.id()).map(|s| &s.node)
    }

    /// Mutable node of `entity`.
    pub fn get_mut(&mut self, entity: &Entity) -> Option<&mut Node> {
        let slot = self.slots.get_mut(&entity.id())?;
        self.stale = true;
        Some(&mut slot.node)
    }

    /// Node by identity token.
    #[must_use]
    pub fn node(&self, id: EntityId) -> Option<&Node> {
        self.slots.get(&id).map(|s| &s.node)
    }

    /// Mutable node by identity token.
    pub fn node_mut(&mut self, id: EntityId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(&id)?;
        self.stale = true;
        Some(&mut slot.node)
    }

    /// Tracked entity handle by identity token.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(&id).map(|s| &s.entity)
    }

    /// Returns true if `entity` is tracked.
    #[must_use]
    pub fn has(&self, entity: &Entity) -> bool {
        self.slots.contains_key(&entity.id())
    }

    /// Sets the status of a tracked `entity`. Returns false if untracked.
    pub fn set_status(&mut self, entity: &Entity, status: NodeStatus) -> bool {
        match self.slots.get_mut(&entity.id()) {
            Some(slot) => {
                slot.node.status = status;
                true
            }
            None => false,
        }
    }

    /// Merges written `values` into the persisted data of `entity`.
    pub fn store_values(&mut self, entity: &Entity, values: Row) {
        if let Some(slot) = self.slots.get_mut(&entity.id()) {
            let replaced: Row = values
                .keys()
                .filter_map(|field| slot.node.data.get_key_value(field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect();
            unindex_values(&mut self.index, slot.seq, &slot.node.role, &replaced);
            index_values(&mut self.index, slot.seq, &slot.node.role, &values);
            slot.node.data.extend(values);
        }
    }

    /// Records the persisted links of relation `name` on node `id`.
    pub fn store_relation(&mut self, id: EntityId, name: impl Into<String>, state: RelationState) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.node.relations.insert(name.into(), state);
        }
    }

    /// Evicts `entity`, returning its node.
    pub fn remove(&mut self, entity: &Entity) -> Option<Node> {
        let slot = self.slots.remove(&entity.id())?;
        self.order.remove(&slot.seq);
        unindex_values(&mut self.index, slot.seq, &slot.node.role, &slot.node.data);
        Some(slot.node)
    }

    /// Finalizes a completed run: scheduled nodes become `Managed`, deleted
    /// nodes are evicted.
    pub fn clean(&mut self) {
        let mut deleted = Vec::new();
        for slot in self.slots.values_mut() {
            match slot.node.status {
                NodeStatus::Deleted => deleted.push(slot.entity.clone()),
                status if status.is_scheduled() => slot.node.status = NodeStatus::Managed,
                _ => {}
            }
        }
        for entity in &deleted {
            self.remove(entity);
        }
    }

    /// Discards scheduling state after a failed run. Planned inserts revert
    /// to `New` with no persisted data; planned updates and deletes revert
    /// to `Managed`.
    pub fn reset(&mut self) {
        for slot in self.slots.values_mut() {
            match slot.node.status {
                NodeStatus::ScheduledForInsert => {
                    unindex_values(&mut self.index, slot.seq, &slot.node.role, &slot.node.data);
                    slot.node.status = NodeStatus::New;
                    slot.node.data.clear();
                    slot.node.relations.clear();
                }
                NodeStatus::ScheduledForUpdate | NodeStatus::ScheduledForDelete => {
                    slot.node.status = NodeStatus::Managed;
                }
                _ => {}
            }
        }
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Tracked entities and nodes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&Entity, &Node)> {
        self.order
            .values()
            .filter_map(|id| self.slots.get(id))
            .map(|slot| (&slot.entity, &slot.node))
    }

    /// Finds a persisted entity of `role` whose `fields` hold `key`. The
    /// earliest registered match wins.
    pub fn find_by_key(&mut self, role: &str, fields: &[String], key: &[Value]) -> Option<Entity> {
        let matches = |node: &Node| {
            node.role == role
                && node.status != NodeStatus::New
                && node.key(fields).as_deref() == Some(key)
        };
        let (Some(field), Some(value)) = (fields.first(), key.first()) else {
            return self
                .iter()
                .find(|(_, node)| matches(node))
                .map(|(entity, _)| entity.clone());
        };
        if self.stale {
            self.reindex();
        }
        let candidates = self.index.get(&index_key(role, field, value))?;
        candidates
            .iter()
            .filter_map(|seq| self.order.get(seq))
            .filter_map(|id| self.slots.get(id))
            .find(|slot| matches(&slot.node))
            .map(|slot| slot.entity.clone())
    }

    fn reindex(&mut self) {
        self.index.clear();
        for slot in self.slots.values() {
            index_values(&mut self.index, slot.seq, &slot.node.role, &slot.node.data);
        }
        self.stale = false;
    }

    /// Captures nodes and entity fields of `entities`.
    pub fn checkpoint<'a, I>(&self, entities: I) -> HeapCheckpoint
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let entries = entities
            .into_iter()
            .map(|entity| CheckpointEntry {
                entity: entity.clone(),
                node: self.get(entity).cloned(),
                fields: entity.fields(),
            })
            .collect();
        HeapCheckpoint { entries }
    }

    /// Restores what [`Heap::checkpoint`] captured.
    pub fn restore(&mut self, checkpoint: HeapCheckpoint) {
        for entry in checkpoint.entries {
            entry.entity.replace_fields(entry.fields);
            let id = entry.entity.id();
            // a node that survived keeps its place in the iteration order
            let previous = self.slots.get(&id).map(|slot| slot.seq);
            self.remove(&entry.entity);
            let Some(node) = entry.node else {
                continue;
            };
            let seq = previous.unwrap_or_else(|| {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            });
            self.order.insert(seq, id);
            index_values(&mut self.index, seq, &node.role, &node.data);
            self.slots.insert(
                id,
                Slot {
                    seq,
                    entity: entry.entity,
                    node,
                },
            );
        }
    }
}

#[derive(Debug)]
struct CheckpointEntry {
    entity: Entity,
    node: Option<Node>,
    fields: Row,
}

/// Snapshot of part of a heap and of the entities it tracks.
#[derive(Debug, Default)]
pub struct HeapCheckpoint {
    entries: Vec<CheckpointEntry>,
}

impl HeapCheckpoint {
    /// Number of captured entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn index_key(role: &str, field: &str, value: &Value) -> IndexKey {
    (role.to_string(), field.to_string(), format!("{value:?}"))
}

fn index_values(index: &mut HashMap<IndexKey, BTreeSet<u64>>, seq: u64, role: &str, values: &Row) {
    for (field, value) in values {
        if !value.is_null() {
            index.entry(index_key(role, field, value)).or_default().insert(seq);
        }
    }
}

fn unindex_values(index: &mut HashMap<IndexKey, BTreeSet<u64>>, seq: u64, role: &str, values: &Row) {
    for (field, value) in values {
        let key = index_key(role, field, value);
        if let Some(entries) = index.get_mut(&key) {
            entries.remove(&seq);
            if entries.is_empty() {
                index.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_store::row;

    #[test]
    fn register_rejects_duplicates() {
        let mut heap = Heap::new();
        let user = Entity::new("user");
        heap.register(&user, "user", Row::new()).unwrap();
        let err = heap.attach(&user, "admin", Row::new()).unwrap_err();
        match err {
            CoreError::DuplicateNode {
                role,
                existing_role,
                ..
            } => {
                assert_eq!(role, "admin");
                assert_eq!(existing_role, "user");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn lookup_is_by_identity() {
        let mut heap = Heap::new();
        let a = Entity::new("user").with_field("id", 1);
        let b = Entity::new("user").with_field("id", 1);
        heap.attach(&a, "user", row! { "id" => 1 }).unwrap();
        assert!(heap.has(&a));
        assert!(heap.has(&a.clone()));
        assert!(!heap.has(&b));
        assert_eq!(heap.get(&a).unwrap().status, NodeStatus::Managed);
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut heap = Heap::new();
        let entities: Vec<_> = (0..5).map(|_| Entity::new("n")).collect();
        for e in &entities {
            heap.register(e, "n", Row::new()).unwrap();
        }
        heap.remove(&entities[2]);
        let seen: Vec<_> = heap.iter().map(|(e, _)| e.clone()).collect();
        assert_eq!(
            seen,
            vec![
                entities[0].clone(),
                entities[1].clone(),
                entities[3].clone(),
                entities[4].clone()
            ]
        );
    }

    #[test]
    fn clean_and_reset() {
        let mut heap = Heap::new();
        let inserted = Entity::new("n");
        let updated = Entity::new("n");
        let deleted = Entity::new("n");
        heap.register(&inserted, "n", Row::new()).unwrap().status = NodeStatus::ScheduledForInsert;
        heap.attach(&updated, "n", row! { "id" => 1 }).unwrap().status =
            NodeStatus::ScheduledForUpdate;
        heap.attach(&deleted, "n", row! { "id" => 2 }).unwrap().status = NodeStatus::Deleted;

        let mut failed = heap.clone();
        failed.get_mut(&inserted).unwrap().data.insert("id".into(), Value::Integer(3));
        failed.reset();
        assert_eq!(failed.get(&inserted).unwrap().status, NodeStatus::New);
        assert!(failed.get(&inserted).unwrap().data.is_empty());
        assert_eq!(failed.get(&updated).unwrap().status, NodeStatus::Managed);

        heap.clean();
        assert_eq!(heap.get(&inserted).unwrap().status, NodeStatus::Managed);
        assert_eq!(heap.get(&updated).unwrap().status, NodeStatus::Managed);
        assert!(!heap.has(&deleted));
    }

    #[test]
    fn find_by_key_skips_new_nodes() {
        let mut heap = Heap::new();
        let stored = Entity::new("user");
        let fresh = Entity::new("user");
        heap.register(&fresh, "user", row! { "id" => 1 }).unwrap();
        heap.attach(&stored, "user", row! { "id" => 1 }).unwrap();
        let key = ["id".to_string()];
        assert_eq!(heap.find_by_key("user", &key, &[Value::Integer(1)]), Some(stored));
        assert_eq!(heap.find_by_key("post", &key, &[Value::Integer(1)]), None);
    }

    #[test]
    fn find_by_key_follows_stored_values() {
        let mut heap = Heap::new();
        let first = Entity::new("slot");
        let second = Entity::new("slot");
        heap.attach(&first, "slot", row! { "region" => "eu", "num" => 1 }).unwrap();
        heap.attach(&second, "slot", row! { "region" => "eu", "num" => 2 }).unwrap();
        let key = ["region".to_string(), "num".to_string()];
        let eu = |n: i64| [Value::from("eu"), Value::Integer(n)];

        assert_eq!(heap.find_by_key("slot", &key, &eu(2)), Some(second.clone()));

        heap.store_values(&second, row! { "num" => 3 });
        assert_eq!(heap.find_by_key("slot", &key, &eu(2)), None);
        assert_eq!(heap.find_by_key("slot", &key, &eu(3)), Some(second.clone()));

        heap.get_mut(&first).unwrap().data.insert("num".into(), Value::Integer(7));
        assert_eq!(heap.find_by_key("slot", &key, &eu(7)), Some(first.clone()));

        // both share the region; the earlier registration is found first
        let region = ["region".to_string()];
        assert_eq!(heap.find_by_key("slot", &region, &[Value::from("eu")]), Some(first.clone()));

        heap.remove(&first);
        assert_eq!(heap.find_by_key("slot", &key, &eu(7)), None);
        assert_eq!(heap.find_by_key("slot", &region, &[Value::from("eu")]), Some(second));
    }

    #[test]
    fn restore_keeps_the_registration_order() {
        let mut heap = Heap::new();
        let entities: Vec<_> = (0..3).map(|_| Entity::new("n")).collect();
        for (i, e) in entities.iter().enumerate() {
            heap.attach(e, "n", row! { "id" => i as i64 }).unwrap();
        }
        let checkpoint = heap.checkpoint([&entities[0]]);
        heap.store_values(&entities[0], row! { "id" => 9 });
        heap.restore(checkpoint);

        let seen: Vec<_> = heap.iter().map(|(e, _)| e.clone()).collect();
        assert_eq!(seen, entities);
        let id = ["id".to_string()];
        assert_eq!(heap.find_by_key("n", &id, &[Value::Integer(0)]), Some(entities[0].clone()));
        assert_eq!(heap.find_by_key("n", &id, &[Value::Integer(9)]), None);
    }

    #[test]
    fn checkpoint_restores_nodes_and_fields() {
        let mut heap = Heap::new();
        let tracked = Entity::new("user").with_field("name", "ann");
        let added = Entity::new("user");
        heap.attach(&tracked, "user", row! { "name" => "ann" }).unwrap();

        let checkpoint = heap.checkpoint([&tracked, &added]);
        assert_eq!(checkpoint.len(), 2);

        tracked.set("name", "bob");
        heap.get_mut(&tracked).unwrap().data.insert("name".into(), "bob".into());
        heap.remove(&tracked);
        heap.register(&added, "user", Row::new()).unwrap();

        heap.restore(checkpoint);
        assert_eq!(tracked.get("name"), Some(Value::from("ann")));
        assert_eq!(heap.get(&tracked).unwrap().value("name"), Value::from("ann"));
        assert!(!heap.has(&added));
    }
}
