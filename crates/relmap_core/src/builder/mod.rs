//! Command graph construction.
//!
//! The builder walks root entities and their relation graphs. Each visited
//! entity gets exactly one own command (an insert for new entities, an
//! update carrying the field diff for persisted ones), and each relation's
//! resolver adds bindings, pivot commands, fragments and orphan handling.
//! [`GraphBuilder::finish`] then settles orphans, validates references,
//! orders deletes, prunes no-op updates and marks node statuses.

mod finish;

use crate::command::{Binding, Command, CommandGraph, Fragment};
use crate::entity::{Entity, EntityId, RelationValue};
use crate::error::{CoreError, CoreResult};
use crate::heap::{Heap, Node, RelationState};
use crate::relation::{resolver_for, Position};
use crate::schema::{EntitySchema, RelationSchema, Schema};
use crate::types::CommandId;
use relmap_store::{Row, Value};
use std::collections::HashSet;
use tracing::trace;

/// Relation state to store on a node once the run commits.
#[derive(Debug, Clone)]
pub struct RelationUpdate {
    /// Parent entity.
    pub entity: Entity,
    /// Relation name.
    pub relation: String,
    /// New persisted links.
    pub state: RelationState,
}

impl RelationUpdate {
    /// Stores the new links on the parent's node.
    pub fn apply(self, heap: &mut Heap) {
        heap.store_relation(self.entity.id(), self.relation, self.state);
    }
}

/// Result of [`GraphBuilder::finish`].
#[derive(Debug, Default)]
pub struct BuiltGraph {
    /// Commands and their dependencies.
    pub graph: CommandGraph,
    /// Relation states applied after a successful run.
    pub relation_updates: Vec<RelationUpdate>,
}

/// A related entity dropped from a has-one or has-many relation.
#[derive(Debug)]
pub(crate) struct Orphan {
    pub(crate) parent: Entity,
    pub(crate) relation: RelationSchema,
    pub(crate) child: Entity,
    /// Commands establishing the relation's new links.
    pub(crate) links: Vec<CommandId>,
}

/// Builds the command graph of one run.
pub struct GraphBuilder<'a> {
    schema: &'a Schema,
    heap: &'a mut Heap,
    graph: CommandGraph,
    visited: HashSet<EntityId>,
    visited_pairs: HashSet<(EntityId, String)>,
    deleting: HashSet<EntityId>,
    orphans: Vec<Orphan>,
    releases: Vec<(Entity, CommandId)>,
    relation_updates: Vec<RelationUpdate>,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder over `heap`.
    pub fn new(schema: &'a Schema, heap: &'a mut Heap) -> Self {
        Self {
            schema,
            heap,
            graph: CommandGraph::new(),
            visited: HashSet::new(),
            visited_pairs: HashSet::new(),
            deleting: HashSet::new(),
            orphans: Vec::new(),
            releases: Vec::new(),
            relation_updates: Vec::new(),
        }
    }

    /// Queues `entity` and everything reachable through cascading relations.
    ///
    /// # Errors
    ///
    /// Fails on unknown roles, role mismatches, or an entity that is also
    /// deleted in this run.
    pub fn persist(&mut self, entity: &Entity) -> CoreResult<()> {
        self.visit(entity)
    }

    /// Queues the delete of `entity` and the cascades of its relations.
    /// Deleting an unsaved entity is a no-op.
    ///
    /// # Errors
    ///
    /// Fails on unknown roles or an entity that is also persisted in this
    /// run.
    pub fn delete(&mut self, entity: &Entity) -> CoreResult<()> {
        self.schedule_delete(entity).map(|_| ())
    }

    pub(crate) fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub(crate) fn node(&self, entity: &Entity) -> Option<&Node> {
        self.heap.get(entity)
    }

    pub(crate) fn find_by_key(&mut self, role: &str, fields: &[String], key: &[Value]) -> Option<Entity> {
        self.heap.find_by_key(role, fields, key)
    }

    pub(crate) fn is_visited(&self, entity: &Entity) -> bool {
        self.visited.contains(&entity.id())
    }

    pub(crate) fn is_deleting(&self, entity: &Entity) -> bool {
        self.deleting.contains(&entity.id())
    }

    /// Marks `(entity, relation)` handled; false if it already was.
    pub(crate) fn enter_pair(&mut self, entity: &Entity, relation: &str) -> bool {
        self.visited_pairs.insert((entity.id(), relation.to_string()))
    }

    pub(crate) fn own_command(&self, entity: &Entity) -> Option<CommandId> {
        self.graph.own(entity)
    }

    pub(crate) fn command_mut(&mut self, id: CommandId) -> &mut Command {
        &mut self.graph[id]
    }

    pub(crate) fn command(&self, id: CommandId) -> &Command {
        &self.graph[id]
    }

    pub(crate) fn push(&mut self, command: Command) -> CommandId {
        self.graph.push(command)
    }

    pub(crate) fn visit(&mut self, entity: &Entity) -> CoreResult<()> {
        let id = entity.id();
        if !self.visited.insert(id) {
            return Ok(());
        }
        if self.deleting.contains(&id) {
            return Err(CoreError::invalid_operation(format!(
                "{} {id} is both deleted and persisted in one run",
                entity.role()
            )));
        }
        let schema = self.schema;
        let mapping = schema.entity(entity.role())?;
        if mapping.embedded {
            return Err(CoreError::invalid_operation(format!(
                "embedded {} is persisted through its parent",
                entity.role()
            )));
        }

        let fields = entity.fields();
        let command = match self.heap.get(entity) {
            Some(node) if node.is_persisted() => Command::update(entity, diff(mapping, node, &fields)),
            Some(_) => Command::insert(entity, insert_values(mapping, &fields)),
            None => {
                self.heap.register(entity, entity.role(), Row::new())?;
                Command::insert(entity, insert_values(mapping, &fields))
            }
        };
        let own = self.graph.push(command);
        trace!(command = %own, role = entity.role(), entity = %id, "visit");

        for position in [Position::Before, Position::WithParent, Position::After] {
            for relation in &mapping.relations {
                let resolver = resolver_for(relation.kind);
                if resolver.position() != position {
                    continue;
                }
                let value = resolver.extract_related(entity, relation);
                resolver.queue_changes(self, entity, relation, value.as_ref())?;
            }
        }
        Ok(())
    }

    pub(crate) fn schedule_delete(&mut self, entity: &Entity) -> CoreResult<Option<CommandId>> {
        if let Some(existing) = self.graph.delete_of(entity) {
            return Ok(Some(existing));
        }
        if self.visited.contains(&entity.id()) {
            return Err(CoreError::invalid_operation(format!(
                "{} {} is both persisted and deleted in one run",
                entity.role(),
                entity.id()
            )));
        }
        if !self.heap.get(entity).is_some_and(Node::is_persisted) {
            trace!(role = entity.role(), "delete of unsaved entity skipped");
            return Ok(None);
        }

        let schema = self.schema;
        let mapping = schema.entity(entity.role())?;
        self.deleting.insert(entity.id());
        let id = self.graph.push(Command::delete(entity));
        trace!(command = %id, role = entity.role(), "delete");
        for relation in &mapping.relations {
            resolver_for(relation.kind).queue_delete(self, entity, relation, id)?;
        }
        Ok(Some(id))
    }

    /// Points `holder`'s foreign key at `binding.source`. A link already in
    /// storage is left alone and its fields dropped from the update.
    pub(crate) fn bind(&mut self, holder: &Entity, binding: Binding) {
        let Some(own) = self.graph.own(holder) else {
            return;
        };
        if self.is_current(holder, &binding) {
            self.graph[own].strip(binding.local_fields());
        } else {
            self.graph[own].bind(binding);
        }
    }

    fn is_current(&self, holder: &Entity, binding: &Binding) -> bool {
        let (Some(node), Some(source)) = (self.heap.get(holder), self.heap.get(&binding.source))
        else {
            return false;
        };
        if !node.is_persisted() || !source.is_persisted() || self.graph.producer(binding).is_some() {
            return false;
        }
        binding.pairs.iter().all(|(local, remote)| {
            let value = source.value(remote);
            !value.is_null() && node.value(local) == value
        })
    }

    /// Registers an embedded entity and attaches its fragment to `parent`'s
    /// own command.
    pub(crate) fn embed(&mut self, parent: &Entity, child: &Entity, mapping: &EntitySchema) -> CoreResult<()> {
        let Some(own) = self.graph.own(parent) else {
            return Ok(());
        };
        let fields = child.fields();
        let values: Row = match self.heap.get(child) {
            Some(node) if node.is_persisted() => diff(mapping, node, &fields),
            Some(_) => insert_values(mapping, &fields),
            None => {
                self.heap.register(child, &mapping.role, Row::new())?;
                insert_values(mapping, &fields)
            }
        };
        if !values.is_empty() {
            self.graph[own].embedded.push(Fragment {
                entity: child.clone(),
                role: mapping.role.clone(),
                values,
            });
        }
        Ok(())
    }

    pub(crate) fn record_orphan(
        &mut self,
        parent: &Entity,
        relation: &RelationSchema,
        child: &Entity,
        links: &[CommandId],
    ) {
        self.orphans.push(Orphan {
            parent: parent.clone(),
            relation: relation.clone(),
            child: child.clone(),
            links: links.to_vec(),
        });
    }

    /// Records that `command` stops referencing `released`, so a delete of
    /// `released` must wait for it.
    pub(crate) fn record_release(&mut self, released: &Entity, command: CommandId) {
        self.releases.push((released.clone(), command));
    }

    pub(crate) fn record_state(&mut self, entity: &Entity, relation: &str, state: RelationState) {
        self.relation_updates.push(RelationUpdate {
            entity: entity.clone(),
            relation: relation.to_string(),
            state,
        });
    }
}

/// Declared fields that differ from the node's snapshot, primary key excluded.
fn diff(mapping: &EntitySchema, node: &Node, fields: &Row) -> Row {
    mapping
        .field_names()
        .filter(|field| !mapping.primary_key.iter().any(|pk| pk == field))
        .filter_map(|field| {
            let value = fields.get(field)?;
            let stored = node.data.get(field).unwrap_or(&Value::Null);
            (stored != value).then(|| (field.to_string(), value.clone()))
        })
        .collect()
}

/// Declared fields the entity holds, minus an unassigned generated key.
fn insert_values(mapping: &EntitySchema, fields: &Row) -> Row {
    mapping
        .field_names()
        .filter_map(|field| {
            let value = fields.get(field)?;
            if value.is_null() && mapping.is_generated(field) {
                return None;
            }
            Some((field.to_string(), value.clone()))
        })
        .collect()
}

/// Loaded entities of a relation value; `None` when deferred or unset.
pub(crate) fn loaded(value: Option<&RelationValue>) -> Option<Vec<Entity>> {
    value.and_then(RelationValue::loaded)
}

/// Rejects a related entity whose role differs from the relation target.
pub(crate) fn check_target(parent: &Entity, relation: &RelationSchema, related: &Entity) -> CoreResult<()> {
    if related.role() == relation.target {
        Ok(())
    } else {
        Err(CoreError::invalid_operation(format!(
            "{}.{} expects {}, got {}",
            parent.role(),
            relation.name,
            relation.target,
            related.role()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandKind, Scope};
    use crate::heap::NodeStatus;
    use relmap_store::row;

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntitySchema::new("user", "users")
                    .fields(["id", "name"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::has_many("posts", "post", ["user_id"])),
            )
            .entity(
                EntitySchema::new("post", "posts")
                    .fields(["id", "user_id", "title"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::belongs_to("author", "user", ["user_id"])),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn new_entity_is_inserted_without_its_unassigned_key() {
        let schema = schema();
        let mut heap = Heap::new();
        let user = Entity::new("user")
            .with_field("id", Value::Null)
            .with_field("name", "ann");

        let mut builder = GraphBuilder::new(&schema, &mut heap);
        builder.persist(&user).unwrap();
        let built = builder.finish().unwrap();

        assert_eq!(built.graph.len(), 1);
        let cmd = &built.graph[CommandId::new(0)];
        assert_eq!(cmd.kind, CommandKind::Insert);
        assert_eq!(cmd.values, row! { "name" => "ann" });
        assert_eq!(heap.get(&user).map(|n| n.status), Some(NodeStatus::ScheduledForInsert));
    }

    #[test]
    fn persisted_entity_is_updated_with_its_diff() {
        let schema = schema();
        let mut heap = Heap::new();
        let user = Entity::from_fields("user", row! { "id" => 1, "name" => "ann" });
        heap.attach(&user, "user", user.fields()).unwrap();
        user.set("name", "bob");

        let mut builder = GraphBuilder::new(&schema, &mut heap);
        builder.persist(&user).unwrap();
        let built = builder.finish().unwrap();

        let cmd = &built.graph[CommandId::new(0)];
        assert_eq!(cmd.kind, CommandKind::Update);
        assert_eq!(cmd.scope, Scope::Own);
        assert_eq!(cmd.values, row! { "name" => "bob" });
    }

    #[test]
    fn unchanged_entity_is_pruned() {
        let schema = schema();
        let mut heap = Heap::new();
        let user = Entity::from_fields("user", row! { "id" => 1, "name" => "ann" });
        heap.attach(&user, "user", user.fields()).unwrap();

        let mut builder = GraphBuilder::new(&schema, &mut heap);
        builder.persist(&user).unwrap();
        let built = builder.finish().unwrap();

        assert!(built.graph.is_empty());
        assert_eq!(heap.get(&user).map(|n| n.status), Some(NodeStatus::Managed));
    }

    #[test]
    fn child_binds_to_a_new_parent() {
        let schema = schema();
        let mut heap = Heap::new();
        let user = Entity::new("user").with_field("name", "ann");
        let post = Entity::new("post").with_field("title", "hi");
        user.set_many("posts", vec![post.clone()]);

        let mut builder = GraphBuilder::new(&schema, &mut heap);
        builder.persist(&user).unwrap();
        let built = builder.finish().unwrap();

        let user_cmd = built.graph.own(&user).unwrap();
        let post_cmd = built.graph.own(&post).unwrap();
        let binding = &built.graph[post_cmd].bindings[0];
        assert_eq!(binding.source, user);
        assert_eq!(binding.pairs, vec![("user_id".to_string(), "id".to_string())]);
        assert_eq!(built.graph.dependencies(post_cmd), vec![user_cmd]);
        assert_eq!(built.relation_updates.len(), 1);
    }

    #[test]
    fn stored_link_is_not_rewritten() {
        let schema = schema();
        let mut heap = Heap::new();
        let user = Entity::from_fields("user", row! { "id" => 1, "name" => "ann" });
        let post = Entity::from_fields("post", row! { "id" => 7, "user_id" => 1, "title" => "hi" });
        heap.attach(&user, "user", user.fields()).unwrap();
        heap.attach(&post, "post", post.fields()).unwrap();
        post.set_one("author", Some(&user));

        let mut builder = GraphBuilder::new(&schema, &mut heap);
        builder.persist(&post).unwrap();
        assert!(builder.finish().unwrap().graph.is_empty());
    }

    #[test]
    fn parent_delete_waits_for_child_deletes() {
        let schema = schema();
        let mut heap = Heap::new();
        let user = Entity::from_fields("user", row! { "id" => 1, "name" => "ann" });
        let post = Entity::from_fields("post", row! { "id" => 7, "user_id" => 1, "title" => "hi" });
        heap.attach(&user, "user", user.fields()).unwrap();
        heap.attach(&post, "post", post.fields()).unwrap();
        user.set_many("posts", vec![post.clone()]);

        let mut builder = GraphBuilder::new(&schema, &mut heap);
        builder.delete(&user).unwrap();
        let built = builder.finish().unwrap();

        let user_delete = built.graph.delete_of(&user).unwrap();
        let post_delete = built.graph.delete_of(&post).unwrap();
        assert!(built.graph[user_delete].after.contains(&post_delete));
        assert_eq!(heap.get(&post).map(|n| n.status), Some(NodeStatus::ScheduledForDelete));
    }

    #[test]
    fn persist_and_delete_of_one_entity_conflict() {
        let schema = schema();
        let mut heap = Heap::new();
        let user = Entity::from_fields("user", row! { "id" => 1, "name" => "ann" });
        heap.attach(&user, "user", user.fields()).unwrap();

        let mut builder = GraphBuilder::new(&schema, &mut heap);
        builder.delete(&user).unwrap();
        assert!(matches!(builder.persist(&user), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn role_mismatch_is_rejected() {
        let schema = schema();
        let mut heap = Heap::new();
        let post = Entity::new("post").with_field("title", "hi");
        post.set_one("author", Some(&Entity::new("post")));

        let mut builder = GraphBuilder::new(&schema, &mut heap);
        assert!(matches!(builder.persist(&post), Err(CoreError::InvalidOperation { .. })));
    }
}
