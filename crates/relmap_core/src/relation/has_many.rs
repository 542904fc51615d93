use super::{Position, Resolver};
use crate::builder::{check_target, loaded, GraphBuilder};
use crate::command::{Binding, Command};
use crate::entity::{Entity, RelationValue};
use crate::error::CoreResult;
use crate::heap::{Node, RelationState};
use crate::schema::{RelationKind, RelationSchema};
use crate::types::CommandId;
use relmap_store::{Row, Value};

/// The children hold the foreign key; they are written after the parent.
pub(super) struct HasMany;

impl Resolver for HasMany {
    fn kind(&self) -> RelationKind {
        RelationKind::HasMany
    }

    fn position(&self) -> Position {
        Position::After
    }

    fn queue_changes(
        &self,
        builder: &mut GraphBuilder<'_>,
        parent: &Entity,
        relation: &RelationSchema,
        value: Option<&RelationValue>,
    ) -> CoreResult<()> {
        queue_children(builder, parent, relation, value)
    }

    fn queue_delete(
        &self,
        builder: &mut GraphBuilder<'_>,
        parent: &Entity,
        relation: &RelationSchema,
        delete: CommandId,
    ) -> CoreResult<()> {
        delete_children(builder, parent, relation, delete)
    }
}

/// Binds every current child to the parent and records the children that
/// left the relation as orphans. Shared by has-one and has-many.
pub(super) fn queue_children(
    builder: &mut GraphBuilder<'_>,
    parent: &Entity,
    relation: &RelationSchema,
    value: Option<&RelationValue>,
) -> CoreResult<()> {
    if !relation.cascade {
        return Ok(());
    }
    let Some(children) = loaded(value) else {
        return Ok(());
    };

    let mut links = Vec::new();
    for child in &children {
        check_target(parent, relation, child)?;
        builder.visit(child)?;
        let pairs = relation
            .outer_key
            .iter()
            .zip(&relation.inner_key)
            .map(|(local, remote)| (local.as_str(), remote.as_str()));
        builder.bind(
            child,
            Binding::new(&relation.name, parent, pairs, relation.nullable),
        );
        if let Some(own) = builder.own_command(child) {
            if relation.outer_key.iter().any(|f| builder.command(own).binds(f)) {
                links.push(own);
            }
        }
    }

    let previous = builder
        .node(parent)
        .map(|node| node.relation(&relation.name).entities())
        .unwrap_or_default();
    for old in previous.iter().filter(|e| !children.contains(e)) {
        builder.record_orphan(parent, relation, old, &links);
    }

    let state = match relation.kind {
        RelationKind::HasOne => RelationState::One(children.into_iter().next()),
        _ => RelationState::Many(children),
    };
    builder.record_state(parent, &relation.name, state);
    Ok(())
}

/// Deletes (required) or unlinks (nullable) the children of a deleted
/// parent before the parent's own delete.
pub(super) fn delete_children(
    builder: &mut GraphBuilder<'_>,
    parent: &Entity,
    relation: &RelationSchema,
    delete: CommandId,
) -> CoreResult<()> {
    let mut children = loaded(parent.relation(&relation.name).as_ref()).unwrap_or_default();
    if children.is_empty() {
        children = builder
            .node(parent)
            .map(|node| node.relation(&relation.name).entities())
            .unwrap_or_default();
    }

    for child in &children {
        if builder.is_visited(child) || !builder.node(child).is_some_and(Node::is_persisted) {
            continue;
        }
        let first = if relation.nullable {
            let nulls: Row = relation
                .outer_key
                .iter()
                .map(|f| (f.clone(), Value::Null))
                .collect();
            Some(builder.push(Command::update(child, nulls)))
        } else if relation.cascade {
            builder.schedule_delete(child)?
        } else {
            None
        };
        if let Some(id) = first {
            builder.command_mut(delete).run_after(id);
        }
    }
    Ok(())
}
