use super::{Position, Resolver};
use crate::builder::{check_target, GraphBuilder};
use crate::command::{Binding, CommandKind};
use crate::entity::{Entity, RelationValue};
use crate::error::{CoreError, CoreResult};
use crate::schema::{RelationKind, RelationSchema};
use crate::types::CommandId;
use relmap_store::Value;

/// The parent row holds the foreign key; the target is written first.
pub(super) struct BelongsTo;

impl Resolver for BelongsTo {
    fn kind(&self) -> RelationKind {
        RelationKind::BelongsTo
    }

    fn position(&self) -> Position {
        Position::Before
    }

    fn queue_changes(
        &self,
        builder: &mut GraphBuilder<'_>,
        parent: &Entity,
        relation: &RelationSchema,
        value: Option<&RelationValue>,
    ) -> CoreResult<()> {
        queue_reference(builder, parent, relation, value)
    }

    fn queue_delete(
        &self,
        _builder: &mut GraphBuilder<'_>,
        _parent: &Entity,
        _relation: &RelationSchema,
        _delete: CommandId,
    ) -> CoreResult<()> {
        Ok(())
    }
}

/// Shared by belongs-to and refers-to.
pub(super) fn queue_reference(
    builder: &mut GraphBuilder<'_>,
    parent: &Entity,
    relation: &RelationSchema,
    value: Option<&RelationValue>,
) -> CoreResult<()> {
    let Some(own) = builder.own_command(parent) else {
        return Ok(());
    };
    let inserting = builder.command(own).kind == CommandKind::Insert;

    match value {
        // Unset slot: the foreign key fields speak for themselves.
        None => Ok(()),
        Some(RelationValue::Deferred(promise)) => {
            // An unloaded reference is unchanged, but a new row still needs
            // the key the promise was scoped by.
            if inserting {
                let cmd = builder.command_mut(own);
                for (inner, outer) in relation.key_pairs() {
                    if let Some(key) = promise.scope().get(outer).filter(|v| !v.is_null()) {
                        cmd.values.insert(inner.to_string(), key.clone());
                    }
                }
            }
            Ok(())
        }
        Some(RelationValue::One(None)) => {
            release_previous(builder, parent, relation, None, own);
            let linked = builder
                .node(parent)
                .and_then(|node| node.key(&relation.inner_key))
                .is_some();
            if inserting || linked {
                let cmd = builder.command_mut(own);
                cmd.strip(relation.inner_key.iter().map(String::as_str));
                for field in &relation.inner_key {
                    cmd.values.insert(field.clone(), Value::Null);
                }
            }
            Ok(())
        }
        Some(RelationValue::One(Some(target))) => {
            check_target(parent, relation, target)?;
            if relation.cascade {
                builder.visit(target)?;
            }
            release_previous(builder, parent, relation, Some(target), own);
            builder.bind(
                parent,
                Binding::new(&relation.name, target, relation.key_pairs(), relation.nullable),
            );
            Ok(())
        }
        Some(RelationValue::Many(_)) => Err(CoreError::invalid_operation(format!(
            "{}.{} holds a collection",
            parent.role(),
            relation.name
        ))),
    }
}

/// Records that the previously stored target is released by `own`.
fn release_previous(
    builder: &mut GraphBuilder<'_>,
    parent: &Entity,
    relation: &RelationSchema,
    next: Option<&Entity>,
    own: CommandId,
) {
    let stored = builder.node(parent).and_then(|node| node.key(&relation.inner_key));
    let previous =
        stored.and_then(|key| builder.find_by_key(&relation.target, &relation.outer_key, &key));
    if let Some(previous) = previous {
        if Some(&previous) != next {
            builder.record_release(&previous, own);
        }
    }
}
