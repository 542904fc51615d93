use super::{Position, Resolver};
use crate::builder::{check_target, loaded, GraphBuilder};
use crate::command::{Binding, Command};
use crate::entity::{Entity, RelationValue};
use crate::error::CoreResult;
use crate::heap::RelationState;
use crate::schema::{RelationKind, RelationSchema, SchemaError, ThroughSchema};
use crate::types::CommandId;
use relmap_store::Row;

/// Links are pivot rows holding both keys. Pivot inserts wait for both
/// sides; dropped links become pivot deletes.
pub(super) struct ManyToMany;

fn through(relation: &RelationSchema, parent: &Entity) -> CoreResult<ThroughSchema> {
    relation.through.clone().ok_or_else(|| {
        SchemaError::MissingThrough {
            role: parent.role().to_string(),
            relation: relation.name.clone(),
        }
        .into()
    })
}

fn paired<'a>(
    local: &'a [String],
    remote: &'a [String],
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    local
        .iter()
        .zip(remote)
        .map(|(l, r)| (l.as_str(), r.as_str()))
}

impl Resolver for ManyToMany {
    fn kind(&self) -> RelationKind {
        RelationKind::ManyToMany
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
        let Some(targets) = loaded(value) else {
            return Ok(());
        };
        let through = through(relation, parent)?;
        let previous = builder
            .node(parent)
            .map(|node| node.relation(&relation.name).entities())
            .unwrap_or_default();

        for target in &targets {
            check_target(parent, relation, target)?;
            if relation.cascade {
                builder.visit(target)?;
            }
            if previous.contains(target) {
                continue;
            }
            let mut pivot = Command::pivot_insert(&through.table);
            pivot.bind(Binding::new(
                &relation.name,
                parent,
                paired(&through.inner_key, &relation.inner_key),
                false,
            ));
            pivot.bind(Binding::new(
                &relation.name,
                target,
                paired(&through.outer_key, &relation.outer_key),
                false,
            ));
            builder.push(pivot);
        }

        for old in previous.iter().filter(|e| !targets.contains(e)) {
            let parent_key = builder.node(parent).and_then(|n| n.key(&relation.inner_key));
            let target_key = builder.node(old).and_then(|n| n.key(&relation.outer_key));
            let (Some(parent_key), Some(target_key)) = (parent_key, target_key) else {
                continue;
            };
            let criteria: Row = through
                .inner_key
                .iter()
                .cloned()
                .zip(parent_key)
                .chain(through.outer_key.iter().cloned().zip(target_key))
                .collect();
            builder.push(Command::pivot_delete(&through.table, criteria));
        }

        builder.record_state(parent, &relation.name, RelationState::Many(targets));
        Ok(())
    }

    fn queue_delete(
        &self,
        builder: &mut GraphBuilder<'_>,
        parent: &Entity,
        relation: &RelationSchema,
        delete: CommandId,
    ) -> CoreResult<()> {
        let through = through(relation, parent)?;
        let Some(key) = builder.node(parent).and_then(|n| n.key(&relation.inner_key)) else {
            return Ok(());
        };
        let criteria: Row = through.inner_key.iter().cloned().zip(key).collect();
        let unlink = builder.push(Command::pivot_delete(&through.table, criteria));
        builder.command_mut(delete).run_after(unlink);
        Ok(())
    }
}
