use super::{Position, Resolver};
use crate::builder::{check_target, GraphBuilder};
use crate::command::Fragment;
use crate::entity::{Entity, RelationValue};
use crate::error::CoreResult;
use crate::schema::{RelationKind, RelationSchema};
use crate::types::CommandId;
use relmap_store::Row;

/// The target's fields are columns of the parent's row.
pub(super) struct Embedded;

impl Resolver for Embedded {
    fn kind(&self) -> RelationKind {
        RelationKind::Embedded
    }

    fn position(&self) -> Position {
        Position::WithParent
    }

    fn queue_changes(
        &self,
        builder: &mut GraphBuilder<'_>,
        parent: &Entity,
        relation: &RelationSchema,
        value: Option<&RelationValue>,
    ) -> CoreResult<()> {
        let Some(RelationValue::One(Some(child))) = value else {
            return Ok(());
        };
        check_target(parent, relation, child)?;
        let mapping = builder.schema().entity(&relation.target)?;
        builder.embed(parent, child, mapping)
    }

    fn queue_delete(
        &self,
        builder: &mut GraphBuilder<'_>,
        parent: &Entity,
        relation: &RelationSchema,
        delete: CommandId,
    ) -> CoreResult<()> {
        // The row goes with the parent; the fragment only evicts the node.
        if let Some(child) = parent.related_one(&relation.name) {
            if builder.node(&child).is_some() {
                builder.command_mut(delete).embedded.push(Fragment {
                    entity: child,
                    role: relation.target.clone(),
                    values: Row::new(),
                });
            }
        }
        Ok(())
    }
}
