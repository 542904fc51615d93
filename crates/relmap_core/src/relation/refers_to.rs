use super::belongs_to::queue_reference;
use super::{Position, Resolver};
use crate::builder::GraphBuilder;
use crate::entity::{Entity, RelationValue};
use crate::error::CoreResult;
use crate::schema::{RelationKind, RelationSchema};
use crate::types::CommandId;

/// Nullable reference, possibly to the parent's own role or to an entity
/// that refers back. Each (parent, relation) pair is handled once per build;
/// a back-reference to an entity already on the walk becomes a binding whose
/// edge the sequencer splits.
pub(super) struct RefersTo;

impl Resolver for RefersTo {
    fn kind(&self) -> RelationKind {
        RelationKind::RefersTo
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
        if !builder.enter_pair(parent, &relation.name) {
            return Ok(());
        }
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
