use super::has_many::{delete_children, queue_children};
use super::{Position, Resolver};
use crate::builder::GraphBuilder;
use crate::entity::{Entity, RelationValue};
use crate::error::{CoreError, CoreResult};
use crate::schema::{RelationKind, RelationSchema};
use crate::types::CommandId;

/// A single child holds the foreign key.
pub(super) struct HasOne;

impl Resolver for HasOne {
    fn kind(&self) -> RelationKind {
        RelationKind::HasOne
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
        if let Some(RelationValue::Many(children)) = value {
            if children.len() > 1 {
                return Err(CoreError::invalid_operation(format!(
                    "{}.{} holds {} entities",
                    parent.role(),
                    relation.name,
                    children.len()
                )));
            }
        }
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
