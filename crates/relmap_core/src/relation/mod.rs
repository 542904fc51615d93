//! Relation resolvers.
//!
//! One resolver per [`RelationKind`]. The builder selects a resolver by the
//! relation's kind tag and lets it translate the relation's current value
//! into bindings, pivot commands, fragments and orphans.

mod belongs_to;
mod embedded;
mod has_many;
mod has_one;
mod many_to_many;
mod refers_to;

use crate::builder::GraphBuilder;
use crate::entity::{Entity, RelationValue};
use crate::error::CoreResult;
use crate::schema::{RelationKind, RelationSchema};
use crate::types::CommandId;

/// When a relation's writes happen relative to the parent's own write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// The target is written first (the parent holds the key).
    Before,
    /// Written as part of the parent's row.
    WithParent,
    /// Written after the parent (the target or a pivot holds the key).
    After,
}

/// Relation-kind specific write logic.
pub trait Resolver: Send + Sync {
    /// Kind handled by this resolver.
    fn kind(&self) -> RelationKind;

    /// Participation relative to the parent's write.
    fn position(&self) -> Position;

    /// Current value of the relation slot on `parent`.
    fn extract_related(&self, parent: &Entity, relation: &RelationSchema) -> Option<RelationValue> {
        parent.relation(&relation.name)
    }

    /// Queues the writes needed to store `value` as the relation of `parent`.
    ///
    /// # Errors
    ///
    /// Propagates builder errors for related entities.
    fn queue_changes(
        &self,
        builder: &mut GraphBuilder<'_>,
        parent: &Entity,
        relation: &RelationSchema,
        value: Option<&RelationValue>,
    ) -> CoreResult<()>;

    /// Queues the writes a delete of `parent` requires; `delete` is the
    /// parent's delete command.
    ///
    /// # Errors
    ///
    /// Propagates builder errors for cascaded deletes.
    fn queue_delete(
        &self,
        builder: &mut GraphBuilder<'_>,
        parent: &Entity,
        relation: &RelationSchema,
        delete: CommandId,
    ) -> CoreResult<()>;
}

static BELONGS_TO: belongs_to::BelongsTo = belongs_to::BelongsTo;
static HAS_ONE: has_one::HasOne = has_one::HasOne;
static HAS_MANY: has_many::HasMany = has_many::HasMany;
static MANY_TO_MANY: many_to_many::ManyToMany = many_to_many::ManyToMany;
static REFERS_TO: refers_to::RefersTo = refers_to::RefersTo;
static EMBEDDED: embedded::Embedded = embedded::Embedded;

/// Resolver for `kind`.
#[must_use]
pub fn resolver_for(kind: RelationKind) -> &'static dyn Resolver {
    match kind {
        RelationKind::BelongsTo => &BELONGS_TO,
        RelationKind::HasOne => &HAS_ONE,
        RelationKind::HasMany => &HAS_MANY,
        RelationKind::ManyToMany => &MANY_TO_MANY,
        RelationKind::RefersTo => &REFERS_TO,
        RelationKind::Embedded => &EMBEDDED,
    }
}
