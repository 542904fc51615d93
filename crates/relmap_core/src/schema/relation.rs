//! Relation declarations.

use relmap_store::Value;
use std::fmt;

/// Closed set of relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// The parent row holds a foreign key to the target.
    BelongsTo,
    /// The target row holds a foreign key to the parent; at most one target.
    HasOne,
    /// The target rows hold a foreign key to the parent.
    HasMany,
    /// Links are rows of a pivot table keyed by both sides.
    ManyToMany,
    /// Like `BelongsTo`, but always nullable and safe for self-references.
    RefersTo,
    /// The target is a slice of the parent's own row.
    Embedded,
}

impl RelationKind {
    /// Returns true if the foreign key lives on the parent row.
    #[must_use]
    pub const fn parent_holds_key(self) -> bool {
        matches!(self, Self::BelongsTo | Self::RefersTo)
    }

    /// Returns true if the relation holds a collection.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::ManyToMany)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BelongsTo => "belongs-to",
            Self::HasOne => "has-one",
            Self::HasMany => "has-many",
            Self::ManyToMany => "many-to-many",
            Self::RefersTo => "refers-to",
            Self::Embedded => "embedded",
        };
        f.write_str(name)
    }
}

/// Pivot table of a many-to-many relation.
///
/// `inner_key` columns hold the parent's key, `outer_key` columns the
/// target's. Pivot rows are not entities; their columns are addressed
/// directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThroughSchema {
    /// Pivot table name.
    pub table: String,
    /// Pivot columns referencing the parent.
    pub inner_key: Vec<String>,
    /// Pivot columns referencing the target.
    pub outer_key: Vec<String>,
}

impl ThroughSchema {
    /// Declares a pivot table.
    pub fn new<I, O>(table: impl Into<String>, inner_key: I, outer_key: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            table: table.into(),
            inner_key: inner_key.into_iter().map(Into::into).collect(),
            outer_key: outer_key.into_iter().map(Into::into).collect(),
        }
    }
}

/// Declarative description of one relation.
///
/// Keys are field names. `inner_key` names fields of the parent and
/// `outer_key` fields of the target, pairwise. For belongs-to and refers-to
/// the inner key is the foreign key; for has-one and has-many the outer key
/// is. Empty keys default to the relevant primary key when the schema is
/// built.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSchema {
    /// Relation name (the entity's slot name).
    pub name: String,
    /// Relation kind.
    pub kind: RelationKind,
    /// Target role.
    pub target: String,
    /// Parent-side key fields.
    pub inner_key: Vec<String>,
    /// Target-side key fields.
    pub outer_key: Vec<String>,
    /// Whether writes and deletes propagate to related entities.
    pub cascade: bool,
    /// Whether the foreign key may be null.
    pub nullable: bool,
    /// Pivot table for many-to-many relations.
    pub through: Option<ThroughSchema>,
    /// Ordering hint for loaders (field names).
    pub order_by: Vec<String>,
    /// Extra equality constraint applied by loaders.
    pub filter: Vec<(String, Value)>,
}

fn keys<I>(fields: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    fields.into_iter().map(Into::into).collect()
}

impl RelationSchema {
    fn new(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            inner_key: Vec::new(),
            outer_key: Vec::new(),
            cascade: true,
            nullable: false,
            through: None,
            order_by: Vec::new(),
            filter: Vec::new(),
        }
    }

    /// Parent holds `inner_key`, referencing the target's primary key.
    pub fn belongs_to<I>(name: impl Into<String>, target: impl Into<String>, inner_key: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut rel = Self::new(name, RelationKind::BelongsTo, target);
        rel.inner_key = keys(inner_key);
        rel
    }

    /// Nullable reference that tolerates self and mutual references.
    pub fn refers_to<I>(name: impl Into<String>, target: impl Into<String>, inner_key: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut rel = Self::new(name, RelationKind::RefersTo, target);
        rel.inner_key = keys(inner_key);
        rel.nullable = true;
        rel
    }

    /// Target holds `outer_key`, referencing the parent's primary key.
    pub fn has_one<O>(name: impl Into<String>, target: impl Into<String>, outer_key: O) -> Self
    where
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let mut rel = Self::new(name, RelationKind::HasOne, target);
        rel.outer_key = keys(outer_key);
        rel
    }

    /// Targets hold `outer_key`, referencing the parent's primary key.
    pub fn has_many<O>(name: impl Into<String>, target: impl Into<String>, outer_key: O) -> Self
    where
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let mut rel = Self::new(name, RelationKind::HasMany, target);
        rel.outer_key = keys(outer_key);
        rel
    }

    /// Links through a pivot table; both keys default to primary keys.
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        through: ThroughSchema,
    ) -> Self {
        let mut rel = Self::new(name, RelationKind::ManyToMany, target);
        rel.through = Some(through);
        rel
    }

    /// Target is a slice of the parent's row.
    pub fn embedded(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::Embedded, target)
    }

    /// Overrides the inner key.
    #[must_use]
    pub fn inner_key<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.inner_key = keys(fields);
        self
    }

    /// Overrides the outer key.
    #[must_use]
    pub fn outer_key<O>(mut self, fields: O) -> Self
    where
        O: IntoIterator,
        O::Item: Into<String>,
    {
        self.outer_key = keys(fields);
        self
    }

    /// Sets the cascade flag.
    #[must_use]
    pub fn cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }

    /// Sets nullability.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Sets the loader ordering.
    #[must_use]
    pub fn order_by<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.order_by = keys(fields);
        self
    }

    /// Adds a loader equality constraint on a target field.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.push((field.into(), value.into()));
        self
    }

    /// Pairs of (inner field, outer field).
    pub fn key_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner_key
            .iter()
            .zip(&self.outer_key)
            .map(|(i, o)| (i.as_str(), o.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refers_to_is_nullable() {
        let rel = RelationSchema::refers_to("parent", "node", ["parent_id"]);
        assert!(rel.nullable);
        assert!(rel.kind.parent_holds_key());
    }

    #[test]
    fn defaults() {
        let rel = RelationSchema::has_many("posts", "post", ["user_id"]);
        assert!(rel.cascade);
        assert!(!rel.nullable);
        assert!(rel.inner_key.is_empty());
        assert!(rel.kind.is_collection());
        assert_eq!(rel.kind.to_string(), "has-many");
    }

    #[test]
    fn key_pairs_zip() {
        let rel = RelationSchema::belongs_to("owner", "account", ["org", "num"])
            .outer_key(["org_id", "number"]);
        let pairs: Vec<_> = rel.key_pairs().collect();
        assert_eq!(pairs, vec![("org", "org_id"), ("num", "number")]);
    }
}
