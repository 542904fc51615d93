//! Schema validation errors.

use thiserror::Error;

/// Errors reported by [`super::SchemaBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The same role was declared twice.
    #[error("role {role} is declared more than once")]
    DuplicateRole {
        /// The duplicated role.
        role: String,
    },

    /// A non-embedded role has no primary key.
    #[error("role {role} has no primary key")]
    MissingPrimaryKey {
        /// The role.
        role: String,
    },

    /// A key or relation names a field the role does not declare.
    #[error("role {role} has no field {field}")]
    UnknownField {
        /// The role.
        role: String,
        /// The missing field.
        field: String,
    },

    /// A relation targets an undeclared role.
    #[error("relation {role}.{relation} targets unknown role {target}")]
    UnknownTarget {
        /// Owning role.
        role: String,
        /// Relation name.
        relation: String,
        /// Missing target role.
        target: String,
    },

    /// Inner and outer keys differ in length (or are empty).
    #[error("relation {role}.{relation} pairs {inner} inner with {outer} outer key fields")]
    KeyArity {
        /// Owning role.
        role: String,
        /// Relation name.
        relation: String,
        /// Inner key length.
        inner: usize,
        /// Outer key length.
        outer: usize,
    },

    /// A many-to-many relation without a pivot table.
    #[error("many-to-many relation {role}.{relation} has no through table")]
    MissingThrough {
        /// Owning role.
        role: String,
        /// Relation name.
        relation: String,
    },

    /// A refers-to relation declared non-nullable.
    #[error("refers-to relation {role}.{relation} must be nullable")]
    RequiredReference {
        /// Owning role.
        role: String,
        /// Relation name.
        relation: String,
    },

    /// An embedded relation whose target is not an embedded role of the same
    /// table, or a plain relation targeting an embedded role.
    #[error("relation {role}.{relation} cannot embed {target}")]
    EmbeddedMismatch {
        /// Owning role.
        role: String,
        /// Relation name.
        relation: String,
        /// Target role.
        target: String,
    },
}
