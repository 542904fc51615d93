//! Read-only mapping metadata.
//!
//! A [`Schema`] maps roles to tables, fields to columns and declares the
//! relations between roles. It is built once through [`SchemaBuilder`],
//! validated, and shared immutably (usually behind an `Arc`).

mod builder;
mod entity;
mod error;
mod relation;

pub use builder::SchemaBuilder;
pub use entity::EntitySchema;
pub use error::SchemaError;
pub use relation::{RelationKind, RelationSchema, ThroughSchema};

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;

/// Validated collection of entity mappings.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: BTreeMap<String, EntitySchema>,
}

impl Schema {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Mapping of `role`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRole`] if the role is not declared.
    pub fn entity(&self, role: &str) -> CoreResult<&EntitySchema> {
        self.entities
            .get(role)
            .ok_or_else(|| CoreError::unknown_role(role))
    }

    /// Relations of `role` in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRole`] if the role is not declared.
    pub fn relations(&self, role: &str) -> CoreResult<&[RelationSchema]> {
        Ok(&self.entity(role)?.relations)
    }

    /// Relation `name` of `role`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRole`] or [`CoreError::UnknownRelation`].
    pub fn relation(&self, role: &str, name: &str) -> CoreResult<&RelationSchema> {
        self.entity(role)?
            .relation_named(name)
            .ok_or_else(|| CoreError::unknown_relation(role, name))
    }

    /// Primary key fields of `role`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRole`] if the role is not declared.
    pub fn primary_key(&self, role: &str) -> CoreResult<&[String]> {
        Ok(&self.entity(role)?.primary_key)
    }

    /// (field, column) pairs of `role`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRole`] if the role is not declared.
    pub fn columns(&self, role: &str) -> CoreResult<&[(String, String)]> {
        Ok(&self.entity(role)?.columns)
    }

    /// Table of `role`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRole`] if the role is not declared.
    pub fn table(&self, role: &str) -> CoreResult<&str> {
        Ok(&self.entity(role)?.table)
    }

    /// Column of `field` in `role`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRole`], or a [`SchemaError::UnknownField`]
    /// if the field is not declared.
    pub fn column_for(&self, role: &str, field: &str) -> CoreResult<&str> {
        self.entity(role)?.column_for(field).ok_or_else(|| {
            SchemaError::UnknownField {
                role: role.to_string(),
                field: field.to_string(),
            }
            .into()
        })
    }

    /// Declared roles in name order.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}
