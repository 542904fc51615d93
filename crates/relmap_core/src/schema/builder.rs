//! Schema construction and validation.

use super::entity::EntitySchema;
use super::error::SchemaError;
use super::relation::{RelationKind, RelationSchema};
use super::Schema;
use std::collections::BTreeMap;

/// Collects entity mappings and validates them into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntitySchema>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity mapping.
    #[must_use]
    pub fn entity(mut self, entity: EntitySchema) -> Self {
        self.entities.push(entity);
        self
    }

    /// Resolves key defaults and validates every mapping.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found, in declaration order.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut entities = BTreeMap::new();
        for entity in self.entities {
            if entity.primary_key.is_empty() && !entity.embedded {
                return Err(SchemaError::MissingPrimaryKey { role: entity.role });
            }
            if let Some(field) = entity.primary_key.iter().find(|f| !entity.has_field(f)) {
                return Err(SchemaError::UnknownField {
                    role: entity.role.clone(),
                    field: field.clone(),
                });
            }
            if entities.contains_key(&entity.role) {
                return Err(SchemaError::DuplicateRole { role: entity.role });
            }
            entities.insert(entity.role.clone(), entity);
        }

        // Defaults need the target's primary key, so resolve after collection.
        let roles: Vec<String> = entities.keys().cloned().collect();
        for role in &roles {
            let mut relations = entities[role].relations.clone();
            for rel in &mut relations {
                resolve_relation(&entities, role, rel)?;
            }
            if let Some(entity) = entities.get_mut(role) {
                entity.relations = relations;
            }
        }
        Ok(Schema { entities })
    }
}

fn resolve_relation(
    entities: &BTreeMap<String, EntitySchema>,
    role: &str,
    rel: &mut RelationSchema,
) -> Result<(), SchemaError> {
    let parent = &entities[role];
    let target = entities
        .get(&rel.target)
        .ok_or_else(|| SchemaError::UnknownTarget {
            role: role.to_string(),
            relation: rel.name.clone(),
            target: rel.target.clone(),
        })?;

    let embeds = rel.kind == RelationKind::Embedded;
    if embeds != target.embedded || (embeds && target.table != parent.table) {
        return Err(SchemaError::EmbeddedMismatch {
            role: role.to_string(),
            relation: rel.name.clone(),
            target: rel.target.clone(),
        });
    }
    if embeds {
        return Ok(());
    }

    match rel.kind {
        RelationKind::BelongsTo | RelationKind::RefersTo => {
            if rel.kind == RelationKind::RefersTo && !rel.nullable {
                return Err(SchemaError::RequiredReference {
                    role: role.to_string(),
                    relation: rel.name.clone(),
                });
            }
            if rel.outer_key.is_empty() {
                rel.outer_key = target.primary_key.clone();
            }
        }
        RelationKind::HasOne | RelationKind::HasMany => {
            if rel.inner_key.is_empty() {
                rel.inner_key = parent.primary_key.clone();
            }
        }
        RelationKind::ManyToMany => {
            if rel.inner_key.is_empty() {
                rel.inner_key = parent.primary_key.clone();
            }
            if rel.outer_key.is_empty() {
                rel.outer_key = target.primary_key.clone();
            }
            let through = rel.through.as_ref().ok_or_else(|| SchemaError::MissingThrough {
                role: role.to_string(),
                relation: rel.name.clone(),
            })?;
            check_arity(role, rel, through.inner_key.len(), rel.inner_key.len())?;
            check_arity(role, rel, through.outer_key.len(), rel.outer_key.len())?;
        }
        RelationKind::Embedded => {}
    }

    check_arity(role, rel, rel.inner_key.len(), rel.outer_key.len())?;
    check_fields(parent, &rel.inner_key)?;
    check_fields(target, &rel.outer_key)?;
    Ok(())
}

fn check_arity(
    role: &str,
    rel: &RelationSchema,
    inner: usize,
    outer: usize,
) -> Result<(), SchemaError> {
    if inner == outer && inner > 0 {
        Ok(())
    } else {
        Err(SchemaError::KeyArity {
            role: role.to_string(),
            relation: rel.name.clone(),
            inner,
            outer,
        })
    }
}

fn check_fields(entity: &EntitySchema, fields: &[String]) -> Result<(), SchemaError> {
    match fields.iter().find(|f| !entity.has_field(f)) {
        Some(field) => Err(SchemaError::UnknownField {
            role: entity.role.clone(),
            field: field.clone(),
        }),
        None => Ok(()),
    }
}
