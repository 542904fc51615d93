//! Entity construction from stored rows.

use crate::entity::{Entity, EntityId, Promise, RelationValue};
use crate::error::{CoreError, CoreResult};
use crate::heap::{Heap, RelationState, SharedHeap};
use crate::schema::{EntitySchema, RelationKind, RelationSchema, Schema, SchemaError};
use parking_lot::Mutex;
use relmap_store::{Row, RowStore, Select, Value};
use std::cmp::Ordering;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Builds entities from rows and tracks them as `Managed`.
///
/// Relations of a loaded entity start out as promises whose loaders query
/// the store on first access. A belongs-to target that is already tracked is
/// linked directly. Embedded entities are built from the same row.
#[derive(Clone)]
pub struct Mapper {
    store: Arc<dyn RowStore>,
    schema: Arc<Schema>,
    heap: SharedHeap,
}

impl Mapper {
    /// Creates a mapper.
    pub fn new(store: Arc<dyn RowStore>, schema: Arc<Schema>, heap: SharedHeap) -> Self {
        Self { store, schema, heap }
    }

    /// Builds (or reuses) the entity of `role` stored as `row` (column
    /// names).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRole`] or an error for embedded roles,
    /// which only exist inside their parent.
    pub fn make(&self, role: &str, row: &Row) -> CoreResult<Entity> {
        let mut heap = self.heap.lock();
        self.make_tracked(&mut heap, role, row)
    }

    /// Loads the first entity of `role` matching `criteria` (field names).
    ///
    /// # Errors
    ///
    /// Propagates store and mapping errors.
    pub fn fetch_one(&self, role: &str, criteria: &Row) -> CoreResult<Option<Entity>> {
        Ok(self.fetch_all(role, criteria)?.into_iter().next())
    }

    /// Loads every entity of `role` matching `criteria` (field names).
    ///
    /// # Errors
    ///
    /// Propagates store and mapping errors.
    pub fn fetch_all(&self, role: &str, criteria: &Row) -> CoreResult<Vec<Entity>> {
        let mapping = self.schema.entity(role)?;
        let columns = mapping.to_columns(criteria).map_err(|field| SchemaError::UnknownField {
            role: role.to_string(),
            field,
        })?;
        let rows = self
            .store
            .query(&Select::new(mapping.table.clone()).with_criteria(columns))?;
        trace!(role, rows = rows.len(), "fetched");
        let mut heap = self.heap.lock();
        rows.iter()
            .map(|row| self.make_tracked(&mut heap, role, row))
            .collect()
    }

    fn make_tracked(&self, heap: &mut Heap, role: &str, row: &Row) -> CoreResult<Entity> {
        let mapping = self.schema.entity(role)?;
        if mapping.embedded {
            return Err(CoreError::invalid_operation(format!(
                "embedded {role} is loaded through its parent"
            )));
        }
        let fields = mapping.from_columns(row);
        if let Some(key) = EntitySchema::key_of(&fields, &mapping.primary_key) {
            if let Some(existing) = heap.find_by_key(role, &mapping.primary_key, &key) {
                return Ok(existing);
            }
        }

        let entity = Entity::from_fields(role, fields.clone());
        for relation in &mapping.relations {
            if let Some(value) = self.relation_value(heap, &entity, &fields, relation, row)? {
                entity.set_relation(relation.name.clone(), value);
            }
        }
        heap.attach(&entity, role, fields)?;
        Ok(entity)
    }

    fn relation_value(
        &self,
        heap: &mut Heap,
        parent: &Entity,
        fields: &Row,
        relation: &RelationSchema,
        row: &Row,
    ) -> CoreResult<Option<RelationValue>> {
        let parent_id = parent.id();
        let value = match relation.kind {
            RelationKind::BelongsTo | RelationKind::RefersTo => {
                let Some(key) = EntitySchema::key_of(fields, &relation.inner_key) else {
                    return Ok(Some(RelationValue::One(None)));
                };
                if let Some(target) = heap.find_by_key(&relation.target, &relation.outer_key, &key) {
                    return Ok(Some(RelationValue::One(Some(target))));
                }
                let scope: Row = relation.outer_key.iter().cloned().zip(key).collect();
                let handle = self.loader_handle();
                let target = relation.target.clone();
                Promise::new(&relation.target, scope).with_loader(move |p| {
                    Ok(RelationValue::One(handle.mapper()?.fetch_one(&target, p.scope())?))
                })
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                let Some(key) = EntitySchema::key_of(fields, &relation.inner_key) else {
                    return Ok(None);
                };
                let scope: Row = relation.outer_key.iter().cloned().zip(key).collect();
                let handle = self.loader_handle();
                let relation = relation.clone();
                Promise::new(&relation.target, scope).with_loader(move |p| {
                    let mapper = handle.mapper()?;
                    let mut criteria = p.scope().clone();
                    criteria.extend(relation.filter.iter().cloned());
                    let mut children = mapper.fetch_all(&relation.target, &criteria)?;
                    sort_by_fields(&mut children, &relation.order_by);
                    let (value, state) = if relation.kind == RelationKind::HasOne {
                        let child = children.into_iter().next();
                        (RelationValue::One(child.clone()), RelationState::One(child))
                    } else {
                        (RelationValue::Many(children.clone()), RelationState::Many(children))
                    };
                    mapper.store_state(parent_id, &relation.name, state);
                    Ok(value)
                })
            }
            RelationKind::ManyToMany => {
                let (Some(key), Some(through)) = (
                    EntitySchema::key_of(fields, &relation.inner_key),
                    relation.through.as_ref(),
                ) else {
                    return Ok(None);
                };
                let scope: Row = through.inner_key.iter().cloned().zip(key).collect();
                let handle = self.loader_handle();
                let relation = relation.clone();
                Promise::new(&relation.target, scope).with_loader(move |p| {
                    handle.mapper()?.load_linked(parent_id, &relation, p.scope())
                })
            }
            RelationKind::Embedded => {
                let mapping = self.schema.entity(&relation.target)?;
                let child_fields = mapping.from_columns(row);
                let child = Entity::from_fields(&relation.target, child_fields.clone());
                heap.attach(&child, &relation.target, child_fields)?;
                return Ok(Some(RelationValue::One(Some(child))));
            }
        };
        Ok(Some(RelationValue::Deferred(value)))
    }

    /// Loads the targets linked through a pivot table.
    fn load_linked(&self, parent: EntityId, relation: &RelationSchema, scope: &Row) -> CoreResult<RelationValue> {
        let through = relation.through.as_ref().ok_or_else(|| {
            CoreError::from(SchemaError::MissingThrough {
                role: relation.target.clone(),
                relation: relation.name.clone(),
            })
        })?;
        let pivots = self
            .store
            .query(&Select::new(through.table.clone()).with_criteria(scope.clone()))?;

        let mut targets = Vec::with_capacity(pivots.len());
        for pivot in &pivots {
            let criteria: Row = relation
                .outer_key
                .iter()
                .zip(&through.outer_key)
                .map(|(field, column)| (field.clone(), pivot.get(column).cloned().unwrap_or_default()))
                .collect();
            if let Some(target) = self.fetch_one(&relation.target, &criteria)? {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        sort_by_fields(&mut targets, &relation.order_by);
        self.store_state(parent, &relation.name, RelationState::Many(targets.clone()));
        Ok(RelationValue::Many(targets))
    }

    fn loader_handle(&self) -> LoaderHandle {
        LoaderHandle {
            store: Arc::clone(&self.store),
            schema: Arc::clone(&self.schema),
            heap: Arc::downgrade(&self.heap),
        }
    }

    fn store_state(&self, parent: EntityId, relation: &str, state: RelationState) {
        self.heap.lock().store_relation(parent, relation, state);
    }
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper").finish_non_exhaustive()
    }
}

/// Mapper state captured by relation loaders.
///
/// The heap owns the entities that own the loaders, so loaders only hold a
/// weak reference to it.
struct LoaderHandle {
    store: Arc<dyn RowStore>,
    schema: Arc<Schema>,
    heap: Weak<Mutex<Heap>>,
}

impl LoaderHandle {
    fn mapper(&self) -> CoreResult<Mapper> {
        let heap = self
            .heap
            .upgrade()
            .ok_or_else(|| CoreError::invalid_operation("heap dropped before relation was loaded"))?;
        Ok(Mapper {
            store: Arc::clone(&self.store),
            schema: Arc::clone(&self.schema),
            heap,
        })
    }
}

fn sort_by_fields(entities: &mut [Entity], fields: &[String]) {
    if fields.is_empty() {
        return;
    }
    entities.sort_by(|a, b| {
        fields
            .iter()
            .map(|f| compare(&a.get(f).unwrap_or_default(), &b.get(f).unwrap_or_default()))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Total order over values: nulls first, then by type, then by value.
fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Integer(x), Value::Float(y)) => (*x as f64).total_cmp(y),
        (Value::Float(x), Value::Integer(y)) => x.total_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
