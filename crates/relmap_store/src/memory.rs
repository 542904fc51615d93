//! In-memory row store for testing.

use crate::error::{StoreError, StoreResult};
use crate::statement::{Execution, Select, Statement};
use crate::store::RowStore;
use crate::value::{Row, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub ref_table: String,
    /// Referenced columns, positionally matching `columns`.
    pub ref_columns: Vec<String>,
}

impl ForeignKey {
    /// Creates a foreign key constraint.
    pub fn new<C, R>(columns: C, ref_table: impl Into<String>, ref_columns: R) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Table definition for [`InMemoryRowStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Declared columns.
    pub columns: Vec<String>,
    /// Primary key columns (implicitly NOT NULL).
    pub primary_key: Vec<String>,
    /// Column filled from a per-table counter when inserted as null.
    pub auto_increment: Option<String>,
    /// Columns that reject null.
    pub not_null: Vec<String>,
    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDef {
    /// Creates an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the declared columns.
    #[must_use]
    pub fn columns<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the primary key.
    #[must_use]
    pub fn primary_key<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Marks a column as store-generated.
    #[must_use]
    pub fn auto_increment(mut self, column: impl Into<String>) -> Self {
        self.auto_increment = Some(column.into());
        self
    }

    /// Adds NOT NULL columns.
    #[must_use]
    pub fn not_null<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.not_null.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Adds a foreign key constraint.
    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    fn is_required(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column) || self.not_null.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone)]
struct TableData {
    rows: Vec<Row>,
    next_id: i64,
}

impl Default for TableData {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    defs: BTreeMap<String, TableDef>,
    data: BTreeMap<String, TableData>,
    snapshot: Option<BTreeMap<String, TableData>>,
    log: Vec<Statement>,
}

/// An in-memory row store.
///
/// This store keeps tables in memory and enforces enough relational
/// constraints (NOT NULL, primary key uniqueness, foreign keys with
/// restrict-on-delete) that a mis-ordered write sequence fails exactly as it
/// would against a real database. It is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Thread Safety
///
/// The handle is cheap to clone; clones share the same tables.
///
/// # Example
///
/// ```rust
/// use relmap_store::{InMemoryRowStore, RowStore, Statement, TableDef, row};
///
/// let store = InMemoryRowStore::new();
/// store.create_table(TableDef::new("tags").columns(["id", "name"]).primary_key(["id"]));
/// store.execute(&Statement::insert("tags", row! { "id" => 1, "name" => "rust" })).unwrap();
/// assert_eq!(store.rows("tags").len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryRowStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryRowStore {
    /// Creates a new store without tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or replaces) a table.
    pub fn create_table(&self, def: TableDef) {
        let mut state = self.state.write();
        state.data.insert(def.name.clone(), TableData::default());
        state.defs.insert(def.name.clone(), def);
    }

    /// Returns a copy of every row in `table`, in insertion order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .read()
            .data
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Returns rows of `table` matching every criterion.
    #[must_use]
    pub fn find(&self, table: &str, criteria: &Row) -> Vec<Row> {
        self.state
            .read()
            .data
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|r| matches(r, criteria))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns a copy of every successfully executed statement.
    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        self.state.read().log.clone()
    }

    /// Returns the number of successfully executed statements.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.state.read().log.len()
    }

    /// Clears the statement log.
    pub fn clear_log(&self) {
        self.state.write().log.clear();
    }

    /// Inserts a row without recording it in the statement log.
    ///
    /// Useful for seeding fixtures.
    ///
    /// # Errors
    ///
    /// Returns the same constraint errors as an executed insert.
    pub fn seed(&self, table: &str, values: Row) -> StoreResult<Execution> {
        let mut state = self.state.write();
        apply_insert(&mut state, table, &values)
    }
}

impl RowStore for InMemoryRowStore {
    fn execute(&self, statement: &Statement) -> StoreResult<Execution> {
        let mut state = self.state.write();
        let outcome = match statement {
            Statement::Insert { table, values } => apply_insert(&mut state, table, values)?,
            Statement::Update {
                table,
                values,
                criteria,
            } => apply_update(&mut state, table, values, criteria)?,
            Statement::Delete { table, criteria } => apply_delete(&mut state, table, criteria)?,
        };
        state.log.push(statement.clone());
        Ok(outcome)
    }

    fn query(&self, select: &Select) -> StoreResult<Vec<Row>> {
        let state = self.state.read();
        let data = state
            .data
            .get(&select.table)
            .ok_or_else(|| StoreError::UnknownTable(select.table.clone()))?;
        Ok(data
            .rows
            .iter()
            .filter(|r| matches(r, &select.criteria))
            .cloned()
            .collect())
    }

    fn begin(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        if state.snapshot.is_some() {
            return Err(StoreError::TransactionAlreadyActive);
        }
        state.snapshot = Some(state.data.clone());
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        state
            .snapshot
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoActiveTransaction)
    }

    fn rollback(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        let snapshot = state.snapshot.take().ok_or(StoreError::NoActiveTransaction)?;
        state.data = snapshot;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.read().snapshot.is_some()
    }
}

fn matches(row: &Row, criteria: &Row) -> bool {
    criteria.iter().all(|(k, v)| row.get(k) == Some(v))
}

fn table_def(state: &MemoryState, table: &str) -> StoreResult<TableDef> {
    state
        .defs
        .get(table)
        .cloned()
        .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
}

fn check_columns(def: &TableDef, row: &Row) -> StoreResult<()> {
    for column in row.keys() {
        if !def.columns.iter().any(|c| c == column) {
            return Err(StoreError::UnknownColumn {
                table: def.name.clone(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

fn check_not_null(def: &TableDef, row: &Row) -> StoreResult<()> {
    for column in &def.columns {
        if def.is_required(column) && row.get(column).map_or(true, Value::is_null) {
            return Err(StoreError::NotNullViolation {
                table: def.name.clone(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

fn key_of(row: &Row, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

fn render_key(key: &[Value]) -> String {
    key.iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_unique(def: &TableDef, rows: &[Row], row: &Row, skip: Option<usize>) -> StoreResult<()> {
    if def.primary_key.is_empty() {
        return Ok(());
    }
    let key = key_of(row, &def.primary_key);
    let taken = rows
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != skip)
        .any(|(_, other)| key_of(other, &def.primary_key) == key);
    if taken {
        return Err(StoreError::DuplicateKey {
            table: def.name.clone(),
            key: render_key(&key),
        });
    }
    Ok(())
}

fn check_references(state: &MemoryState, def: &TableDef, row: &Row, pending: Option<&Row>) -> StoreResult<()> {
    for fk in &def.foreign_keys {
        let key = key_of(row, &fk.columns);
        if key.iter().any(Value::is_null) {
            continue;
        }
        let exists_in_store = state
            .data
            .get(&fk.ref_table)
            .map_or(false, |t| t.rows.iter().any(|r| key_of(r, &fk.ref_columns) == key));
        // a row may reference itself
        let self_reference = fk.ref_table == def.name
            && pending.map_or(false, |r| key_of(r, &fk.ref_columns) == key);
        if !exists_in_store && !self_reference {
            return Err(StoreError::ForeignKeyViolation {
                table: def.name.clone(),
                columns: fk.columns.join(", "),
                ref_table: fk.ref_table.clone(),
            });
        }
    }
    Ok(())
}

/// Fails if a row other than those in `releasing` still references the key
/// `old` exposes, unless `new` keeps that key unchanged.
fn check_not_referenced(
    state: &MemoryState,
    table: &str,
    old: &Row,
    new: Option<&Row>,
    releasing: &[Row],
) -> StoreResult<()> {
    for def in state.defs.values() {
        for fk in def.foreign_keys.iter().filter(|fk| fk.ref_table == table) {
            let key = key_of(old, &fk.ref_columns);
            if key.iter().any(Value::is_null) {
                continue;
            }
            if new.map_or(false, |n| key_of(n, &fk.ref_columns) == key) {
                continue;
            }
            let referenced = state.data.get(&def.name).map_or(false, |t| {
                t.rows.iter().any(|r| {
                    key_of(r, &fk.columns) == key
                        && !(def.name == table && releasing.contains(r))
                })
            });
            if referenced {
                return Err(StoreError::ForeignKeyViolation {
                    table: def.name.clone(),
                    columns: fk.columns.join(", "),
                    ref_table: table.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn apply_insert(state: &mut MemoryState, table: &str, values: &Row) -> StoreResult<Execution> {
    let def = table_def(state, table)?;
    check_columns(&def, values)?;

    let mut row: Row = def
        .columns
        .iter()
        .map(|c| (c.clone(), values.get(c).cloned().unwrap_or(Value::Null)))
        .collect();

    let mut generated = None;
    if let Some(column) = &def.auto_increment {
        let data = state.data.entry(table.to_string()).or_default();
        match row.get(column).and_then(Value::as_integer) {
            Some(explicit) => data.next_id = data.next_id.max(explicit + 1),
            None => {
                let id = Value::Integer(data.next_id);
                data.next_id += 1;
                row.insert(column.clone(), id.clone());
                generated = Some(id);
            }
        }
    }

    check_not_null(&def, &row)?;
    let rows = state.data.get(table).map(|t| t.rows.as_slice()).unwrap_or(&[]);
    check_unique(&def, rows, &row, None)?;
    check_references(state, &def, &row, Some(&row))?;

    state.data.entry(table.to_string()).or_default().rows.push(row);
    Ok(Execution {
        affected_rows: 1,
        last_insert_id: generated,
    })
}

fn apply_update(state: &mut MemoryState, table: &str, values: &Row, criteria: &Row) -> StoreResult<Execution> {
    let def = table_def(state, table)?;
    check_columns(&def, values)?;

    let rows = state.data.get(table).map(|t| t.rows.clone()).unwrap_or_default();
    let mut updated = Vec::new();
    for (index, old) in rows.iter().enumerate() {
        if !matches(old, criteria) {
            continue;
        }
        let mut new = old.clone();
        for (k, v) in values {
            new.insert(k.clone(), v.clone());
        }
        check_not_null(&def, &new)?;
        check_unique(&def, &rows, &new, Some(index))?;
        check_references(state, &def, &new, Some(&new))?;
        check_not_referenced(state, table, old, Some(&new), &[])?;
        updated.push((index, new));
    }

    let count = updated.len() as u64;
    if let Some(data) = state.data.get_mut(table) {
        for (index, new) in updated {
            data.rows[index] = new;
        }
    }
    Ok(Execution::affected(count))
}

fn apply_delete(state: &mut MemoryState, table: &str, criteria: &Row) -> StoreResult<Execution> {
    table_def(state, table)?;
    let victims: Vec<Row> = state
        .data
        .get(table)
        .map(|t| t.rows.iter().filter(|r| matches(r, criteria)).cloned().collect())
        .unwrap_or_default();

    for old in &victims {
        check_not_referenced(state, table, old, None, &victims)?;
    }

    if let Some(data) = state.data.get_mut(table) {
        data.rows.retain(|r| !matches(r, criteria));
    }
    Ok(Execution::affected(victims.len() as u64))
}
