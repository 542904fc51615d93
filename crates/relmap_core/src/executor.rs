//! Plan execution against a row store.

use crate::builder::RelationUpdate;
use crate::command::{Command, CommandKind, Scope};
use crate::config::Config;
use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::heap::{Heap, NodeStatus};
use crate::schema::{EntitySchema, Schema, SchemaError};
use crate::sequencer::Plan;
use crate::stats::EngineStats;
use relmap_store::{Execution, Row, RowStore, Statement};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Writes performed by a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Executed inserts.
    pub inserts: usize,
    /// Executed updates, deferred ones included.
    pub updates: usize,
    /// Executed deletes.
    pub deletes: usize,
    /// Updates created by cycle splitting.
    pub split_updates: usize,
}

impl RunSummary {
    /// Total statements executed.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// A command with its bindings and row address resolved.
struct Resolved {
    /// Field values written for the target (literal and bound).
    fields: Row,
    /// Statement to run; `None` for an update with nothing left to set.
    statement: Option<Statement>,
}

/// Runs a [`Plan`] and keeps the heap in step with storage.
pub struct Executor<'a> {
    store: &'a dyn RowStore,
    schema: &'a Schema,
    config: Config,
    stats: &'a EngineStats,
}

impl<'a> Executor<'a> {
    /// Creates an executor.
    pub fn new(store: &'a dyn RowStore, schema: &'a Schema, config: Config, stats: &'a EngineStats) -> Self {
        Self {
            store,
            schema,
            config,
            stats,
        }
    }

    /// Executes every command of `plan` in order.
    ///
    /// With `manage_transaction` the run is wrapped in begin/commit and
    /// rolled back on failure. Relation states are stored on their nodes
    /// only after every command succeeded.
    ///
    /// # Errors
    ///
    /// Stops at the first failing command. Storage failures are reported as
    /// [`CoreError::Transaction`] naming the command's role.
    pub fn execute(
        &self,
        heap: &mut Heap,
        plan: &Plan,
        relation_updates: Vec<RelationUpdate>,
    ) -> CoreResult<RunSummary> {
        let managed = self.config.manage_transaction && !plan.is_empty();
        if managed {
            self.store.begin()?;
        }

        let result = self
            .execute_commands(heap, plan)
            .and_then(|summary| {
                if managed {
                    self.store.commit()?;
                }
                Ok(summary)
            });

        match result {
            Ok(summary) => {
                for update in relation_updates {
                    update.apply(heap);
                }
                debug!(
                    inserts = summary.inserts,
                    updates = summary.updates,
                    deletes = summary.deletes,
                    split_updates = summary.split_updates,
                    "plan executed"
                );
                Ok(summary)
            }
            Err(err) => {
                if managed {
                    if let Err(rollback) = self.store.rollback() {
                        warn!(error = %rollback, "rollback failed");
                    }
                }
                Err(err)
            }
        }
    }

    fn execute_commands(&self, heap: &mut Heap, plan: &Plan) -> CoreResult<RunSummary> {
        let mut remaining: HashMap<EntityId, usize> = HashMap::new();
        for cmd in plan.commands() {
            for entity in touched(cmd) {
                *remaining.entry(entity.id()).or_default() += 1;
            }
        }

        let mut summary = RunSummary {
            split_updates: plan.split_count(),
            ..RunSummary::default()
        };
        for cmd in plan.commands() {
            let resolved = self.resolve(heap, cmd)?;
            match &resolved.statement {
                Some(statement) => {
                    trace!(command = %cmd, %statement, "execute");
                    let execution = self.store.execute(statement).map_err(|source| {
                        CoreError::Transaction {
                            role: cmd.role.clone(),
                            kind: cmd.kind.statement_kind(),
                            source,
                        }
                    })?;
                    self.count(cmd.kind, &mut summary);
                    self.apply(heap, cmd, resolved.fields, &execution)?;
                }
                None => trace!(command = %cmd, "nothing to update"),
            }

            for entity in touched(cmd) {
                let left = remaining.entry(entity.id()).or_default();
                *left = left.saturating_sub(1);
                if *left == 0 {
                    heap.set_status(entity, NodeStatus::Managed);
                }
            }
        }
        Ok(summary)
    }

    fn count(&self, kind: CommandKind, summary: &mut RunSummary) {
        match kind {
            CommandKind::Insert => {
                summary.inserts += 1;
                self.stats.record_insert();
            }
            CommandKind::Update => {
                summary.updates += 1;
                self.stats.record_update();
            }
            CommandKind::Delete => {
                summary.deletes += 1;
                self.stats.record_delete();
            }
        }
    }

    fn resolve(&self, heap: &Heap, cmd: &Command) -> CoreResult<Resolved> {
        let mut fields = cmd.values.clone();
        for binding in &cmd.bindings {
            let source = heap.get(&binding.source);
            for (local, remote) in &binding.pairs {
                let value = source
                    .and_then(|node| node.data.get(remote))
                    .filter(|value| !value.is_null())
                    .cloned()
                    .ok_or_else(|| CoreError::incomplete_binding(&cmd.role, &binding.relation, local))?;
                fields.insert(local.clone(), value);
            }
        }

        let (table, mut columns, mapping) = match &cmd.target {
            Some(_) => {
                let mapping = self.schema.entity(&cmd.role)?;
                (mapping.table.clone(), columns_of(mapping, &fields)?, Some(mapping))
            }
            // Pivot rows: the role is the table and fields are columns.
            None => (cmd.role.clone(), fields.clone(), None),
        };
        for fragment in &cmd.embedded {
            let embedded = self.schema.entity(&fragment.role)?;
            columns.extend(columns_of(embedded, &fragment.values)?);
        }

        let criteria = match (&cmd.scope, &cmd.target, mapping) {
            (Scope::None, _, _) => Row::new(),
            (Scope::Literal(criteria), _, _) => criteria.clone(),
            (Scope::Own, Some(target), Some(mapping)) => own_key(heap, cmd, target, mapping)?,
            (Scope::Own, _, _) => {
                return Err(CoreError::invalid_operation(format!(
                    "{cmd} addresses its own row but has no entity"
                )))
            }
        };

        let statement = match cmd.kind {
            CommandKind::Insert => Some(Statement::insert(table, columns)),
            CommandKind::Update if columns.is_empty() => None,
            CommandKind::Update => Some(Statement::update(table, columns, criteria)),
            CommandKind::Delete => Some(Statement::delete(table, criteria)),
        };
        Ok(Resolved { fields, statement })
    }

    fn apply(&self, heap: &mut Heap, cmd: &Command, mut fields: Row, execution: &Execution) -> CoreResult<()> {
        let Some(target) = &cmd.target else {
            return Ok(());
        };
        if cmd.kind == CommandKind::Delete {
            heap.remove(target);
            for fragment in &cmd.embedded {
                heap.remove(&fragment.entity);
            }
            return Ok(());
        }

        let mapping = self.schema.entity(&cmd.role)?;
        if cmd.kind == CommandKind::Insert {
            if let (Some(key), Some(generated)) = (generated_field(mapping), &execution.last_insert_id) {
                if fields.get(key).map_or(true, |v| v.is_null()) {
                    fields.insert(key.to_string(), generated.clone());
                }
            }
        }
        // Bound values, generated keys and unlinking nulls are new to the
        // entity itself.
        for (field, value) in &fields {
            if target.get(field).as_ref() != Some(value) {
                target.set(field.clone(), value.clone());
            }
        }
        heap.store_values(target, fields);
        for fragment in &cmd.embedded {
            heap.store_values(&fragment.entity, fragment.values.clone());
        }
        Ok(())
    }
}

/// Entities whose nodes a command updates.
fn touched(cmd: &Command) -> impl Iterator<Item = &Entity> {
    cmd.target
        .iter()
        .chain(cmd.embedded.iter().map(|fragment| &fragment.entity))
}

fn generated_field(mapping: &EntitySchema) -> Option<&str> {
    match mapping.primary_key.as_slice() {
        [key] if mapping.generated_key => Some(key.as_str()),
        _ => None,
    }
}

fn columns_of(mapping: &EntitySchema, fields: &Row) -> CoreResult<Row> {
    mapping.to_columns(fields).map_err(|field| {
        SchemaError::UnknownField {
            role: mapping.role.clone(),
            field,
        }
        .into()
    })
}

/// Persisted primary key of `target`, as column criteria.
fn own_key(heap: &Heap, cmd: &Command, target: &Entity, mapping: &EntitySchema) -> CoreResult<Row> {
    let node = heap.get(target);
    let mut criteria = Row::new();
    for field in &mapping.primary_key {
        let value = node
            .and_then(|n| n.data.get(field))
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| CoreError::incomplete_binding(&cmd.role, "primary key", field))?;
        let column = mapping.column_for(field).unwrap_or(field);
        criteria.insert(column.to_string(), value);
    }
    Ok(criteria)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Binding, CommandGraph};
    use crate::sequencer::Sequencer;
    use relmap_store::{row, InMemoryRowStore, StatementKind, StoreError, TableDef, Value};

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntitySchema::new("user", "users")
                    .fields(["id"])
                    .column("name", "user_name")
                    .primary_key(["id"])
                    .generated_key(),
            )
            .entity(
                EntitySchema::new("post", "posts")
                    .fields(["id", "user_id"])
                    .primary_key(["id"])
                    .generated_key(),
            )
            .build()
            .unwrap()
    }

    fn store() -> InMemoryRowStore {
        let store = InMemoryRowStore::new();
        store.create_table(
            TableDef::new("users")
                .columns(["id", "user_name"])
                .primary_key(["id"])
                .auto_increment("id"),
        );
        store.create_table(
            TableDef::new("posts")
                .columns(["id", "user_id"])
                .primary_key(["id"])
                .auto_increment("id")
                .not_null(["user_id"]),
        );
        store
    }

    fn plan(commands: Vec<Command>) -> Plan {
        let mut graph = CommandGraph::new();
        for cmd in commands {
            graph.push(cmd);
        }
        Sequencer::default().sequence(graph).unwrap()
    }

    #[test]
    fn insert_maps_columns_and_propagates_the_generated_key() {
        let (schema, store, stats) = (schema(), store(), EngineStats::new());
        let mut heap = Heap::new();
        let user = Entity::new("user").with_field("name", "ann");
        let post = Entity::new("post");
        heap.register(&user, "user", Row::new()).unwrap();
        heap.register(&post, "post", Row::new()).unwrap();
        let mut post_cmd = Command::insert(&post, Row::new());
        post_cmd.bind(Binding::new("author", &user, [("user_id", "id")], false));
        let plan = plan(vec![Command::insert(&user, row! { "name" => "ann" }), post_cmd]);

        let executor = Executor::new(&store, &schema, Config::default(), &stats);
        let summary = executor.execute(&mut heap, &plan, Vec::new()).unwrap();

        assert_eq!(summary.inserts, 2);
        assert_eq!(store.rows("users")[0].get("user_name"), Some(&Value::from("ann")));
        assert_eq!(user.get("id"), Some(Value::Integer(1)));
        assert_eq!(post.get("user_id"), Some(Value::Integer(1)));
        assert_eq!(heap.get(&post).map(|n| n.status), Some(NodeStatus::Managed));
        assert_eq!(stats.inserts(), 2);
    }

    #[test]
    fn unresolved_binding_is_an_incomplete_binding() {
        let (schema, store, stats) = (schema(), store(), EngineStats::new());
        let mut heap = Heap::new();
        let user = Entity::new("user");
        let post = Entity::new("post");
        heap.register(&user, "user", Row::new()).unwrap();
        heap.register(&post, "post", Row::new()).unwrap();
        let mut post_cmd = Command::insert(&post, Row::new());
        post_cmd.bind(Binding::new("author", &user, [("user_id", "id")], false));
        let plan = plan(vec![post_cmd]);

        let executor = Executor::new(&store, &schema, Config::default(), &stats);
        let err = executor.execute(&mut heap, &plan, Vec::new()).unwrap_err();

        assert!(matches!(err, CoreError::IncompleteBinding { ref field, .. } if field == "user_id"));
        assert!(!store.in_transaction());
        assert_eq!(store.statement_count(), 0);
    }

    #[test]
    fn store_failure_names_the_command_and_rolls_back() {
        let (schema, store, stats) = (schema(), store(), EngineStats::new());
        let mut heap = Heap::new();
        let user = Entity::new("user");
        let post = Entity::new("post");
        heap.register(&user, "user", Row::new()).unwrap();
        heap.register(&post, "post", Row::new()).unwrap();
        // the post row lacks its required user_id
        let plan = plan(vec![
            Command::insert(&user, row! { "name" => "ann" }),
            Command::insert(&post, Row::new()),
        ]);

        let executor = Executor::new(&store, &schema, Config::default(), &stats);
        let err = executor.execute(&mut heap, &plan, Vec::new()).unwrap_err();

        assert!(matches!(
            err,
            CoreError::Transaction {
                ref role,
                kind: StatementKind::Insert,
                source: StoreError::NotNullViolation { .. },
            } if role == "post"
        ));
        assert!(store.rows("users").is_empty());
        assert!(!store.in_transaction());
    }

    #[test]
    fn ambient_transaction_is_not_touched() {
        let (schema, store, stats) = (schema(), store(), EngineStats::new());
        let mut heap = Heap::new();
        let user = Entity::new("user");
        heap.register(&user, "user", Row::new()).unwrap();
        let plan = plan(vec![Command::insert(&user, row! { "name" => "ann" })]);

        store.begin().unwrap();
        let executor = Executor::new(&store, &schema, Config::new().manage_transaction(false), &stats);
        executor.execute(&mut heap, &plan, Vec::new()).unwrap();

        assert!(store.in_transaction());
        store.rollback().unwrap();
        assert!(store.rows("users").is_empty());
    }
}
