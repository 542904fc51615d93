//! Post-walk passes of the graph builder.

use super::{BuiltGraph, GraphBuilder, Orphan};
use crate::command::{Command, CommandKind};
use crate::error::{CoreError, CoreResult};
use crate::heap::{Node, NodeStatus};
use crate::schema::RelationKind;
use relmap_store::{Row, Value};
use tracing::{debug, trace};

impl GraphBuilder<'_> {
    /// Settles orphans, orders deletes, prunes no-op updates, validates
    /// references and marks node statuses.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RequiredRelationMissing`] for an insert or update
    /// that leaves a required foreign key empty, and
    /// [`CoreError::UnresolvableReference`] for a binding whose source is
    /// neither stored nor inserted in this run.
    pub fn finish(mut self) -> CoreResult<BuiltGraph> {
        let orphans = std::mem::take(&mut self.orphans);
        for orphan in orphans {
            self.settle_orphan(orphan)?;
        }
        self.order_deletes();
        let pruned = self.graph.retain(|cmd| !cmd.is_noop());
        self.check_required()?;
        self.check_references()?;
        self.mark_scheduled();

        debug!(
            commands = self.graph.len(),
            pruned,
            visited = self.visited.len(),
            "command graph built"
        );
        Ok(BuiltGraph {
            graph: self.graph,
            relation_updates: self.relation_updates,
        })
    }

    fn settle_orphan(&mut self, orphan: Orphan) -> CoreResult<()> {
        let Orphan {
            parent,
            relation,
            child,
            links,
        } = orphan;
        if self.is_deleting(&child) {
            return Ok(());
        }
        let (Some(child_node), Some(parent_node)) = (self.heap.get(&child), self.heap.get(&parent))
        else {
            return Ok(());
        };
        // Only rows that still point at this parent are affected.
        let linked = child_node.is_persisted()
            && child_node.key(&relation.outer_key).is_some()
            && child_node.key(&relation.outer_key) == parent_node.key(&relation.inner_key);
        if !linked {
            return Ok(());
        }
        if let Some(own) = self.graph.own(&child) {
            if relation.outer_key.iter().any(|f| self.graph[own].binds(f)) {
                return Ok(());
            }
        }

        let target = if relation.nullable {
            let nulls: Row = relation
                .outer_key
                .iter()
                .map(|f| (f.clone(), Value::Null))
                .collect();
            let id = match self.graph.own(&child) {
                Some(own) => {
                    self.graph[own].values.extend(nulls);
                    own
                }
                None => self.graph.push(Command::update(&child, nulls)),
            };
            trace!(role = child.role(), relation = %relation.name, "orphan unlinked");
            Some(id)
        } else if !relation.cascade || self.is_visited(&child) {
            debug!(
                role = child.role(),
                relation = %relation.name,
                "required orphan kept"
            );
            None
        } else {
            trace!(role = child.role(), relation = %relation.name, "orphan deleted");
            self.schedule_delete(&child)?
        };

        if let Some(id) = target {
            for link in links {
                self.graph[id].run_after(link);
            }
        }
        Ok(())
    }

    fn order_deletes(&mut self) {
        for (released, command) in std::mem::take(&mut self.releases) {
            if let Some(delete) = self.graph.delete_of(&released) {
                self.graph[delete].run_after(command);
            }
        }
    }

    fn check_required(&self) -> CoreResult<()> {
        for cmd in self.graph.iter() {
            if cmd.target.is_none() || cmd.kind == CommandKind::Delete {
                continue;
            }
            let mapping = self.schema.entity(&cmd.role)?;
            let required = mapping
                .relations
                .iter()
                .filter(|r| r.kind == RelationKind::BelongsTo && !r.nullable);
            for relation in required {
                let filled = relation.inner_key.iter().all(|field| {
                    cmd.binds(field)
                        || match cmd.values.get(field) {
                            Some(value) => !value.is_null(),
                            None => cmd.kind == CommandKind::Update,
                        }
                });
                if !filled {
                    return Err(CoreError::required_relation(&cmd.role, &relation.name));
                }
            }
        }
        Ok(())
    }

    fn check_references(&self) -> CoreResult<()> {
        for cmd in self.graph.iter() {
            for binding in &cmd.bindings {
                let source = &binding.source;
                let stored = self.heap.get(source).is_some_and(Node::is_persisted);
                let produced = self.graph.producer(binding).is_some();
                if self.is_deleting(source) || !(stored || produced) {
                    return Err(CoreError::UnresolvableReference {
                        role: cmd.role.clone(),
                        relation: binding.relation.clone(),
                        target: source.role().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn mark_scheduled(&mut self) {
        // Deletes are applied last so they win over updates merged into the
        // same entity.
        for deletes in [false, true] {
            for cmd in self.graph.iter() {
                if (cmd.kind == CommandKind::Delete) != deletes {
                    continue;
                }
                let status = match cmd.kind {
                    CommandKind::Insert => NodeStatus::ScheduledForInsert,
                    CommandKind::Update => NodeStatus::ScheduledForUpdate,
                    CommandKind::Delete => NodeStatus::ScheduledForDelete,
                };
                let entities = cmd
                    .target
                    .iter()
                    .chain(cmd.embedded.iter().map(|f| &f.entity));
                for entity in entities {
                    self.heap.set_status(entity, status);
                }
            }
        }
    }
}
