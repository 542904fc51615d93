//! Public unit-of-work surface.

use crate::builder::{GraphBuilder, RelationUpdate};
use crate::command::CommandKind;
use crate::config::Config;
use crate::entity::{Entity, EntityId};
use crate::error::CoreResult;
use crate::executor::{Executor, RunSummary};
use crate::heap::{Heap, SharedHeap};
use crate::schema::{RelationKind, Schema};
use crate::sequencer::{Plan, Sequencer};
use crate::stats::EngineStats;
use relmap_store::RowStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum Request {
    Persist(Entity),
    Delete(Entity),
}

/// Queues entities for persistence and writes them in one run.
///
/// A transaction may be run repeatedly; every `run()` consumes the queue,
/// whether it succeeds or not. Entities committed by earlier runs stay
/// `Managed` in the shared heap and are diffed from their new snapshot.
///
/// ```rust,ignore
/// let mut tx = Transaction::new(store, schema, Heap::shared());
/// tx.persist(&user);
/// tx.delete(&stale_post);
/// let summary = tx.run()?;
/// ```
pub struct Transaction {
    store: Arc<dyn RowStore>,
    schema: Arc<Schema>,
    heap: SharedHeap,
    config: Config,
    stats: Arc<EngineStats>,
    queue: Vec<Request>,
}

impl Transaction {
    /// Creates a transaction with the default configuration.
    pub fn new(store: Arc<dyn RowStore>, schema: Arc<Schema>, heap: SharedHeap) -> Self {
        Self {
            store,
            schema,
            heap,
            config: Config::default(),
            stats: Arc::new(EngineStats::new()),
            queue: Vec::new(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Shares a statistics handle with other transactions.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<EngineStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Statistics handle.
    #[must_use]
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Shared heap.
    #[must_use]
    pub fn heap(&self) -> &SharedHeap {
        &self.heap
    }

    /// Queues `entity` and its cascading relations for persistence.
    pub fn persist(&mut self, entity: &Entity) {
        self.queue.push(Request::Persist(entity.clone()));
    }

    /// Queues several entities for persistence.
    pub fn persist_all<'e, I>(&mut self, entities: I)
    where
        I: IntoIterator<Item = &'e Entity>,
    {
        for entity in entities {
            self.persist(entity);
        }
    }

    /// Queues `entity` for deletion.
    pub fn delete(&mut self, entity: &Entity) {
        self.queue.push(Request::Delete(entity.clone()));
    }

    /// Number of queued requests.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Builds and sequences the queued requests against a copy of the heap
    /// without writing anything. The queue is kept.
    ///
    /// # Errors
    ///
    /// Returns the build or sequencing error `run()` would return.
    pub fn plan(&self) -> CoreResult<Plan> {
        let mut heap = self.heap.lock().clone();
        let (plan, _) = self.build(&mut heap, &self.queue)?;
        Ok(plan)
    }

    /// Writes every queued request in dependency order.
    ///
    /// # Errors
    ///
    /// Build and sequencing errors leave storage untouched. Execution errors
    /// abort the remaining commands; see [`crate::CoreError::Transaction`].
    pub fn run(&mut self) -> CoreResult<RunSummary> {
        let queue = std::mem::take(&mut self.queue);
        self.stats.record_run_start();

        let result = self.run_queue(&queue);
        match &result {
            Ok(summary) => {
                self.stats.record_run_commit();
                debug!(writes = summary.writes(), "run committed");
            }
            Err(err) => {
                self.stats.record_run_failure();
                warn!(error = %err, role = err.failed_role(), "run failed");
            }
        }
        result
    }

    fn run_queue(&self, queue: &[Request]) -> CoreResult<RunSummary> {
        // Loaders may lock the heap, so deferred children are loaded first.
        let mut seen = HashSet::new();
        for request in queue {
            if let Request::Delete(entity) = request {
                self.preload_children(entity, &mut seen)?;
            }
        }
        for entity in self.implied_deletes(queue) {
            self.preload_children(&entity, &mut seen)?;
        }

        let mut heap = self.heap.lock();
        let (plan, relation_updates) = match self.build(&mut heap, queue) {
            Ok(built) => built,
            Err(err) => {
                heap.reset();
                return Err(err);
            }
        };
        self.stats.record_planned(plan.len(), plan.split_count());
        if plan.is_empty() {
            for update in relation_updates {
                update.apply(&mut heap);
            }
            debug!("nothing to write");
            return Ok(RunSummary::default());
        }

        let checkpoint = self.config.reset_heap_on_failure.then(|| {
            let entities: Vec<Entity> = plan
                .commands()
                .flat_map(|cmd| {
                    cmd.target
                        .iter()
                        .cloned()
                        .chain(cmd.embedded.iter().map(|f| f.entity.clone()))
                })
                .collect();
            heap.checkpoint(&entities)
        });

        let executor = Executor::new(self.store.as_ref(), &self.schema, self.config, &self.stats);
        executor
            .execute(&mut heap, &plan, relation_updates)
            .inspect_err(|_| {
                if let Some(checkpoint) = checkpoint {
                    heap.restore(checkpoint);
                    heap.reset();
                }
            })
    }

    fn build(
        &self,
        heap: &mut Heap,
        queue: &[Request],
    ) -> CoreResult<(Plan, Vec<RelationUpdate>)> {
        let mut builder = GraphBuilder::new(&self.schema, heap);
        for request in queue {
            match request {
                Request::Persist(entity) => builder.persist(entity)?,
                Request::Delete(entity) => builder.delete(entity)?,
            }
        }
        let built = builder.finish()?;
        let plan = Sequencer::new(self.config).sequence(built.graph)?;
        Ok((plan, built.relation_updates))
    }

    /// Entities a run would delete without being asked to, such as required
    /// orphans. Found by building against a copy of the heap.
    fn implied_deletes(&self, queue: &[Request]) -> Vec<Entity> {
        if !queue.iter().any(|request| matches!(request, Request::Persist(_))) {
            return Vec::new();
        }
        let mut heap = self.heap.lock().clone();
        // a failing build is reported by the real one
        let Ok((plan, _)) = self.build(&mut heap, queue) else {
            return Vec::new();
        };
        plan.commands()
            .filter(|cmd| cmd.kind == CommandKind::Delete)
            .filter_map(|cmd| cmd.target.clone())
            .collect()
    }

    /// Resolves deferred has-one/has-many slots along cascading relations of
    /// an entity about to be deleted.
    fn preload_children(&self, entity: &Entity, seen: &mut HashSet<EntityId>) -> CoreResult<()> {
        if !seen.insert(entity.id()) {
            return Ok(());
        }
        for relation in self.schema.relations(entity.role())? {
            if !matches!(relation.kind, RelationKind::HasOne | RelationKind::HasMany) {
                continue;
            }
            let Some(value) = entity.fetch(&relation.name)? else {
                continue;
            };
            if relation.cascade && !relation.nullable {
                for child in value.loaded().into_iter().flatten() {
                    self.preload_children(&child, seen)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("config", &self.config)
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}
