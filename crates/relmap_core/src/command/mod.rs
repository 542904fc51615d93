//! Write commands and the command graph.

mod graph;

pub use graph::CommandGraph;

use crate::entity::Entity;
use crate::types::CommandId;
use relmap_store::{Row, StatementKind};
use std::fmt;

/// Kind of write a command performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Insert a row.
    Insert,
    /// Update a row.
    Update,
    /// Delete a row.
    Delete,
}

impl CommandKind {
    /// Matching statement kind.
    #[must_use]
    pub const fn statement_kind(self) -> StatementKind {
        match self {
            Self::Insert => StatementKind::Insert,
            Self::Update => StatementKind::Update,
            Self::Delete => StatementKind::Delete,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.statement_kind(), f)
    }
}

/// How an update or delete addresses its row.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scope {
    /// No criteria (inserts).
    #[default]
    None,
    /// The target entity's persisted primary key, read at execution time.
    Own,
    /// Fixed column criteria (pivot rows).
    Literal(Row),
}

/// Which pass of the sequencer produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Emitted by the graph builder.
    Original,
    /// Follow-up update split off `of` to break a cycle.
    Deferred {
        /// The command whose binding was deferred.
        of: CommandId,
    },
}

/// A foreign-key value that is only known once `source` is written.
///
/// At execution time each `(local, source_field)` pair copies the source's
/// persisted `source_field` into the command's `local` field. Composite keys
/// are one binding: all pairs resolve together.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Relation the binding belongs to.
    pub relation: String,
    /// Entity whose persisted values are copied.
    pub source: Entity,
    /// (local field, source field) pairs.
    pub pairs: Vec<(String, String)>,
    /// Whether the binding may be moved into a follow-up update.
    pub nullable: bool,
}

impl Binding {
    /// Creates a binding.
    pub fn new<'a, I>(relation: impl Into<String>, source: &Entity, pairs: I, nullable: bool) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self {
            relation: relation.into(),
            source: source.clone(),
            pairs: pairs
                .into_iter()
                .map(|(local, remote)| (local.to_string(), remote.to_string()))
                .collect(),
            nullable,
        }
    }

    /// Local fields written by the binding.
    pub fn local_fields(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(local, _)| local.as_str())
    }

    /// Source fields read by the binding.
    pub fn source_fields(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(_, remote)| remote.as_str())
    }

    fn same_fields(&self, other: &Binding) -> bool {
        self.local_fields().eq(other.local_fields())
    }
}

/// Column slice of the parent row written on behalf of an embedded entity.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// The embedded entity.
    pub entity: Entity,
    /// Embedded role (maps fields to columns).
    pub role: String,
    /// Field values to write.
    pub values: Row,
}

/// One atomic write intent.
///
/// `target` is `None` for pivot rows; their `role` is the pivot table and
/// their fields are column names.
#[derive(Debug, Clone)]
pub struct Command {
    /// Position in the graph.
    pub id: CommandId,
    /// Write kind.
    pub kind: CommandKind,
    /// Role of the row.
    pub role: String,
    /// Entity the row belongs to.
    pub target: Option<Entity>,
    /// Literal field values.
    pub values: Row,
    /// Deferred values.
    pub bindings: Vec<Binding>,
    /// Row address for updates and deletes.
    pub scope: Scope,
    /// Embedded fragments merged into the row.
    pub embedded: Vec<Fragment>,
    /// Commands that must complete first.
    pub after: Vec<CommandId>,
    /// Producing pass.
    pub phase: Phase,
}

impl Command {
    fn new(kind: CommandKind, role: impl Into<String>, target: Option<&Entity>, scope: Scope) -> Self {
        Self {
            id: CommandId::new(0),
            kind,
            role: role.into(),
            target: target.cloned(),
            values: Row::new(),
            bindings: Vec::new(),
            scope,
            embedded: Vec::new(),
            after: Vec::new(),
            phase: Phase::Original,
        }
    }

    /// Insert of `entity`'s row.
    #[must_use]
    pub fn insert(entity: &Entity, values: Row) -> Self {
        let mut cmd = Self::new(CommandKind::Insert, entity.role(), Some(entity), Scope::None);
        cmd.values = values;
        cmd
    }

    /// Update of `entity`'s row.
    #[must_use]
    pub fn update(entity: &Entity, values: Row) -> Self {
        let mut cmd = Self::new(CommandKind::Update, entity.role(), Some(entity), Scope::Own);
        cmd.values = values;
        cmd
    }

    /// Delete of `entity`'s row.
    #[must_use]
    pub fn delete(entity: &Entity) -> Self {
        Self::new(CommandKind::Delete, entity.role(), Some(entity), Scope::Own)
    }

    /// Empty update addressing the same row as `command`.
    #[must_use]
    pub fn update_of(command: &Command) -> Self {
        Self::new(
            CommandKind::Update,
            command.role.clone(),
            command.target.as_ref(),
            Scope::Own,
        )
    }

    /// Insert of a pivot row.
    pub fn pivot_insert(table: impl Into<String>) -> Self {
        Self::new(CommandKind::Insert, table, None, Scope::None)
    }

    /// Delete of the pivot rows matching `criteria`.
    pub fn pivot_delete(table: impl Into<String>, criteria: Row) -> Self {
        Self::new(CommandKind::Delete, table, None, Scope::Literal(criteria))
    }

    /// Adds a binding, replacing any binding on the same fields. Literal
    /// values for those fields are dropped.
    pub fn bind(&mut self, binding: Binding) {
        for field in binding.local_fields() {
            self.values.remove(field);
        }
        self.bindings.retain(|b| !b.same_fields(&binding));
        self.bindings.push(binding);
    }

    /// Removes bindings and literal values for `fields`.
    pub fn strip<'a, I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for field in fields {
            self.values.remove(field);
            self.bindings.retain(|b| b.local_fields().all(|f| f != field));
        }
    }

    /// Returns true if a binding writes `field`.
    #[must_use]
    pub fn binds(&self, field: &str) -> bool {
        self.bindings.iter().any(|b| b.local_fields().any(|f| f == field))
    }

    /// Returns true if the command writes any of `fields` (literally or
    /// through a binding).
    #[must_use]
    pub fn writes_any<'a, I>(&self, mut fields: I) -> bool
    where
        I: Iterator<Item = &'a str>,
    {
        fields.any(|f| self.values.contains_key(f) || self.binds(f))
    }

    /// Returns true if a binding may be deferred: the relation is nullable,
    /// or the row already exists.
    #[must_use]
    pub fn can_defer(&self, binding: &Binding) -> bool {
        binding.nullable || self.kind == CommandKind::Update
    }

    /// Returns true for an update that writes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.kind == CommandKind::Update
            && self.values.is_empty()
            && self.bindings.is_empty()
            && self.embedded.iter().all(|f| f.values.is_empty())
    }

    /// Adds an ordering constraint.
    pub fn run_after(&mut self, id: CommandId) {
        if id != self.id && !self.after.contains(&id) {
            self.after.push(id);
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.id, self.kind, self.role)?;
        if let Phase::Deferred { of } = self.phase {
            write!(f, " (deferred from {of})")?;
        }
        Ok(())
    }
}
