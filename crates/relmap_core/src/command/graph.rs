//! Arena of commands with derived dependency edges.

use super::{Binding, Command, CommandKind, Phase};
use crate::entity::{Entity, EntityId};
use crate::types::CommandId;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::{Index, IndexMut};

/// Commands of one run, indexed by [`CommandId`].
///
/// Edges are not stored separately. A command depends on every command in
/// its `after` list and on the producer of each of its bindings, so moving a
/// binding moves its edge with it.
#[derive(Debug, Clone, Default)]
pub struct CommandGraph {
    commands: Vec<Command>,
    by_entity: HashMap<EntityId, Vec<CommandId>>,
}

impl CommandGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if there are no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Appends a command and returns its id.
    pub fn push(&mut self, mut command: Command) -> CommandId {
        let id = CommandId::new(self.commands.len());
        command.id = id;
        if let Some(target) = &command.target {
            self.by_entity.entry(target.id()).or_default().push(id);
        }
        self.commands.push(command);
        id
    }

    /// Command by id.
    #[must_use]
    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.commands.get(id.index())
    }

    /// Commands in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Mutable commands in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Command> {
        self.commands.iter_mut()
    }

    /// Ids of the commands targeting `entity`.
    #[must_use]
    pub fn commands_for(&self, entity: &Entity) -> &[CommandId] {
        self.by_entity
            .get(&entity.id())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn find_for(&self, entity: &Entity, kinds: &[CommandKind]) -> Option<CommandId> {
        self.commands_for(entity).iter().copied().find(|id| {
            let cmd = &self[*id];
            cmd.phase == Phase::Original && kinds.contains(&cmd.kind)
        })
    }

    /// The builder-emitted insert or update of `entity`.
    #[must_use]
    pub fn own(&self, entity: &Entity) -> Option<CommandId> {
        self.find_for(entity, &[CommandKind::Insert, CommandKind::Update])
    }

    /// The delete of `entity`.
    #[must_use]
    pub fn delete_of(&self, entity: &Entity) -> Option<CommandId> {
        self.find_for(entity, &[CommandKind::Delete])
    }

    /// The command that establishes the values `binding` reads: the source's
    /// insert, or an update of the source that writes one of the read fields.
    /// Split follow-ups never produce.
    #[must_use]
    pub fn producer(&self, binding: &Binding) -> Option<CommandId> {
        self.commands_for(&binding.source)
            .iter()
            .copied()
            .find(|id| {
                let cmd = &self[*id];
                cmd.phase == Phase::Original
                    && match cmd.kind {
                        CommandKind::Insert => true,
                        CommandKind::Update => cmd.writes_any(binding.source_fields()),
                        CommandKind::Delete => false,
                    }
            })
    }

    /// Commands `id` depends on, ascending and without duplicates. A command
    /// bound to its own insert lists itself.
    #[must_use]
    pub fn dependencies(&self, id: CommandId) -> Vec<CommandId> {
        let cmd = &self[id];
        let mut deps: BTreeSet<CommandId> = cmd.after.iter().copied().collect();
        deps.extend(cmd.bindings.iter().filter_map(|b| self.producer(b)));
        deps.into_iter().collect()
    }

    /// Drops commands rejected by `keep`. Commands that depended on a dropped
    /// command inherit its `after` list; ids are compacted in order.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Command) -> bool,
    {
        let kept: Vec<bool> = self.commands.iter().map(|c| keep(c)).collect();
        let dropped = kept.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return 0;
        }

        let mut remap = vec![None; self.commands.len()];
        let mut next = 0;
        for (index, is_kept) in kept.iter().enumerate() {
            if *is_kept {
                remap[index] = Some(CommandId::new(next));
                next += 1;
            }
        }

        let old = std::mem::take(&mut self.commands);
        let afters: Vec<Vec<CommandId>> = old.iter().map(|c| c.after.clone()).collect();
        self.by_entity.clear();
        for (index, mut cmd) in old.into_iter().enumerate() {
            if !kept[index] {
                continue;
            }
            let mut after = Vec::new();
            let mut seen = HashSet::new();
            let mut stack: Vec<CommandId> = cmd.after.iter().rev().copied().collect();
            while let Some(dep) = stack.pop() {
                if !seen.insert(dep) {
                    continue;
                }
                match remap[dep.index()] {
                    Some(new_id) => after.push(new_id),
                    None => stack.extend(afters[dep.index()].iter().rev().copied()),
                }
            }
            cmd.after = after;
            if let Phase::Deferred { of } = cmd.phase {
                if let Some(new_of) = remap[of.index()] {
                    cmd.phase = Phase::Deferred { of: new_of };
                }
            }
            self.push(cmd);
        }
        dropped
    }
}

impl Index<CommandId> for CommandGraph {
    type Output = Command;

    fn index(&self, id: CommandId) -> &Command {
        &self.commands[id.index()]
    }
}

impl IndexMut<CommandId> for CommandGraph {
    fn index_mut(&mut self, id: CommandId) -> &mut Command {
        &mut self.commands[id.index()]
    }
}
