//! Dependency ordering and cycle resolution.
//!
//! The sequencer runs Kahn's algorithm over the command graph, always taking
//! the lowest ready [`CommandId`]. When it stalls, the remaining commands
//! contain a cycle. It finds the strongly connected components of the
//! remaining graph (Tarjan), takes the component with the lowest member id,
//! and splits the first member (in id order) holding a deferrable binding
//! whose producer lies in the same component: the binding moves into a
//! follow-up update that runs after the original command. Each split removes
//! an edge inside the component, so the loop always makes progress.

use crate::command::{Command, CommandGraph, Phase};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::types::CommandId;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Sequenced commands ready for execution.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    graph: CommandGraph,
    order: Vec<CommandId>,
    splits: usize,
}

impl Plan {
    /// Commands in execution order.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.order.iter().map(move |id| &self.graph[*id])
    }

    /// Execution order.
    #[must_use]
    pub fn order(&self) -> &[CommandId] {
        &self.order
    }

    /// Underlying graph, including split follow-ups.
    #[must_use]
    pub fn graph(&self) -> &CommandGraph {
        &self.graph
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing is to be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of follow-up updates created to break cycles.
    #[must_use]
    pub fn split_count(&self) -> usize {
        self.splits
    }

    /// Position of `id` in the execution order.
    #[must_use]
    pub fn position(&self, id: CommandId) -> Option<usize> {
        self.order.iter().position(|o| *o == id)
    }
}

/// Orders a command graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequencer {
    config: Config,
}

impl Sequencer {
    /// Creates a sequencer.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Produces an execution order, splitting cycles where possible.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CyclicDependency`] when a cycle has no deferrable
    /// binding, when splitting is disabled, or when the split budget runs
    /// out.
    pub fn sequence(&self, mut graph: CommandGraph) -> CoreResult<Plan> {
        let mut scheduled = vec![false; graph.len()];
        let mut order = Vec::with_capacity(graph.len());
        let mut splits = 0;

        loop {
            drain_ready(&graph, &mut scheduled, &mut order);
            if order.len() == graph.len() {
                break;
            }

            let remaining: Vec<CommandId> = (0..graph.len())
                .filter(|i| !scheduled[*i])
                .map(CommandId::new)
                .collect();
            let edges = remaining_edges(&graph, &scheduled);
            let Some(cycle) = first_cycle(&remaining, &edges) else {
                // Unreachable for a consistent graph: a stall implies a cycle.
                return Err(cyclic(&graph, &remaining));
            };

            if !self.config.split_cycles || splits >= self.config.max_split_rounds {
                return Err(cyclic(&graph, &cycle));
            }
            let Some((command, binding)) = split_point(&graph, &cycle) else {
                return Err(cyclic(&graph, &cycle));
            };

            let relation = graph[command].bindings[binding].relation.clone();
            let follow_up = split(&mut graph, &scheduled, command, binding);
            if follow_up.index() == scheduled.len() {
                scheduled.push(false);
            }
            splits += 1;
            warn!(
                command = %graph[command],
                relation = %relation,
                follow_up = %follow_up,
                "dependency cycle split into deferred update"
            );
        }

        debug!(commands = order.len(), splits, "commands sequenced");
        Ok(Plan {
            graph,
            order,
            splits,
        })
    }
}

/// Kahn's algorithm over the unscheduled commands, lowest id first.
fn drain_ready(graph: &CommandGraph, scheduled: &mut [bool], order: &mut Vec<CommandId>) {
    let n = graph.len();
    let mut pending = vec![0usize; n];
    let mut dependents: Vec<Vec<CommandId>> = vec![Vec::new(); n];
    let mut ready = BTreeSet::new();

    for index in (0..n).filter(|i| !scheduled[*i]) {
        let id = CommandId::new(index);
        for dep in graph.dependencies(id) {
            if !scheduled[dep.index()] {
                pending[index] += 1;
                dependents[dep.index()].push(id);
            }
        }
        if pending[index] == 0 {
            ready.insert(id);
        }
    }

    while let Some(id) = ready.pop_first() {
        scheduled[id.index()] = true;
        order.push(id);
        for dependent in &dependents[id.index()] {
            let count = &mut pending[dependent.index()];
            *count -= 1;
            if *count == 0 {
                ready.insert(*dependent);
            }
        }
    }
}

fn remaining_edges(graph: &CommandGraph, scheduled: &[bool]) -> Vec<Vec<CommandId>> {
    (0..graph.len())
        .map(|index| {
            if scheduled[index] {
                return Vec::new();
            }
            graph
                .dependencies(CommandId::new(index))
                .into_iter()
                .filter(|dep| !scheduled[dep.index()])
                .collect()
        })
        .collect()
}

/// The cyclic strongly connected component with the lowest member id.
fn first_cycle(nodes: &[CommandId], edges: &[Vec<CommandId>]) -> Option<Vec<CommandId>> {
    strongly_connected(nodes, edges)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || edges[component[0].index()].contains(&component[0])
        })
        .min_by_key(|component| component[0])
}

/// Tarjan's algorithm, iterative. Components come back with members sorted.
fn strongly_connected(nodes: &[CommandId], edges: &[Vec<CommandId>]) -> Vec<Vec<CommandId>> {
    let n = edges.len();
    let mut index_of: Vec<Option<usize>> = vec![None; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<CommandId> = Vec::new();
    let mut components = Vec::new();
    let mut counter = 0;

    for &start in nodes {
        if index_of[start.index()].is_some() {
            continue;
        }
        let mut calls: Vec<(CommandId, usize)> = vec![(start, 0)];
        index_of[start.index()] = Some(counter);
        low[start.index()] = counter;
        counter += 1;
        stack.push(start);
        on_stack[start.index()] = true;

        while let Some(frame) = calls.last_mut() {
            let (v, next) = *frame;
            if let Some(&w) = edges[v.index()].get(next) {
                frame.1 += 1;
                match index_of[w.index()] {
                    None => {
                        index_of[w.index()] = Some(counter);
                        low[w.index()] = counter;
                        counter += 1;
                        stack.push(w);
                        on_stack[w.index()] = true;
                        calls.push((w, 0));
                    }
                    Some(w_index) if on_stack[w.index()] => {
                        low[v.index()] = low[v.index()].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            calls.pop();
            if let Some(&(parent, _)) = calls.last() {
                low[parent.index()] = low[parent.index()].min(low[v.index()]);
            }
            if Some(low[v.index()]) == index_of[v.index()] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w.index()] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }
    components
}

/// First entity command, in id order, with a deferrable binding produced
/// inside the component. Returns the command and the binding's index.
fn split_point(graph: &CommandGraph, component: &[CommandId]) -> Option<(CommandId, usize)> {
    component.iter().find_map(|&id| {
        let cmd = &graph[id];
        if cmd.target.is_none() {
            return None;
        }
        cmd.bindings
            .iter()
            .position(|binding| {
                cmd.can_defer(binding)
                    && graph
                        .producer(binding)
                        .is_some_and(|producer| component.binary_search(&producer).is_ok())
            })
            .map(|index| (id, index))
    })
}

/// Moves binding `index` of `command` into a follow-up update that runs
/// after it. An unscheduled follow-up of the same command is reused.
fn split(graph: &mut CommandGraph, scheduled: &[bool], command: CommandId, index: usize) -> CommandId {
    let binding = graph[command].bindings.remove(index);
    let existing = graph.iter().find_map(|cmd| {
        let pending = scheduled.get(cmd.id.index()).map_or(true, |done| !done);
        (pending && cmd.phase == Phase::Deferred { of: command }).then_some(cmd.id)
    });
    if let Some(follow_up) = existing {
        graph[follow_up].bind(binding);
        return follow_up;
    }

    let mut follow_up = Command::update_of(&graph[command]);
    follow_up.phase = Phase::Deferred { of: command };
    follow_up.bind(binding);
    let id = graph.push(follow_up);
    graph[id].run_after(command);
    id
}

fn cyclic(graph: &CommandGraph, members: &[CommandId]) -> CoreError {
    let mut roles: Vec<String> = Vec::new();
    for id in members {
        let role = &graph[*id].role;
        if !roles.contains(role) {
            roles.push(role.clone());
        }
    }
    CoreError::CyclicDependency { roles }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Binding;
    use crate::entity::Entity;
    use relmap_store::Row;

    fn insert_bound(graph: &mut CommandGraph, entity: &Entity, sources: &[(&Entity, bool)]) {
        let mut cmd = Command::insert(entity, Row::new());
        for (i, (source, nullable)) in sources.iter().enumerate() {
            let field = format!("ref{i}");
            cmd.bind(Binding::new("ref", source, [(field.as_str(), "id")], *nullable));
        }
        graph.push(cmd);
    }

    fn ids(plan: &Plan) -> Vec<usize> {
        plan.order().iter().map(|id| id.index()).collect()
    }

    #[test]
    fn orders_by_dependencies_then_id() {
        let a = Entity::new("a");
        let b = Entity::new("b");
        let c = Entity::new("c");
        let mut graph = CommandGraph::new();
        insert_bound(&mut graph, &a, &[(&b, false)]);
        insert_bound(&mut graph, &b, &[]);
        insert_bound(&mut graph, &c, &[]);

        let plan = Sequencer::default().sequence(graph).unwrap();
        assert_eq!(ids(&plan), vec![1, 0, 2]);
        assert_eq!(plan.split_count(), 0);
    }

    #[test]
    fn two_cycle_splits_first_nullable_member() {
        let a = Entity::new("a");
        let b = Entity::new("b");
        let mut graph = CommandGraph::new();
        insert_bound(&mut graph, &a, &[(&b, true)]);
        insert_bound(&mut graph, &b, &[(&a, true)]);

        let plan = Sequencer::default().sequence(graph).unwrap();
        assert_eq!(plan.split_count(), 1);
        assert_eq!(ids(&plan), vec![0, 1, 2]);
        let follow_up = &plan.graph()[CommandId::new(2)];
        assert_eq!(follow_up.kind, crate::command::CommandKind::Update);
        assert_eq!(follow_up.phase, Phase::Deferred { of: CommandId::new(0) });
        assert_eq!(follow_up.bindings[0].source, b);
        assert!(plan.graph()[CommandId::new(0)].bindings.is_empty());
    }

    #[test]
    fn required_side_is_never_split() {
        let a = Entity::new("a");
        let b = Entity::new("b");
        let mut graph = CommandGraph::new();
        insert_bound(&mut graph, &a, &[(&b, false)]);
        insert_bound(&mut graph, &b, &[(&a, true)]);

        let plan = Sequencer::default().sequence(graph).unwrap();
        let follow_up = &plan.graph()[CommandId::new(2)];
        assert_eq!(follow_up.phase, Phase::Deferred { of: CommandId::new(1) });
        assert_eq!(ids(&plan), vec![1, 0, 2]);
    }

    #[test]
    fn unsplittable_cycle_names_roles() {
        let a = Entity::new("a");
        let b = Entity::new("b");
        let mut graph = CommandGraph::new();
        insert_bound(&mut graph, &a, &[(&b, false)]);
        insert_bound(&mut graph, &b, &[(&a, false)]);

        match Sequencer::default().sequence(graph) {
            Err(CoreError::CyclicDependency { roles }) => assert_eq!(roles, vec!["a", "b"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn splitting_can_be_disabled() {
        let a = Entity::new("a");
        let b = Entity::new("b");
        let mut graph = CommandGraph::new();
        insert_bound(&mut graph, &a, &[(&b, true)]);
        insert_bound(&mut graph, &b, &[(&a, true)]);

        let sequencer = Sequencer::new(Config::default().split_cycles(false));
        assert!(matches!(
            sequencer.sequence(graph),
            Err(CoreError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn self_loop_is_split() {
        let node = Entity::new("node");
        let mut graph = CommandGraph::new();
        insert_bound(&mut graph, &node, &[(&node, true)]);

        let plan = Sequencer::default().sequence(graph).unwrap();
        assert_eq!(ids(&plan), vec![0, 1]);
        assert_eq!(plan.split_count(), 1);
    }

    #[test]
    fn overlapping_cycles_share_a_node() {
        // a <-> b and b <-> c, all nullable
        let a = Entity::new("a");
        let b = Entity::new("b");
        let c = Entity::new("c");
        let mut graph = CommandGraph::new();
        insert_bound(&mut graph, &a, &[(&b, true)]);
        insert_bound(&mut graph, &b, &[(&a, true), (&c, true)]);
        insert_bound(&mut graph, &c, &[(&b, true)]);

        let plan = Sequencer::default().sequence(graph).unwrap();
        assert_eq!(plan.len(), 3 + plan.split_count());
        assert!(plan.split_count() >= 1);
        for cmd in plan.commands() {
            let at = plan.position(cmd.id).unwrap();
            for dep in plan.graph().dependencies(cmd.id) {
                assert!(plan.position(dep).unwrap() < at, "{dep} must precede {}", cmd.id);
            }
        }
    }

    #[test]
    fn n_cycle_needs_one_split() {
        for n in 2..8 {
            let nodes: Vec<_> = (0..n).map(|_| Entity::new("link")).collect();
            let mut graph = CommandGraph::new();
            for i in 0..n {
                insert_bound(&mut graph, &nodes[i], &[(&nodes[(i + 1) % n], true)]);
            }
            let plan = Sequencer::default().sequence(graph).unwrap();
            assert_eq!(plan.split_count(), 1);
            assert_eq!(plan.len(), n + 1);
        }
    }

    #[test]
    fn output_is_deterministic() {
        let build = || {
            let nodes: Vec<_> = (0..6).map(|_| Entity::new("n")).collect();
            let mut graph = CommandGraph::new();
            for i in 0..6 {
                insert_bound(&mut graph, &nodes[i], &[(&nodes[(i * 5 + 1) % 6], true)]);
            }
            ids(&Sequencer::default().sequence(graph).unwrap())
        };
        assert_eq!(build(), build());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        // Each node may reference any higher-numbered node, so the graph is
        // acyclic whatever the enqueue order.
        fn acyclic_refs() -> impl Strategy<Value = Vec<Vec<(usize, bool)>>> {
            (1usize..10).prop_flat_map(|n| {
                (0..n)
                    .map(|i| {
                        let later = n - i - 1;
                        prop::collection::vec((0..later.max(1), any::<bool>()), 0..=later.min(3))
                            .prop_map(move |refs| {
                                refs.into_iter()
                                    .map(|(offset, nullable)| (i + 1 + offset, nullable))
                                    .collect::<Vec<_>>()
                            })
                    })
                    .collect::<Vec<_>>()
            })
        }

        proptest! {
            #[test]
            fn acyclic_graphs_order_producers_first(refs in acyclic_refs()) {
                let nodes: Vec<_> = (0..refs.len()).map(|_| Entity::new("n")).collect();
                let mut graph = CommandGraph::new();
                for (i, targets) in refs.iter().enumerate() {
                    let sources: Vec<_> = targets.iter().map(|(t, nullable)| (&nodes[*t], *nullable)).collect();
                    insert_bound(&mut graph, &nodes[i], &sources);
                }

                let plan = Sequencer::default().sequence(graph).unwrap();
                prop_assert_eq!(plan.split_count(), 0);
                prop_assert_eq!(plan.len(), refs.len());
                for id in plan.order() {
                    let at = plan.position(*id).unwrap();
                    for dep in plan.graph().dependencies(*id) {
                        prop_assert!(plan.position(dep).unwrap() < at);
                    }
                }
            }
        }
    }
}
