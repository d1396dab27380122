// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::VecDeque;

use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;

use crate::error::BuildError;
use crate::registry::ActionRegistry;

type PGraph = StableDiGraph<String, (), u32>;

///
/// The run-specific dependency sub-graph: one node per reachable action, one edge from each
/// action to each of its dependencies.
///
/// Nodes leave the graph as their jobs finish successfully or are skipped clean; failed jobs stay
/// so that the remaining graph shows what could not be built. A stable graph keeps indices valid
/// across removals.
///
pub struct ActionGraph {
    nodes: HashMap<String, NodeIndex<u32>>,
    pg: PGraph,
}

impl ActionGraph {
    pub fn new() -> ActionGraph {
        ActionGraph {
            nodes: HashMap::default(),
            pg: PGraph::default(),
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.pg.clear();
    }

    pub fn len(&self) -> usize {
        self.pg.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.pg.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    fn ensure_node(&mut self, name: &str) -> NodeIndex<u32> {
        if let Some(&id) = self.nodes.get(name) {
            return id;
        }
        let id = self.pg.add_node(name.to_string());
        self.nodes.insert(name.to_string(), id);
        id
    }

    ///
    /// Populate the graph with everything reachable from the entrypoint, breadth-first over
    /// `dependencies`. Fails on a dependency name that is not registered, and on any dependency
    /// cycle in the reachable sub-graph.
    ///
    pub fn build_from(
        &mut self,
        actions: &ActionRegistry,
        entrypoint: &str,
    ) -> Result<(), BuildError> {
        self.clear();
        let entry = actions
            .get(entrypoint)
            .ok_or_else(|| BuildError::ActionNotFound(entrypoint.to_string()))?;

        let mut visited: HashSet<String> = HashSet::default();
        visited.insert(entry.name.clone());
        let mut queue = VecDeque::from([entry.clone()]);
        while let Some(action) = queue.pop_front() {
            let from = self.ensure_node(&action.name);
            for dependency in &action.dependencies {
                let dependency_action = actions
                    .get(dependency)
                    .ok_or_else(|| BuildError::ActionNotFound(dependency.clone()))?;
                let to = self.ensure_node(dependency);
                self.pg.update_edge(from, to, ());
                if visited.insert(dependency.clone()) {
                    queue.push_back(dependency_action.clone());
                }
            }
        }

        // Reject cycles up front: the ready set would otherwise never drain. Kosaraju rather
        // than Tarjan, which panics for some graphs.
        for scc in petgraph::algo::kosaraju_scc(&self.pg) {
            if scc.len() > 1 || (scc.len() == 1 && self.pg.contains_edge(scc[0], scc[0])) {
                let mut names: Vec<String> = scc.iter().map(|&id| self.pg[id].clone()).collect();
                names.sort();
                return Err(BuildError::Cycle(names.join(" -> ")));
            }
        }
        Ok(())
    }

    /// Drop a node, used when its job finishes successfully or is skipped clean.
    pub fn remove(&mut self, name: &str) {
        if let Some(id) = self.nodes.remove(name) {
            self.pg.remove_node(id);
        }
    }

    ///
    /// The names whose dependencies have all left the graph, excluding names the given predicate
    /// claims are already in flight or finished (failed jobs keep their node but must not be
    /// handed out again). The result is unordered.
    ///
    pub fn ready<F: Fn(&str) -> bool>(&self, exclude: F) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(name, _)| !exclude(name))
            .filter(|(_, &id)| {
                self.pg
                    .neighbors_directed(id, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The remaining node names.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}
