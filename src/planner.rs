//! Wave planning.
//!
//! [`Planner::plan`] partitions a built [`DependencyGraph`] into waves with
//! Kahn's algorithm: each round takes every node whose dependencies have all
//! been placed, sorts it by id and emits it as the next wave. Nodes in one
//! wave are mutually independent and may be applied concurrently.
//!
//! When no node is ready but some remain, the graph has a cycle. The error
//! names one shortest cycle among the remaining nodes, rotated to start at
//! its smallest id and listed in dependency order.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;

/// A set of mutually independent resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    /// Position in the plan, starting at zero
    pub index: usize,
    /// Resource ids, ascending
    pub nodes: Vec<String>,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Ordered waves covering every resource exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub waves: Vec<Wave>,
}

impl ExecutionPlan {
    /// Number of waves
    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Total number of resources across all waves
    pub fn node_count(&self) -> usize {
        self.waves.iter().map(Wave::len).sum()
    }

    /// Index of the wave containing `id`
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.waves
            .iter()
            .find(|w| w.nodes.iter().any(|n| n == id))
            .map(|w| w.index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Wave> {
        self.waves.iter()
    }

    /// Human-readable listing of the plan
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        output.push_str("Execution Plan:\n");
        output.push_str(&format!("  Waves: {}\n", self.len()));
        output.push_str(&format!("  Resources: {}\n", self.node_count()));

        for wave in &self.waves {
            output.push_str(&format!("\nWave {}:\n", wave.index));
            for node in &wave.nodes {
                output.push_str(&format!("  - {}\n", node));
            }
        }

        output
    }
}

impl<'a> IntoIterator for &'a ExecutionPlan {
    type Item = &'a Wave;
    type IntoIter = std::slice::Iter<'a, Wave>;

    fn into_iter(self) -> Self::IntoIter {
        self.waves.iter()
    }
}

/// Computes execution plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    /// Partition the graph into waves.
    pub fn plan(graph: &DependencyGraph) -> Result<ExecutionPlan> {
        if !graph.is_frozen() {
            return Err(Error::GraphNotBuilt);
        }

        // BTreeMap keeps every scan in ascending id order
        let mut in_degree: BTreeMap<&str, usize> = graph
            .ids()
            .map(|id| (id, graph.dependencies(id).len()))
            .collect();

        let mut waves = Vec::new();
        loop {
            let ready: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(id, _)| *id)
                .collect();

            if ready.is_empty() {
                break;
            }

            for id in &ready {
                in_degree.remove(id);
                for dependent in graph.dependents(id) {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }

            debug!(wave = waves.len(), nodes = ready.len(), "Planned wave");
            waves.push(Wave {
                index: waves.len(),
                nodes: ready.into_iter().map(String::from).collect(),
            });
        }

        if !in_degree.is_empty() {
            let remaining: BTreeSet<&str> = in_degree.keys().copied().collect();
            let participants = shortest_cycle(graph, &remaining);
            return Err(Error::CycleDetected { participants });
        }

        Ok(ExecutionPlan { waves })
    }
}

/// Shortest cycle among `remaining`, starting at its smallest id.
///
/// Every remaining node lies on or downstream of a cycle, so a search from
/// each one in ascending order finds one.
fn shortest_cycle(graph: &DependencyGraph, remaining: &BTreeSet<&str>) -> Vec<String> {
    let mut best: Option<Vec<String>> = None;

    for &start in remaining {
        let Some(cycle) = cycle_through(graph, remaining, start) else {
            continue;
        };
        if best.as_ref().map_or(true, |b| cycle.len() < b.len()) {
            best = Some(cycle);
        }
    }

    let mut cycle = best.unwrap_or_else(|| remaining.iter().map(|s| s.to_string()).collect());
    if let Some(pos) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(pos);
    }
    cycle
}

/// Breadth-first search for the shortest path from `start` back to itself.
fn cycle_through(
    graph: &DependencyGraph,
    remaining: &BTreeSet<&str>,
    start: &str,
) -> Option<Vec<String>> {
    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        for next in graph.dependents(current) {
            if !remaining.contains(next) {
                continue;
            }
            if next == start {
                let mut path = vec![current.to_string()];
                let mut node = current;
                while node != start {
                    node = parent.get(node).copied()?;
                    path.push(node.to_string());
                }
                path.reverse();
                return Some(path);
            }
            if !parent.contains_key(next) {
                parent.insert(next, current);
                queue.push_back(next);
            }
        }
    }

    None
}
