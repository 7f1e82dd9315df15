//! Circular dependency detection between types.
//!
//! The type-level graph of each namespace is loaded into a petgraph `DiGraph`;
//! every strongly connected component with two or more types contains at
//! least one cycle, and one shortest cycle through its lowest-id member is
//! reported.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use super::GraphQueries;
use crate::error::Result;
use crate::types::{Cycle, EntityId};

/// Find one elementary cycle per strongly connected component, per namespace.
///
/// Each namespace's graph is built separately, so a cycle never spans two
/// workspaces.
pub fn find_cycles(graph: &dyn GraphQueries, namespaces: &[String]) -> Result<Vec<Cycle>> {
    let mut cycles = Vec::new();

    for namespace in namespaces {
        let edges = graph.type_edges(namespace)?;
        let digraph = build_graph(&edges);

        let mut found = 0usize;
        for component in tarjan_scc(&digraph) {
            if component.len() < 2 {
                continue;
            }
            let Some(path) = elementary_cycle(&digraph, &component) else {
                continue;
            };
            let ids: Vec<EntityId> = path.iter().map(|n| digraph[*n]).collect();
            let entities = graph.entities(&ids)?;

            if entities.len() != ids.len() || entities.iter().any(|e| &e.namespace != namespace) {
                tracing::warn!(
                    namespace = %namespace,
                    "Skipping cycle whose members changed or left the namespace"
                );
                continue;
            }
            found += 1;
            cycles.push(Cycle {
                namespace: namespace.clone(),
                entities,
            });
        }
        tracing::debug!(
            namespace = %namespace,
            edges = edges.len(),
            cycles = found,
            "Cycle detection"
        );
    }

    cycles.sort_by(|a, b| {
        a.namespace
            .cmp(&b.namespace)
            .then_with(|| first_name(a).cmp(first_name(b)))
    });
    Ok(cycles)
}

fn first_name(cycle: &Cycle) -> &str {
    cycle.entities.first().map_or("", |e| e.name.as_str())
}

/// Build a directed graph from id pairs.
fn build_graph(edges: &[(EntityId, EntityId)]) -> DiGraph<EntityId, ()> {
    let mut graph = DiGraph::new();
    let mut nodes: HashMap<EntityId, NodeIndex> = HashMap::new();
    for (from, to) in edges {
        let a = *nodes.entry(*from).or_insert_with(|| graph.add_node(*from));
        let b = *nodes.entry(*to).or_insert_with(|| graph.add_node(*to));
        graph.update_edge(a, b, ());
    }
    graph
}

/// Shortest cycle through the lowest-id node of a strongly connected component.
///
/// Breadth-first search restricted to the component; the returned path starts
/// at that node and does not repeat it at the end.
fn elementary_cycle(
    graph: &DiGraph<EntityId, ()>,
    component: &[NodeIndex],
) -> Option<Vec<NodeIndex>> {
    let members: HashSet<NodeIndex> = component.iter().copied().collect();
    let start = *component.iter().min_by_key(|n| graph[**n])?;

    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        let mut next: Vec<NodeIndex> = graph
            .neighbors(node)
            .filter(|n| members.contains(n))
            .collect();
        next.sort_by_key(|n| graph[*n]);
        for neighbor in next {
            if neighbor == start {
                let mut path = vec![node];
                let mut current = node;
                while current != start {
                    current = *parent.get(&current)?;
                    path.push(current);
                }
                path.reverse();
                return Some(path);
            }
            if !parent.contains_key(&neighbor) {
                parent.insert(neighbor, node);
                queue.push_back(neighbor);
            }
        }
    }
    None
}
