//! Dependency graph over indexed chunks.
//!
//! Nodes are chunks (id, symbol name, symbol type, file path); edges are
//! typed, weighted relations such as `calls`. Parallel edges are allowed.
//!
//! ```text
//! ScoringChunk[]
//!     │
//!     ├──> name resolution (unique symbol names only)
//!     │
//!     └──> DependencyGraph (petgraph DiGraph)
//!            ├─ find_cycles                (DFS, recursion stack)
//!            ├─ strongly_connected_components (Tarjan, iterative)
//!            ├─ topological_order          (Kahn)
//!            └─ centrality                 (total degree / max degree)
//! ```
//!
//! All traversals use explicit stacks and visited sets, so very large
//! chunk graphs cannot overflow the call stack.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{IndexError, Result};
use crate::models::{DependencyEdge, ScoringChunk};

/// Relation type for call edges.
pub const CALLS: &str = "calls";

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub symbol_name: Option<String>,
    pub symbol_type: Option<String>,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub relation: String,
    pub weight: f64,
}

/// Directed multigraph of chunk relations.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the call graph for a chunk set.
    ///
    /// A call resolves when exactly one chunk in the set defines that
    /// symbol name, or, failing that, exactly one chunk in the caller's own
    /// file does. Ambiguous names and names defined outside the set stay
    /// unresolved.
    pub fn from_chunks(chunks: &[ScoringChunk]) -> Self {
        let mut graph = Self::new();
        let mut by_name: HashMap<&str, Vec<&ScoringChunk>> = HashMap::new();

        for chunk in chunks {
            graph.add_node(GraphNode {
                id: chunk.id.clone(),
                symbol_name: chunk.symbol_name.clone(),
                symbol_type: chunk.symbol_type.clone(),
                file_path: chunk.path.clone(),
            });
            if let Some(name) = chunk.symbol_name.as_deref() {
                by_name.entry(name).or_default().push(chunk);
            }
        }

        let mut unresolved = 0usize;
        for chunk in chunks {
            let mut seen = HashSet::new();
            for call in &chunk.calls {
                if !seen.insert(call.as_str()) {
                    continue;
                }
                let target = by_name
                    .get(call.as_str())
                    .and_then(|candidates| resolve_call(candidates, &chunk.path));
                match target {
                    Some(target) => {
                        let from = graph.index[&chunk.id];
                        let to = graph.index[&target.id];
                        graph.graph.add_edge(
                            from,
                            to,
                            GraphEdge {
                                relation: CALLS.to_string(),
                                weight: 1.0,
                            },
                        );
                    }
                    None => unresolved += 1,
                }
            }
        }

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            unresolved,
            "built dependency graph"
        );
        graph
    }

    /// Add a node, returning the existing index if the id is already present.
    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        if let Some(&idx) = self.index.get(&node.id) {
            return idx;
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        idx
    }

    pub fn add_edge(&mut self, from: &str, to: &str, relation: &str, weight: f64) -> Result<()> {
        let from_idx = self.lookup(from)?;
        let to_idx = self.lookup(to)?;
        self.graph.add_edge(
            from_idx,
            to_idx,
            GraphEdge {
                relation: relation.to_string(),
                weight,
            },
        );
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| IndexError::NodeNotFound(id.to_string()))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.index
            .get(id)
            .map(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count())
            .unwrap_or(0)
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.index
            .get(id)
            .map(|&idx| self.graph.edges_directed(idx, Direction::Outgoing).count())
            .unwrap_or(0)
    }

    /// All edges as persistable records.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.graph
            .edge_references()
            .map(|e| DependencyEdge {
                from_chunk: self.graph[e.source()].id.clone(),
                to_chunk: self.graph[e.target()].id.clone(),
                relation: e.weight().relation.clone(),
                weight: e.weight().weight,
            })
            .collect()
    }

    /// Successors in edge insertion order.
    fn successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self.graph.edges(node).map(|e| (e.id(), e.target())).collect();
        edges.sort_by_key(|(id, _)| *id);
        edges.into_iter().map(|(_, target)| target).collect()
    }

    /// Depth-first cycle search with a recursion stack.
    ///
    /// Reports the first cycle found from each unvisited start node; this
    /// is not an exhaustive enumeration. Each cycle is listed in traversal
    /// order, starting from the node the back edge points to.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let n = self.graph.node_count();
        let mut visited = vec![false; n];
        let mut on_stack = vec![false; n];
        let mut cycles = Vec::new();

        for start in self.graph.node_indices() {
            if visited[start.index()] {
                continue;
            }

            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
            visited[start.index()] = true;
            on_stack[start.index()] = true;
            stack.push((start, self.successors(start), 0));

            while let Some(top) = stack.last_mut() {
                if top.2 >= top.1.len() {
                    on_stack[top.0.index()] = false;
                    stack.pop();
                    continue;
                }
                let next = top.1[top.2];
                top.2 += 1;

                if on_stack[next.index()] {
                    if let Some(begin) = stack.iter().position(|(node, _, _)| *node == next) {
                        cycles.push(
                            stack[begin..]
                                .iter()
                                .map(|(node, _, _)| self.graph[*node].id.clone())
                                .collect(),
                        );
                    }
                    break;
                }
                if !visited[next.index()] {
                    visited[next.index()] = true;
                    on_stack[next.index()] = true;
                    stack.push((next, self.successors(next), 0));
                }
            }

            for (node, _, _) in stack.drain(..) {
                on_stack[node.index()] = false;
            }
        }

        cycles
    }

    /// Non-trivial strongly-connected components (Tarjan).
    ///
    /// Singleton components are reported only when the node has a
    /// self-loop. Member ids are sorted within each component.
    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        const UNVISITED: usize = usize::MAX;

        let n = self.graph.node_count();
        let mut index = vec![UNVISITED; n];
        let mut lowlink = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut scc_stack: Vec<NodeIndex> = Vec::new();
        let mut next_index = 0usize;
        let mut components = Vec::new();

        for start in self.graph.node_indices() {
            if index[start.index()] != UNVISITED {
                continue;
            }

            // (node, successors, next successor position)
            let mut work: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
            index[start.index()] = next_index;
            lowlink[start.index()] = next_index;
            next_index += 1;
            scc_stack.push(start);
            on_stack[start.index()] = true;
            work.push((start, self.successors(start), 0));

            while let Some(top) = work.last_mut() {
                let node = top.0;
                if top.2 < top.1.len() {
                    let next = top.1[top.2];
                    top.2 += 1;
                    if index[next.index()] == UNVISITED {
                        index[next.index()] = next_index;
                        lowlink[next.index()] = next_index;
                        next_index += 1;
                        scc_stack.push(next);
                        on_stack[next.index()] = true;
                        work.push((next, self.successors(next), 0));
                    } else if on_stack[next.index()] {
                        lowlink[node.index()] = lowlink[node.index()].min(index[next.index()]);
                    }
                    continue;
                }

                // All successors done: close the node.
                work.pop();
                if let Some(parent) = work.last() {
                    let p = parent.0.index();
                    lowlink[p] = lowlink[p].min(lowlink[node.index()]);
                }
                if lowlink[node.index()] != index[node.index()] {
                    continue;
                }

                let mut component = Vec::new();
                while let Some(member) = scc_stack.pop() {
                    on_stack[member.index()] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                let reported = component.len() > 1 || self.graph.find_edge(node, node).is_some();
                if reported {
                    let mut ids: Vec<String> = component
                        .into_iter()
                        .map(|m| self.graph[m].id.clone())
                        .collect();
                    ids.sort();
                    components.push(ids);
                }
            }
        }

        components
    }

    /// Topological order by Kahn's algorithm.
    ///
    /// This is the authoritative acyclicity check: if fewer nodes are
    /// ordered than exist, the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let total = self.graph.node_count();
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.edges_directed(n, Direction::Incoming).count())
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(total);

        while let Some(node) = queue.pop_front() {
            order.push(self.graph[node].id.clone());
            for next in self.successors(node) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() < total {
            return Err(IndexError::Cycle {
                ordered: order.len(),
                total,
            });
        }
        Ok(order)
    }

    /// Degree centrality: (in + out) / max total degree in the graph.
    ///
    /// Isolated nodes and single-node graphs score 0.
    pub fn centrality(&self) -> HashMap<String, f64> {
        let degrees: Vec<(NodeIndex, usize)> = self
            .graph
            .node_indices()
            .map(|n| {
                let total = self.graph.edges_directed(n, Direction::Incoming).count()
                    + self.graph.edges_directed(n, Direction::Outgoing).count();
                (n, total)
            })
            .collect();
        let max = degrees.iter().map(|(_, d)| *d).max().unwrap_or(0);

        degrees
            .into_iter()
            .map(|(n, d)| {
                let score = if max == 0 || self.graph.node_count() <= 1 {
                    0.0
                } else {
                    d as f64 / max as f64
                };
                (self.graph[n].id.clone(), score)
            })
            .collect()
    }
}

fn resolve_call<'a>(candidates: &[&'a ScoringChunk], caller_path: &str) -> Option<&'a ScoringChunk> {
    if let [only] = candidates {
        return Some(*only);
    }
    let mut local = candidates.iter().filter(|c| c.path == caller_path);
    match (local.next(), local.next()) {
        (Some(only), None) => Some(*only),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            symbol_name: Some(id.to_lowercase()),
            symbol_type: Some("function".to_string()),
            file_path: "src/lib.rs".to_string(),
        }
    }

    fn graph_of(ids: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for id in ids {
            g.add_node(node(id));
        }
        for (from, to) in edges {
            g.add_edge(from, to, CALLS, 1.0).unwrap();
        }
        g
    }

    fn chunk(id: &str, path: &str, name: &str, calls: &[&str]) -> ScoringChunk {
        ScoringChunk {
            id: id.to_string(),
            path: path.to_string(),
            symbol_name: Some(name.to_string()),
            symbol_type: Some("function".to_string()),
            calls: calls.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_topological_order_places_caller_first() {
        let g = graph_of(&["X", "Y", "Z"], &[("X", "Y"), ("X", "Z")]);
        let order = g.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(pos("X") < pos("Y"));
        assert!(pos("X") < pos("Z"));
    }

    #[test]
    fn test_back_edge_is_a_cycle() {
        let g = graph_of(&["X", "Y", "Z"], &[("X", "Y"), ("X", "Z"), ("Y", "X")]);

        let err = g.topological_order().unwrap_err();
        assert!(matches!(err, IndexError::Cycle { ordered: 0, total: 3 }));

        let cycles = g.find_cycles();
        assert_eq!(cycles.len(), 1);
        let members: HashSet<&str> = cycles[0].iter().map(String::as_str).collect();
        assert!(members.contains("X"));
        assert!(members.contains("Y"));
        assert!(!members.contains("Z"));
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles_or_sccs() {
        let g = graph_of(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("A", "C")]);
        assert!(g.find_cycles().is_empty());
        assert!(g.strongly_connected_components().is_empty());
    }

    #[test]
    fn test_scc_reports_cycles_and_self_loops_only() {
        let g = graph_of(
            &["A", "B", "C", "D", "E"],
            &[("A", "B"), ("B", "C"), ("C", "A"), ("C", "D"), ("E", "E")],
        );
        let mut sccs = g.strongly_connected_components();
        sccs.sort();
        assert_eq!(
            sccs,
            vec![
                vec!["A".to_string(), "B".to_string(), "C".to_string()],
                vec!["E".to_string()],
            ]
        );
    }

    #[test]
    fn test_self_loop_breaks_topological_order() {
        let g = graph_of(&["A"], &[("A", "A")]);
        assert!(g.topological_order().is_err());
        assert_eq!(g.find_cycles(), vec![vec!["A".to_string()]]);
    }

    #[test]
    fn test_centrality_normalized_by_max_degree() {
        let g = graph_of(&["hub", "a", "b", "lonely"], &[("hub", "a"), ("hub", "b")]);
        let c = g.centrality();
        assert_eq!(c["hub"], 1.0);
        assert_eq!(c["a"], 0.5);
        assert_eq!(c["b"], 0.5);
        assert_eq!(c["lonely"], 0.0);
    }

    #[test]
    fn test_centrality_single_node_is_zero() {
        let g = graph_of(&["only"], &[]);
        assert_eq!(g.centrality()["only"], 0.0);
        assert_eq!(DependencyGraph::new().centrality().len(), 0);
    }

    #[test]
    fn test_from_chunks_resolves_unique_names() {
        let chunks = vec![
            chunk("c1", "src/main.rs", "main", &["parse", "render", "println"]),
            chunk("c2", "src/parse.rs", "parse", &[]),
            chunk("c3", "src/render.rs", "render", &["parse", "parse"]),
        ];
        let g = DependencyGraph::from_chunks(&chunks);

        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.in_degree("c2"), 2);
        assert_eq!(g.out_degree("c1"), 2);
        assert!(g.edges().iter().all(|e| e.relation == CALLS));
    }

    #[test]
    fn test_from_chunks_skips_ambiguous_names() {
        let chunks = vec![
            chunk("c1", "a.py", "run", &["helper"]),
            chunk("c2", "b.py", "helper", &[]),
            chunk("c3", "c.py", "helper", &[]),
        ];
        let g = DependencyGraph::from_chunks(&chunks);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_from_chunks_prefers_same_file_definition() {
        let chunks = vec![
            chunk("c1", "a.py", "run", &["helper"]),
            chunk("c2", "a.py", "helper", &[]),
            chunk("c3", "c.py", "helper", &[]),
        ];
        let g = DependencyGraph::from_chunks(&chunks);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.in_degree("c2"), 1);
        assert_eq!(g.in_degree("c3"), 0);
    }

    #[test]
    fn test_add_edge_unknown_node() {
        let mut g = graph_of(&["A"], &[]);
        let err = g.add_edge("A", "missing", CALLS, 1.0).unwrap_err();
        assert!(matches!(err, IndexError::NodeNotFound(id) if id == "missing"));
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let mut g = DependencyGraph::new();
        let ids: Vec<String> = (0..50_000).map(|i| format!("n{i}")).collect();
        for id in &ids {
            g.add_node(node(id));
        }
        for pair in ids.windows(2) {
            g.add_edge(&pair[0], &pair[1], CALLS, 1.0).unwrap();
        }
        assert!(g.find_cycles().is_empty());
        assert!(g.strongly_connected_components().is_empty());
        assert_eq!(g.topological_order().unwrap().len(), ids.len());

        // Closing the chain makes it one component spanning every node.
        g.add_edge(&ids[ids.len() - 1], &ids[0], CALLS, 1.0).unwrap();
        let components = g.strongly_connected_components();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), ids.len());
        assert_eq!(g.find_cycles().len(), 1);
        assert!(g.topological_order().is_err());
    }
}
