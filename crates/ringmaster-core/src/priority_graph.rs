//! Priority graph computation (C9, graph half): PageRank, betweenness
//! centrality, critical-path detection, and the combined-priority mix.
//!
//! Runs over the active-task subgraph (every non-DONE bead and the
//! dependency edges between them). Built on `petgraph` since neither this
//! workspace nor the rest of the retrieval pack carries a graph-algorithms
//! crate (see DESIGN.md).

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::store::{Store, StoreResult};
use crate::types::{Bead, BeadStatus};

const PAGERANK_DAMPING: f64 = 0.85;
const PAGERANK_EPSILON: f64 = 1e-6;
const PAGERANK_MAX_ITERATIONS: usize = 100;

// Weights for the combined-priority mix. Chosen so P0 dominates routine
// topology effects while still letting pagerank/betweenness/critical-path
// break ties among same-priority beads.
const WEIGHT_P_LEVEL: f64 = 10.0;
const WEIGHT_PAGERANK: f64 = 2.0;
const WEIGHT_BETWEENNESS: f64 = 1.0;
const CRITICAL_PATH_BONUS: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct PriorityScores {
    pub pagerank: f64,
    pub betweenness: f64,
    pub on_critical_path: bool,
    pub combined_priority: f64,
}

/// Edges are `(child_id, parent_id)` pairs — child depends on parent.
pub fn compute_priority_scores(
    beads: &[Bead],
    dependencies: &[(String, String)],
) -> HashMap<String, PriorityScores> {
    let active: Vec<&Bead> = beads.iter().filter(|b| b.status != BeadStatus::Done).collect();
    if active.is_empty() {
        return HashMap::new();
    }

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index_of: HashMap<String, NodeIndex> = HashMap::new();
    for bead in &active {
        let idx = graph.add_node(bead.id.clone());
        index_of.insert(bead.id.clone(), idx);
    }
    for (child, parent) in dependencies {
        if let (Some(&c), Some(&p)) = (index_of.get(child), index_of.get(parent)) {
            // Edge direction child -> parent for longest-path DP (parent
            // must run before child); pagerank/betweenness use the same
            // directed graph, which is the conventional "citation" graph
            // orientation for dependency DAGs.
            graph.add_edge(c, p, ());
        }
    }

    let pagerank = pagerank(&graph);
    let betweenness = betweenness_centrality(&graph);
    let critical_path = longest_path_nodes(&graph);

    let mut scores = HashMap::new();
    for bead in &active {
        let idx = index_of[&bead.id];
        let pr = *pagerank.get(&idx).unwrap_or(&0.0);
        let bw = *betweenness.get(&idx).unwrap_or(&0.0);
        let on_cp = critical_path.contains(&idx);
        let p_level = bead.priority.weight();
        let combined = p_level * WEIGHT_P_LEVEL
            + pr * WEIGHT_PAGERANK
            + bw * WEIGHT_BETWEENNESS
            + if on_cp { CRITICAL_PATH_BONUS } else { 0.0 };
        scores.insert(
            bead.id.clone(),
            PriorityScores {
                pagerank: pr,
                betweenness: bw,
                on_critical_path: on_cp,
                combined_priority: combined,
            },
        );
    }
    scores
}

/// Recomputes priority scores over the active-bead subgraph and persists
/// them onto each task/subtask's score fields. SPEC_FULL.md §4.9: "recompute
/// on demand (API trigger) and on material graph changes" — callers invoke
/// this from the dependency-mutation handlers and from an explicit API
/// trigger; the scheduler reads the persisted `combined_priority` via
/// `get_ready_tasks`'s ordering rather than recomputing every poll.
pub async fn recompute_and_persist<S: Store>(
    store: &S,
    project_id: Option<uuid::Uuid>,
) -> StoreResult<usize> {
    let beads = store.list_beads(project_id).await?;
    let dependencies: Vec<(String, String)> = store
        .all_dependencies()
        .await?
        .into_iter()
        .map(|d| (d.child_id, d.parent_id))
        .collect();
    let scores = compute_priority_scores(&beads, &dependencies);

    let mut updated = 0;
    for mut bead in beads {
        let Some(score) = scores.get(&bead.id) else {
            continue;
        };
        let Some(fields) = bead.task.as_mut() else {
            continue;
        };
        fields.pagerank = score.pagerank;
        fields.betweenness = score.betweenness;
        fields.on_critical_path = score.on_critical_path;
        fields.combined_priority = score.combined_priority;
        store.update_bead(bead).await?;
        updated += 1;
    }
    Ok(updated)
}

/// Standard PageRank (α=0.85), iterating to ε=1e-6 or a 100-iteration cap.
fn pagerank(graph: &DiGraph<String, ()>) -> HashMap<NodeIndex, f64> {
    let n = graph.node_count();
    if n == 0 {
        return HashMap::new();
    }
    let mut scores: HashMap<NodeIndex, f64> =
        graph.node_indices().map(|i| (i, 1.0 / n as f64)).collect();

    for _ in 0..PAGERANK_MAX_ITERATIONS {
        let mut next = HashMap::new();
        let mut max_delta: f64 = 0.0;
        for node in graph.node_indices() {
            let mut incoming_sum = 0.0;
            for edge in graph.edges_directed(node, Direction::Incoming) {
                let source = edge.source();
                let out_degree = graph.edges_directed(source, Direction::Outgoing).count().max(1);
                incoming_sum += scores[&source] / out_degree as f64;
            }
            let value = (1.0 - PAGERANK_DAMPING) / n as f64 + PAGERANK_DAMPING * incoming_sum;
            max_delta = max_delta.max((value - scores[&node]).abs());
            next.insert(node, value);
        }
        scores = next;
        if max_delta < PAGERANK_EPSILON {
            break;
        }
    }
    scores
}

/// Brandes' algorithm for betweenness centrality on an unweighted directed
/// graph.
fn betweenness_centrality(graph: &DiGraph<String, ()>) -> HashMap<NodeIndex, f64> {
    let mut centrality: HashMap<NodeIndex, f64> =
        graph.node_indices().map(|i| (i, 0.0)).collect();

    for s in graph.node_indices() {
        let mut stack = Vec::new();
        let mut predecessors: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut sigma: HashMap<NodeIndex, f64> =
            graph.node_indices().map(|i| (i, 0.0)).collect();
        let mut dist: HashMap<NodeIndex, i64> =
            graph.node_indices().map(|i| (i, -1)).collect();
        sigma.insert(s, 1.0);
        dist.insert(s, 0);

        let mut queue = std::collections::VecDeque::new();
        queue.push_back(s);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for edge in graph.edges_directed(v, Direction::Outgoing) {
                let w = edge.target();
                if dist[&w] < 0 {
                    dist.insert(w, dist[&v] + 1);
                    queue.push_back(w);
                }
                if dist[&w] == dist[&v] + 1 {
                    let contribution = sigma[&v];
                    *sigma.get_mut(&w).unwrap() += contribution;
                    predecessors.entry(w).or_default().push(v);
                }
            }
        }

        let mut delta: HashMap<NodeIndex, f64> =
            graph.node_indices().map(|i| (i, 0.0)).collect();
        while let Some(w) = stack.pop() {
            if let Some(preds) = predecessors.get(&w) {
                for &v in preds {
                    let ratio = sigma[&v] / sigma[&w];
                    *delta.get_mut(&v).unwrap() += ratio * (1.0 + delta[&w]);
                }
            }
            if w != s {
                *centrality.get_mut(&w).unwrap() += delta[&w];
            }
        }
    }
    centrality
}

/// Nodes lying on a longest path through the DAG (topological order,
/// longest-path dynamic program).
fn longest_path_nodes(graph: &DiGraph<String, ()>) -> std::collections::HashSet<NodeIndex> {
    let order = match petgraph::algo::toposort(graph, None) {
        Ok(order) => order,
        Err(_) => return std::collections::HashSet::new(), // shouldn't happen: deps are acyclic
    };

    let mut longest: HashMap<NodeIndex, i64> =
        graph.node_indices().map(|i| (i, 0)).collect();
    // Process in reverse topological order so a node's longest-path value
    // accounts for all of its dependents (edges point child -> parent, so
    // a node's "downstream" in path-length terms are nodes with edges into
    // it).
    for &node in order.iter().rev() {
        let mut best = 0;
        for edge in graph.edges_directed(node, Direction::Incoming) {
            let child = edge.source();
            best = best.max(longest[&child] + 1);
        }
        longest.insert(node, best);
    }

    let max_len = longest.values().copied().max().unwrap_or(0);
    if max_len == 0 {
        return std::collections::HashSet::new();
    }

    // Walk back from every node achieving the max length along its longest
    // incoming chain to mark the full critical path.
    let mut on_path = std::collections::HashSet::new();
    for (&node, &len) in &longest {
        if len == max_len {
            let mut current = node;
            on_path.insert(current);
            loop {
                let target_len = longest[&current] - 1;
                let next = graph
                    .edges_directed(current, Direction::Incoming)
                    .map(|e| e.source())
                    .find(|&child| longest[&child] == target_len);
                match next {
                    Some(child) => {
                        on_path.insert(child);
                        current = child;
                    }
                    None => break,
                }
            }
        }
    }
    on_path
}
