//! Whole-graph cycle validation for the task DAG.
//!
//! Validation always runs against a candidate graph that already includes
//! the proposed edges, before anything is committed. On rejection the
//! exact cycle path is returned so the caller can decide which edge to
//! drop.

use crate::error::{Error, Result};
use crate::queue::task::{Task, TaskId};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Validate the dependency graph as if `task_id` had exactly the
/// `proposed` dependency list.
///
/// `task_id` may be a task not yet present in `tasks` (creation) or an
/// existing task whose edges are being edited. Edges pointing at unknown
/// ids are skipped here; existence is checked separately before this runs.
///
/// # Errors
/// Returns `Error::CycleDetected` carrying the offending path when the
/// candidate graph contains a cycle.
pub fn validate_with_edges(
    tasks: &HashMap<TaskId, Task>,
    task_id: TaskId,
    proposed: &[TaskId],
) -> Result<()> {
    let mut graph: DiGraph<TaskId, ()> = DiGraph::new();
    let mut index: HashMap<TaskId, NodeIndex> = HashMap::new();

    for id in tasks.keys() {
        index.insert(*id, graph.add_node(*id));
    }
    index
        .entry(task_id)
        .or_insert_with(|| graph.add_node(task_id));

    for (id, task) in tasks {
        let deps: &[TaskId] = if *id == task_id {
            proposed
        } else {
            &task.dependencies
        };
        add_edges(&mut graph, &index, *id, deps);
    }
    if !tasks.contains_key(&task_id) {
        add_edges(&mut graph, &index, task_id, proposed);
    }

    if !is_cyclic_directed(&graph) {
        return Ok(());
    }

    let path = find_cycle(&graph).unwrap_or_default();
    Err(Error::CycleDetected { path })
}

fn add_edges(
    graph: &mut DiGraph<TaskId, ()>,
    index: &HashMap<TaskId, NodeIndex>,
    from: TaskId,
    deps: &[TaskId],
) {
    let from_idx = index[&from];
    for dep in deps {
        if let Some(&dep_idx) = index.get(dep) {
            graph.add_edge(from_idx, dep_idx, ());
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Depth-first search with an explicit recursion stack; revisiting a node
/// currently on the stack yields the path from that node back to itself.
fn find_cycle(graph: &DiGraph<TaskId, ()>) -> Option<Vec<TaskId>> {
    let mut colors = vec![Color::White; graph.node_count()];
    let mut stack: Vec<NodeIndex> = Vec::new();

    for start in graph.node_indices() {
        if colors[start.index()] == Color::White {
            if let Some(path) = dfs(graph, start, &mut colors, &mut stack) {
                return Some(path);
            }
        }
    }
    None
}

fn dfs(
    graph: &DiGraph<TaskId, ()>,
    node: NodeIndex,
    colors: &mut [Color],
    stack: &mut Vec<NodeIndex>,
) -> Option<Vec<TaskId>> {
    colors[node.index()] = Color::Gray;
    stack.push(node);

    for next in graph.neighbors(node) {
        match colors[next.index()] {
            Color::Gray => {
                // Found a back edge; the cycle is the stack slice from
                // `next` to the top, closed with `next` itself.
                let pos = stack
                    .iter()
                    .position(|n| *n == next)
                    .unwrap_or(stack.len() - 1);
                let mut path: Vec<TaskId> = stack[pos..].iter().map(|n| graph[*n]).collect();
                path.push(graph[next]);
                return Some(path);
            }
            Color::White => {
                if let Some(path) = dfs(graph, next, colors, stack) {
                    return Some(path);
                }
            }
            Color::Black => {}
        }
    }

    stack.pop();
    colors[node.index()] = Color::Black;
    None
}
