// runos-core/src/scheduler.rs
// ============================================================================
// Module: DAG Scheduler
// Description: Walks a graph using the event journal as the source of truth
//              for edge guards; schedules parallel fan-out batches, enforces
//              joins, advances by conditional edge firing.
// Purpose: The state machine that makes a run deterministic and replayable.
// Dependencies: crate::executor, crate::journal, crate::registry
// ============================================================================

//! ## Overview
//! `completed` is seeded from the run's existing `node_done` events before
//! the loop starts, so a replay child (whose journal begins as a copied
//! prefix) resumes exactly at its tail rather than re-executing nodes the
//! parent already finished. Edge gating always re-reads the journal, so a
//! prefix event satisfies a gate exactly as a freshly emitted one would.

use std::collections::HashMap;
use std::collections::HashSet;

use serde_json::json;
use tracing::info;
use tracing::warn;

use crate::error::EngineError;
use crate::error::ValidationError;
use crate::executor::Engine;
use crate::executor::validate_node_name;
use crate::model::Edge;
use crate::model::Event;
use crate::model::Graph;
use crate::model::JoinKind;
use crate::model::Run;
use crate::model::RunId;
use crate::model::RunStatus;
use crate::registry::RunStore;

/// Per-node outgoing edges and join requirements, computed once per run.
struct Topology {
    adjacency: HashMap<String, Vec<Edge>>,
    in_degree: HashMap<String, u32>,
    join_sources: HashMap<String, HashSet<String>>,
}

fn build_topology(graph: &Graph) -> Topology {
    let mut adjacency: HashMap<String, Vec<Edge>> = HashMap::new();
    let mut in_degree: HashMap<String, u32> = HashMap::new();
    let mut join_sources: HashMap<String, HashSet<String>> = HashMap::new();

    for agent in &graph.agents {
        in_degree.entry(agent.clone()).or_insert(0);
    }
    for edge in &graph.dag {
        adjacency.entry(edge.from_node.clone()).or_default().push(edge.clone());
        *in_degree.entry(edge.to_node.clone()).or_insert(0) += 1;
        in_degree.entry(edge.from_node.clone()).or_insert(0);
        if matches!(edge.join, Some(JoinKind::All)) {
            join_sources.entry(edge.to_node.clone()).or_default().insert(edge.from_node.clone());
        }
    }

    Topology { adjacency, in_degree, join_sources }
}

/// Validates a graph's structural invariants: every edge endpoint must be a
/// declared agent and a known handler, and the DAG must be acyclic.
///
/// # Errors
///
/// Returns [`ValidationError::UndeclaredEndpoint`] if an edge references a
/// node outside `graph.agents`, [`ValidationError::UnknownNode`] if an edge
/// references a node with no executor handler, or
/// [`ValidationError::Cycle`] if the edge list describes a cycle.
pub fn validate_graph(graph: &Graph) -> Result<(), ValidationError> {
    let agents: HashSet<&str> = graph.agents.iter().map(String::as_str).collect();
    for edge in &graph.dag {
        if !agents.contains(edge.from_node.as_str()) {
            return Err(ValidationError::UndeclaredEndpoint(edge.from_node.clone()));
        }
        if !agents.contains(edge.to_node.as_str()) {
            return Err(ValidationError::UndeclaredEndpoint(edge.to_node.clone()));
        }
    }
    for agent in &graph.agents {
        validate_node_name(agent)?;
    }
    detect_cycle(graph)
}

/// Depth-first cycle detection with a concrete witness path.
fn detect_cycle(graph: &Graph) -> Result<(), ValidationError> {
    let topology = build_topology(graph);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: Vec<&str> = Vec::new();
    let mut on_stack_set: HashSet<&str> = HashSet::new();

    for start in &graph.agents {
        if visited.contains(start.as_str()) {
            continue;
        }
        if let Some(cycle) = visit(start, &topology, &mut visited, &mut on_stack, &mut on_stack_set) {
            return Err(ValidationError::Cycle { graph: graph.name.clone(), cycle });
        }
    }
    Ok(())
}

fn visit<'a>(
    node: &'a str,
    topology: &'a Topology,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut Vec<&'a str>,
    on_stack_set: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    on_stack.push(node);
    on_stack_set.insert(node);

    if let Some(edges) = topology.adjacency.get(node) {
        for edge in edges {
            let child = edge.to_node.as_str();
            if on_stack_set.contains(child) {
                let start = on_stack.iter().position(|n| *n == child).unwrap_or(0);
                let mut cycle: Vec<String> = on_stack[start..].iter().map(|s| (*s).to_string()).collect();
                cycle.push(child.to_string());
                return Some(cycle);
            }
            if !visited.contains(child) {
                if let Some(cycle) = visit(child, topology, visited, on_stack, on_stack_set) {
                    return Some(cycle);
                }
            }
        }
    }

    on_stack.pop();
    on_stack_set.remove(node);
    None
}

/// Whether the edge from `from_node` fires, given the run's current journal.
fn edge_fires(edge: &Edge, events: &[Event]) -> bool {
    edge.on.is_empty()
        || events.iter().any(|event| event.step == edge.from_node && edge.on.contains(&event.kind))
}

/// Whether every declared join source for `node` is in `completed`.
fn join_satisfied(topology: &Topology, node: &str, completed: &HashSet<String>) -> bool {
    topology.join_sources.get(node).is_none_or(|sources| sources.iter().all(|s| completed.contains(s)))
}

/// Advances the ready frontier past `node`'s outgoing edges, given the
/// run's current events and completed set. Shared by both the initial
/// frontier computation (for resumed runs) and the sequential step.
fn advance(topology: &Topology, node: &str, events: &[Event], completed: &HashSet<String>, ready: &mut Vec<String>) {
    for edge in topology.adjacency.get(node).into_iter().flatten() {
        let child = &edge.to_node;
        if completed.contains(child) || ready.contains(child) {
            continue;
        }
        if !edge_fires(edge, events) {
            continue;
        }
        if !join_satisfied(topology, child, completed) {
            continue;
        }
        ready.push(child.clone());
    }
}

/// Computes the initial ready set for a run, honoring any nodes already
/// completed in its (possibly replayed) event prefix.
fn initial_ready(topology: &Topology, events: &[Event], completed: &HashSet<String>) -> Vec<String> {
    let mut ready: Vec<String> = topology
        .in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| node.clone())
        .filter(|node| !completed.contains(node))
        .collect();

    for node in completed {
        advance(topology, node, events, completed, &mut ready);
    }
    ready
}

/// Executes `run_id`'s graph to completion, transitioning its status and
/// emitting the terminal `run_completed` or `run_failed` system event.
///
/// # Errors
///
/// Returns [`EngineError`] if the run or its graph cannot be found, if the
/// graph fails structural validation, or if an infrastructural failure
/// (journal write, path escape) unwinds the run.
pub async fn execute_graph(engine: &Engine, run_store: &RunStore, run_id: &RunId) -> Result<RunStatus, EngineError> {
    let run = run_store.get(run_id).await.ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
    let graph = engine
        .registries
        .graph(&run.graph)
        .await
        .ok_or_else(|| EngineError::Validation(ValidationError::UnknownGraph(run.graph.clone())))?;
    validate_graph(&graph).map_err(EngineError::Validation)?;

    run_store.transition(run_id, RunStatus::Running).await?;
    engine.journal.emit(run_id, "system", "run_started", json!({"graph": graph.name})).await?;
    info!(run_id = %run_id, graph = %graph.name, "run started");

    match run_loop(engine, &run, &graph).await {
        Ok(completed) => {
            run_store.transition(run_id, RunStatus::Succeeded).await?;
            engine
                .journal
                .emit(run_id, "system", "run_completed", json!({"completed_nodes": completed}))
                .await?;
            info!(run_id = %run_id, nodes = completed.len(), "run completed");
            Ok(RunStatus::Succeeded)
        }
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "run failed");
            run_store.transition(run_id, RunStatus::Failed).await?;
            engine.journal.emit(run_id, "system", "run_failed", json!({"error": err.to_string()})).await?;
            Err(err)
        }
    }
}

/// The scheduler's main loop: fan-out and sequential steps until `ready` is
/// exhausted. Returns the final completed-node set in emission order.
async fn run_loop(engine: &Engine, run: &Run, graph: &Graph) -> Result<Vec<String>, EngineError> {
    let topology = build_topology(graph);
    let prefix = engine.journal.read(&run.id).await;
    let mut completed: HashSet<String> = prefix
        .iter()
        .filter(|event| event.kind == "node_done")
        .map(|event| event.step.clone())
        .collect();
    let mut order: Vec<String> = completed.iter().cloned().collect();
    let mut ready = initial_ready(&topology, &prefix, &completed);

    while !ready.is_empty() {
        let fanout_pos = ready.iter().position(|node| {
            topology.adjacency.get(node).is_some_and(|edges| edges.first().is_some_and(|e| e.parallel))
        });

        if let Some(pos) = fanout_pos {
            let parent = ready.remove(pos);
            if !completed.contains(&parent) {
                engine.execute_node(run, &parent).await?;
                completed.insert(parent.clone());
                order.push(parent.clone());
            }

            let children: Vec<String> = topology
                .adjacency
                .get(&parent)
                .into_iter()
                .flatten()
                .map(|edge| edge.to_node.clone())
                .filter(|child| !completed.contains(child))
                .collect();

            let mut handles = Vec::with_capacity(children.len());
            for child in &children {
                let engine = engine.clone();
                let run = run.clone();
                let child = child.clone();
                handles.push(tokio::spawn(async move { engine.execute_node(&run, &child).await }));
            }
            for (child, handle) in children.iter().zip(handles) {
                handle
                    .await
                    .map_err(|err| EngineError::JournalWrite(crate::error::JournalWriteError { run_id: run.id.to_string(), message: err.to_string() }))??;
                completed.insert(child.clone());
                order.push(child.clone());
                ready.retain(|node| node != child);
            }

            let events = engine.journal.read(&run.id).await;
            advance(&topology, &parent, &events, &completed, &mut ready);
            for child in &children {
                advance(&topology, child, &events, &completed, &mut ready);
            }
        } else {
            let node = ready.remove(0);
            if !completed.contains(&node) {
                engine.execute_node(run, &node).await?;
                completed.insert(node.clone());
                order.push(node.clone());
            }
            let events = engine.journal.read(&run.id).await;
            advance(&topology, &node, &events, &completed, &mut ready);
        }
    }

    Ok(order)
}
