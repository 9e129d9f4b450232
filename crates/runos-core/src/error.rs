// runos-core/src/error.rs
// ============================================================================
// Module: Error Taxonomy
// Description: ValidationError, PathEscapeError, JournalWriteError, ToolError,
//              HandlerException, and the top-level EngineError that wraps
//              the fatal subset.
// Purpose: Give every fallible boundary in the crate a named, typed error.
// Dependencies: thiserror
// ============================================================================

use thiserror::Error;

use crate::model::RunStatus;

/// Graph registration and run-submission failures. Never recovered
/// internally; the caller (CLI, or a future HTTP layer) surfaces these as a
/// rejection of the request that produced them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A run or replay referenced a graph name absent from the registry.
    #[error("unknown graph: {0}")]
    UnknownGraph(String),
    /// A node appeared on an edge but not in the graph's `agents` list.
    #[error("edge endpoint `{0}` is not declared in the graph's agents")]
    UndeclaredEndpoint(String),
    /// The edge list describes a cycle.
    #[error("cycle detected in graph `{graph}`: {}", cycle.join(" -> "))]
    Cycle {
        /// Graph name.
        graph: String,
        /// One concrete cycle, as a sequence of node names.
        cycle: Vec<String>,
    },
    /// A run or replay referenced a node name the executor has no handler for.
    #[error("unknown node: {0}")]
    UnknownNode(String),
}

/// A file capability operation resolved outside its configured safe root.
/// Fatal for the node that attempted it; unwinds out of the executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("path escapes safe root: {0}")]
pub struct PathEscapeError(pub String);

/// The journal's durable append failed after the in-memory append already
/// succeeded. Fatal for the run.
#[derive(Debug, Error)]
#[error("journal write failed for run {run_id}: {message}")]
pub struct JournalWriteError {
    /// Run whose journal failed to persist.
    pub run_id: String,
    /// Underlying I/O failure, rendered to a string since `io::Error` is not
    /// `Clone` and call sites only need to display or log it.
    pub message: String,
}

impl JournalWriteError {
    /// Wraps an I/O failure observed while appending to a run's journal file.
    #[must_use]
    pub fn from_io(run_id: &str, source: &std::io::Error) -> Self {
        Self {
            run_id: run_id.to_string(),
            message: source.to_string(),
        }
    }
}

/// A tool capability (file, test, security) returned a domain-level error.
/// Never fatal by itself: the handler records it in a `*_failed` or
/// `error{...}` event and the executor continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ToolError(pub String);

/// An unexpected failure inside a node handler body, distinct from a
/// tool-reported domain error. Caught at the dispatch boundary; recorded as
/// an `error{...}` event; `node_done` is still emitted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("handler exception in node `{node}`: {message}")]
pub struct HandlerException {
    /// Node whose handler failed unexpectedly.
    pub node: String,
    /// Description of the failure.
    pub message: String,
}

/// A run status transition violated the monotone pending -> running ->
/// {succeeded, failed} chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("run {run_id} cannot transition from {from:?} to {to:?}")]
pub struct StatusRegressionError {
    /// Run whose transition was rejected.
    pub run_id: String,
    /// Status the run held before the rejected transition.
    pub from: RunStatus,
    /// Status the caller attempted to set.
    pub to: RunStatus,
}

/// The fatal error surface of the engine: everything that unwinds a
/// scheduler loop and marks the owning run `failed`, plus the handful of
/// "this request made no sense" cases a caller must see directly.
#[derive(Debug, Error)]
pub enum EngineError {
    /// See [`ValidationError`].
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// See [`PathEscapeError`].
    #[error(transparent)]
    PathEscape(#[from] PathEscapeError),
    /// See [`JournalWriteError`].
    #[error(transparent)]
    JournalWrite(#[from] JournalWriteError),
    /// See [`StatusRegressionError`].
    #[error(transparent)]
    StatusRegression(#[from] StatusRegressionError),
    /// A run id was referenced that the run store has no record of.
    #[error("run not found: {0}")]
    RunNotFound(String),
}
