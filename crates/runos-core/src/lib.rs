// runos-core/src/lib.rs
// ============================================================================
// Module: runos-core Library
// Description: The run engine: event journal, tool capabilities, context
//              assembler, model router, node executor, DAG scheduler, and
//              run supervisor with replay.
// Purpose: Single source of truth for what makes a run deterministic,
//          observable, and replayable.
// Dependencies: cap-std, serde, serde_json, thiserror, time, tokio, tracing
// ============================================================================

//! ## Overview
//! `runos-core` is the run engine at the heart of `runos`: a DAG scheduler
//! over named nodes, an append-only per-run event journal that doubles as
//! the scheduler's source of truth, a context assembler with token-budget
//! enforcement, a pure model router, and a node executor that ties them
//! together for one invocation at a time. The HTTP control plane, concrete
//! node bodies, and the tools' own internals are deliberately out of scope —
//! this crate specifies and implements only the contracts each of those
//! collaborators must satisfy.
//!
//! Module layout mirrors the component design: [`journal`] and [`tools`] are
//! the leaves; [`context`] and [`router`] build on them; [`executor`] ties
//! context assembly, routing, and tool dispatch together for one node
//! invocation; [`scheduler`] walks a graph of invocations; [`supervisor`]
//! owns the pending-run queue and replay. [`model`] and [`registry`] are
//! shared data types consulted by every other module; [`error`] is the
//! crate-wide error taxonomy.

pub mod context;
pub mod error;
pub mod executor;
pub mod journal;
pub mod model;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod supervisor;
pub mod tools;
