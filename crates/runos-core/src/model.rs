// runos-core/src/model.rs
// ============================================================================
// Module: Data Model
// Description: Graph, Edge, Policy, ContextProfile, ProviderPool, Run, Event.
// Purpose: Plain serializable records shared by every other module.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! The entities here are intentionally data-only: no entity method performs
//! scheduling, I/O, or validation beyond simple accessors. Validation lives
//! in [`crate::scheduler`]; persistence lives in [`crate::journal`] and
//! [`crate::registry`].

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

/// Identifier for one run of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Wraps a raw run id string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the run id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A directed relation between two nodes of a [`Graph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream node name.
    pub from_node: String,
    /// Downstream node name.
    pub to_node: String,
    /// Event types that gate this edge; empty means unconditional.
    #[serde(default)]
    pub on: Vec<String>,
    /// Whether this edge is part of a fan-out batch.
    #[serde(default)]
    pub parallel: bool,
    /// Join kind, if `to_node` is a join barrier for this edge.
    #[serde(default)]
    pub join: Option<JoinKind>,
}

/// The only join kind the scheduler currently recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// `to_node` dispatches only once every declared source has completed.
    All,
}

/// A named, registered DAG of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    /// Graph name, unique within the registry.
    pub name: String,
    /// Every node id that may appear as an edge endpoint.
    pub agents: Vec<String>,
    /// The edge list defining the DAG.
    pub dag: Vec<Edge>,
    /// Optional policy consulted by nodes of this graph.
    #[serde(default)]
    pub policy_name: Option<String>,
}

/// A named guard consulted by the context assembler and security capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name, unique within the registry.
    pub name: String,
    /// Soft budget; recorded on context events, never enforced by the core.
    #[serde(default = "Policy::default_max_cost_usd")]
    pub max_cost_usd: f64,
    /// Substrings the security capability treats as blocked.
    #[serde(default)]
    pub block_patterns: Vec<String>,
}

impl Policy {
    /// Default per-invocation cost ceiling used when a policy omits one.
    #[must_use]
    pub const fn default_max_cost_usd() -> f64 {
        5.0
    }
}

/// Budget and content shape consulted by the context assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextProfile {
    /// Profile name, unique within the registry.
    pub name: String,
    /// Token budget enforced by [`crate::context::assemble`].
    #[serde(default = "ContextProfile::default_budget_tokens")]
    pub budget_tokens: u64,
    /// Repo-relative paths the assembler reads into `repo_snippets`. Empty
    /// means the assembler falls back to its own default mount set rather
    /// than an empty section (see `context::DEFAULT_MOUNTS`).
    #[serde(default)]
    pub mounts: Vec<String>,
    /// Opaque selector directives; carried through, not interpreted by core.
    #[serde(default)]
    pub selectors: Vec<serde_json::Value>,
    /// Opaque transform directives; carried through, not interpreted by core.
    #[serde(default)]
    pub transforms: Vec<serde_json::Value>,
}

impl ContextProfile {
    /// Default token budget, matching the distilled system's default profile.
    #[must_use]
    pub const fn default_budget_tokens() -> u64 {
        120_000
    }
}

/// One entry in a [`ProviderPool`]'s model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model name as referenced by routing rules and [`crate::router`].
    pub name: String,
    /// Maximum context window in tokens.
    pub max_context: u64,
    /// Approximate requests-per-second capacity.
    pub rps: u32,
    /// Per-invocation cost in US dollars.
    pub cost: f64,
}

/// A declarative routing override consulted before the router's default rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Node name this rule applies to; `None` matches every node.
    #[serde(default)]
    pub step: Option<String>,
    /// Model name to select when this rule matches.
    pub model: String,
}

/// A named model catalog plus routing overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPool {
    /// Pool name, unique within the registry.
    pub name: String,
    /// Available models.
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    /// Overrides consulted before the router's default threshold rule.
    #[serde(default)]
    pub routing: Vec<RoutingRule>,
}

/// Registration record for an external node, carried for completeness but
/// not consulted by the scheduler, which dispatches by node name alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentClass {
    /// Node name this class documents.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Tool capability names this node is expected to use.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Default policy for runs of this node, if any.
    #[serde(default)]
    pub policy_name: Option<String>,
    /// Default context profile for runs of this node, if any.
    #[serde(default)]
    pub context_profile: Option<String>,
}

/// A run's lifecycle stage. Transitions are strictly monotone; see
/// [`crate::registry::RunStore::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Queued, not yet picked up by the supervisor.
    Pending,
    /// Handed to the scheduler.
    Running,
    /// Scheduler exhausted `ready` without an uncaught fatal error.
    Succeeded,
    /// An infrastructural error unwound the scheduler loop.
    Failed,
}

/// One execution attempt of a [`Graph`] over some inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub id: RunId,
    /// Name of the registered graph this run executes.
    pub graph: String,
    /// Opaque run inputs, forwarded to node handlers that care to read them.
    #[serde(default)]
    pub inputs: serde_json::Value,
    /// Current lifecycle stage.
    pub status: RunStatus,
    /// Wall-clock creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Parent run id, set only for replay children.
    #[serde(default)]
    pub parent_run: Option<RunId>,
}

/// One point in a run's history. Appended by the journal; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Node name that produced this event, or `"system"`.
    pub step: String,
    /// Event type, e.g. `"node_done"` or `"patch_created"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Wall-clock emission time.
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    /// Opaque event payload.
    pub data: serde_json::Value,
}

/// Process-wide seed data loaded at startup, mirroring the registries an
/// external control plane would populate over HTTP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySeed {
    /// Graphs to register.
    #[serde(default)]
    pub graphs: Vec<Graph>,
    /// Policies to register.
    #[serde(default)]
    pub policies: Vec<Policy>,
    /// Context profiles to register.
    #[serde(default)]
    pub profiles: Vec<ContextProfile>,
    /// Provider pools to register.
    #[serde(default)]
    pub pools: Vec<ProviderPool>,
    /// Agent class declarations to register.
    #[serde(default)]
    pub agent_classes: Vec<AgentClass>,
}

/// Convenience constructor used by tests and the CLI's `git-to-prod-multi`
/// seed graph, mirroring the distilled system's default registration.
#[must_use]
pub fn git_to_prod_multi_graph() -> Graph {
    let edge = |from_node: &str, to_node: &str, on: &[&str], parallel: bool, join: Option<JoinKind>| Edge {
        from_node: from_node.to_string(),
        to_node: to_node.to_string(),
        on: on.iter().map(|s| (*s).to_string()).collect(),
        parallel,
        join,
    };
    Graph {
        name: "git-to-prod-multi".to_string(),
        agents: vec![
            "planner".to_string(),
            "py_fixer".to_string(),
            "fe_fixer".to_string(),
            "test_writer".to_string(),
            "aggregator".to_string(),
            "tester".to_string(),
            "security".to_string(),
            "release".to_string(),
        ],
        dag: vec![
            edge("planner", "py_fixer", &[], true, None),
            edge("planner", "fe_fixer", &[], true, None),
            edge("planner", "test_writer", &[], true, None),
            edge("py_fixer", "aggregator", &[], false, Some(JoinKind::All)),
            edge("fe_fixer", "aggregator", &[], false, Some(JoinKind::All)),
            edge("test_writer", "aggregator", &[], false, Some(JoinKind::All)),
            edge("aggregator", "tester", &["patch_selected"], false, None),
            edge("tester", "security", &["tests_passed"], false, None),
            edge("security", "release", &["security_ok"], false, None),
        ],
        policy_name: Some("default".to_string()),
    }
}

/// Typed accessor over an event payload, avoiding scattered `data.get(...)`
/// calls at call sites. `data` stays an opaque [`serde_json::Value`] at the
/// journal boundary; handlers and tests use this for ergonomic reads.
#[must_use]
pub fn event_bool(data: &serde_json::Value, key: &str) -> Option<bool> {
    data.get(key).and_then(serde_json::Value::as_bool)
}

/// Builds the seed registry used by the CLI's default `serve`/`run` startup,
/// grounded on `original_source/app.py`'s `startup` hook.
#[must_use]
pub fn default_seed() -> RegistrySeed {
    RegistrySeed {
        graphs: vec![git_to_prod_multi_graph()],
        policies: vec![Policy {
            name: "default".to_string(),
            max_cost_usd: Policy::default_max_cost_usd(),
            block_patterns: vec!["eval(".to_string()],
        }],
        profiles: vec![ContextProfile {
            name: "reviewer-default".to_string(),
            budget_tokens: ContextProfile::default_budget_tokens(),
            mounts: Vec::new(),
            selectors: Vec::new(),
            transforms: Vec::new(),
        }],
        pools: Vec::new(),
        agent_classes: Vec::new(),
    }
}

/// Used by `assemble_context` to avoid recomputing an empty map literal.
#[must_use]
pub fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Shorthand used by registries keyed by name.
pub type NamedMap<V> = HashMap<String, V>;
