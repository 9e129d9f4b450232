// runos-core/src/registry.rs
// ============================================================================
// Module: Registries
// Description: Process-wide, read-mostly stores for graphs, policies,
//              context profiles, provider pools, and agent classes, plus the
//              Run entity store.
// Purpose: Give the scheduler and supervisor explicit, shared dependencies
//          instead of ambient global state (see SPEC_FULL.md section 9).
// Dependencies: tokio
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::error::StatusRegressionError;
use crate::model::AgentClass;
use crate::model::ContextProfile;
use crate::model::Graph;
use crate::model::Policy;
use crate::model::ProviderPool;
use crate::model::RegistrySeed;
use crate::model::Run;
use crate::model::RunId;
use crate::model::RunStatus;

/// Process-wide, read-mostly catalog of graphs, policies, context profiles,
/// provider pools, and agent classes.
///
/// Concurrent writes during runs are permitted; they take effect on the
/// next read, matching the ownership note in the data model.
#[derive(Clone, Default)]
pub struct Registries {
    graphs: Arc<RwLock<HashMap<String, Graph>>>,
    policies: Arc<RwLock<HashMap<String, Policy>>>,
    profiles: Arc<RwLock<HashMap<String, ContextProfile>>>,
    pools: Arc<RwLock<HashMap<String, ProviderPool>>>,
    agent_classes: Arc<RwLock<HashMap<String, AgentClass>>>,
}

impl Registries {
    /// Builds an empty registry set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every entity in `seed`, overwriting any existing entry with
    /// the same name.
    pub async fn load_seed(&self, seed: RegistrySeed) {
        let mut graphs = self.graphs.write().await;
        for graph in seed.graphs {
            graphs.insert(graph.name.clone(), graph);
        }
        drop(graphs);
        let mut policies = self.policies.write().await;
        for policy in seed.policies {
            policies.insert(policy.name.clone(), policy);
        }
        drop(policies);
        let mut profiles = self.profiles.write().await;
        for profile in seed.profiles {
            profiles.insert(profile.name.clone(), profile);
        }
        drop(profiles);
        let mut pools = self.pools.write().await;
        for pool in seed.pools {
            pools.insert(pool.name.clone(), pool);
        }
        drop(pools);
        let mut classes = self.agent_classes.write().await;
        for class in seed.agent_classes {
            classes.insert(class.name.clone(), class);
        }
    }

    /// Registers or replaces a single graph.
    pub async fn register_graph(&self, graph: Graph) {
        self.graphs.write().await.insert(graph.name.clone(), graph);
    }

    /// Looks up a graph by name.
    pub async fn graph(&self, name: &str) -> Option<Graph> {
        self.graphs.read().await.get(name).cloned()
    }

    /// Looks up a policy by name.
    pub async fn policy(&self, name: &str) -> Option<Policy> {
        self.policies.read().await.get(name).cloned()
    }

    /// Looks up a context profile by name.
    pub async fn profile(&self, name: &str) -> Option<ContextProfile> {
        self.profiles.read().await.get(name).cloned()
    }

    /// Looks up a provider pool by name.
    pub async fn pool(&self, name: &str) -> Option<ProviderPool> {
        self.pools.read().await.get(name).cloned()
    }

    /// Looks up an agent class by name.
    pub async fn agent_class(&self, name: &str) -> Option<AgentClass> {
        self.agent_classes.read().await.get(name).cloned()
    }
}

/// Entity store for [`Run`] records. The journal owns event history; this
/// store owns the run's status field and other run-level metadata.
#[derive(Clone, Default)]
pub struct RunStore {
    runs: Arc<RwLock<HashMap<RunId, Run>>>,
}

impl RunStore {
    /// Builds an empty run store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new run in the `pending` state.
    ///
    /// Graph-name validation happens at the caller (e.g.
    /// [`crate::supervisor::Supervisor::submit_run`]); this method itself
    /// never fails, but is `async` for symmetry with the rest of the store's
    /// API.
    pub async fn create_pending(
        &self,
        id: RunId,
        graph: String,
        inputs: serde_json::Value,
        parent_run: Option<RunId>,
    ) -> Run {
        let run = Run {
            id: id.clone(),
            graph,
            inputs,
            status: RunStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            parent_run,
        };
        self.runs.write().await.insert(id, run.clone());
        run
    }

    /// Returns a snapshot of one run's record.
    pub async fn get(&self, id: &RunId) -> Option<Run> {
        self.runs.read().await.get(id).cloned()
    }

    /// Inserts or replaces a run record directly, bypassing the
    /// pending-creation helper's status/timestamp assignment.
    ///
    /// Used by the CLI's one-shot `status`/`replay` commands to register a
    /// best-effort reconstruction of a parent run (derived from its durable
    /// event journal) in a fresh process that never saw that run created —
    /// the in-memory store set up by the `run`/`serve` commands is not
    /// itself persisted.
    pub async fn put(&self, run: Run) {
        self.runs.write().await.insert(run.id.clone(), run);
    }

    /// Returns every run currently in the `pending` state, in insertion
    /// order as reported by the underlying map (no ordering guarantee beyond
    /// "pending at the time of the call").
    pub async fn pending(&self) -> Vec<RunId> {
        self.runs
            .read()
            .await
            .values()
            .filter(|run| run.status == RunStatus::Pending)
            .map(|run| run.id.clone())
            .collect()
    }

    /// Moves a run to `to`, enforcing the monotone pending -> running ->
    /// {succeeded, failed} chain.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunNotFound`] if `id` is unknown, or
    /// [`EngineError::StatusRegression`] if `to` does not strictly follow the
    /// run's current status.
    pub async fn transition(&self, id: &RunId, to: RunStatus) -> Result<(), EngineError> {
        let mut guard = self.runs.write().await;
        let run = guard
            .get_mut(id)
            .ok_or_else(|| EngineError::RunNotFound(id.to_string()))?;
        if !is_monotone(run.status, to) {
            return Err(EngineError::StatusRegression(StatusRegressionError {
                run_id: id.to_string(),
                from: run.status,
                to,
            }));
        }
        run.status = to;
        Ok(())
    }
}

/// Whether `to` is a legal successor of `from` in the pending -> running ->
/// {succeeded, failed} chain. Terminal states have no successor.
const fn is_monotone(from: RunStatus, to: RunStatus) -> bool {
    matches!(
        (from, to),
        (RunStatus::Pending, RunStatus::Running)
            | (RunStatus::Running, RunStatus::Succeeded)
            | (RunStatus::Running, RunStatus::Failed)
    )
}
