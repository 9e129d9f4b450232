// runos-core/src/supervisor.rs
// ============================================================================
// Module: Run Supervisor and Replay
// Description: Owns the pending -> running -> {succeeded, failed} lifecycle,
//              drains a pending-run queue cooperatively, and provides replay
//              by event-prefix cloning.
// Purpose: The top-level driver a long-running process (or the CLI's
//          `serve` subcommand) hands runs to.
// Dependencies: tokio, crate::executor, crate::journal, crate::registry,
//               crate::scheduler
// ============================================================================

//! ## Overview
//! [`Supervisor::run_once`] polls [`RunStore::pending`] and spawns one
//! [`crate::scheduler::execute_graph`] task per pending run it has not
//! already dispatched this process's lifetime — an `in_flight` guard closes
//! the window between listing a run as pending and that run's own task
//! actually performing the pending -> running transition, so a fast second
//! poll tick cannot dispatch the same run twice. [`Supervisor::replay_from`]
//! mirrors `original_source/engine.py`'s `replay_from`: it creates a child
//! run, seeds its journal with the parent's event prefix, and executes the
//! child immediately rather than waiting for the next poll tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::error;
use tracing::info;

use crate::error::EngineError;
use crate::error::ValidationError;
use crate::executor::Engine;
use crate::model::RunId;
use crate::registry::RunStore;
use crate::scheduler;

/// Default cadence at which [`Supervisor::run_forever`] polls the pending
/// queue, matching `original_source/app.py`'s `background_worker`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Drains the pending-run queue and executes each run's graph, and provides
/// replay from a parent run's event prefix.
#[derive(Clone)]
pub struct Supervisor {
    engine: Engine,
    run_store: RunStore,
    poll_interval: Duration,
    in_flight: Arc<Mutex<HashSet<RunId>>>,
    next_id: Arc<AtomicU64>,
}

impl Supervisor {
    /// Builds a supervisor over `engine` and `run_store`, polling at
    /// `poll_interval`.
    #[must_use]
    pub fn new(engine: Engine, run_store: RunStore, poll_interval: Duration) -> Self {
        Self {
            engine,
            run_store,
            poll_interval,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the run store this supervisor drains.
    #[must_use]
    pub const fn run_store(&self) -> &RunStore {
        &self.run_store
    }

    /// Returns the engine this supervisor drives runs with.
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Submits a new run of `graph` over `inputs`, leaving it `pending` for
    /// the next poll tick to pick up.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownGraph`] if `graph` is not
    /// registered, or [`EngineError::JournalWrite`] if the run's durable
    /// journal file cannot be created.
    pub async fn submit_run(&self, graph: String, inputs: Value) -> Result<RunId, EngineError> {
        if self.engine.registries.graph(&graph).await.is_none() {
            return Err(EngineError::Validation(ValidationError::UnknownGraph(graph)));
        }
        let id = self.generate_run_id();
        self.engine.journal.ensure_run(&id).await?;
        let run = self.run_store.create_pending(id.clone(), graph, inputs, None).await;
        info!(run_id = %run.id, graph = %run.graph, "run submitted");
        Ok(run.id)
    }

    /// Generates a run id shaped like `run-<n>-<yyyymmddhhmmss>`, mirroring
    /// `original_source/app.py`'s `create_run` id scheme.
    fn generate_run_id(&self) -> RunId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = OffsetDateTime::now_utc();
        RunId::new(format!(
            "run-{n}-{:04}{:02}{:02}{:02}{:02}{:02}",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second()
        ))
    }

    /// Replays `run_id` from `from_step`: creates a child run with a fresh
    /// id and `parent_run` set, copies the event prefix strictly preceding
    /// the first parent event whose `step` equals `from_step`, and executes
    /// the child's graph immediately.
    ///
    /// If `from_step` never occurs in the parent's history, the full parent
    /// history is copied and the child's scheduler finds no unfinished
    /// work — defined behavior, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunNotFound`] if `run_id` is unknown, or any
    /// error [`scheduler::execute_graph`] can return.
    pub async fn replay_from(&self, run_id: &RunId, from_step: &str) -> Result<RunId, EngineError> {
        let parent = self
            .run_store
            .get(run_id)
            .await
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        let child_id = RunId::new(format!("{run_id}-replay-{from_step}"));
        let prefix = self.engine.journal.prefix_until(run_id, from_step).await;
        self.engine.journal.seed_prefix(&child_id, prefix).await?;
        self.run_store
            .create_pending(child_id.clone(), parent.graph.clone(), parent.inputs.clone(), Some(parent.id.clone()))
            .await;
        info!(parent_run = %run_id, child_run = %child_id, from_step, "replay submitted");
        scheduler::execute_graph(&self.engine, &self.run_store, &child_id).await?;
        Ok(child_id)
    }

    /// Runs one poll tick: dispatches every pending run not already
    /// in-flight as its own task. Does not await run completion.
    pub async fn run_once(&self) {
        let pending = self.run_store.pending().await;
        let mut in_flight = self.in_flight.lock().await;
        let to_dispatch: Vec<RunId> = pending.into_iter().filter(|id| in_flight.insert(id.clone())).collect();
        drop(in_flight);

        for run_id in to_dispatch {
            let engine = self.engine.clone();
            let run_store = self.run_store.clone();
            let in_flight = self.in_flight.clone();
            let dispatched = run_id.clone();
            tokio::spawn(async move {
                if let Err(err) = scheduler::execute_graph(&engine, &run_store, &dispatched).await {
                    error!(run_id = %dispatched, error = %err, "run dispatch failed");
                }
                in_flight.lock().await.remove(&dispatched);
            });
        }
    }

    /// Polls the pending queue at `self.poll_interval` forever. Intended to
    /// be spawned as its own task by a caller (the CLI's `serve` command)
    /// that can cancel it on a shutdown signal; this method itself never
    /// returns under normal operation.
    pub async fn run_forever(&self) -> ! {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup and assertion clarity.")]
mod tests {
    use super::*;
    use crate::executor::Capabilities;
    use crate::journal::Journal;
    use crate::model::default_seed;
    use crate::registry::Registries;
    use crate::model::RunStatus;
    use crate::tools::ProcessTestCapability;
    use crate::tools::SandboxedFileCapability;
    use crate::tools::SubstringSecurityCapability;
    use std::sync::Arc as StdArc;

    async fn build_supervisor(repo: &std::path::Path, data: &std::path::Path) -> Supervisor {
        let journal = Journal::new(data);
        let registries = Registries::new();
        registries.load_seed(default_seed()).await;
        let files = StdArc::new(SandboxedFileCapability::open(repo).unwrap());
        let security = StdArc::new(SubstringSecurityCapability::new(
            SandboxedFileCapability::open(repo).unwrap(),
            vec!["eval(".to_string()],
            vec!["app.py".to_string()],
        ));
        let tests = StdArc::new(ProcessTestCapability::new(repo, "true", Vec::new()));
        let engine = Engine::new(journal, registries, Capabilities { files, tests, security });
        let run_store = RunStore::new();
        Supervisor::new(engine, run_store, Duration::from_millis(10))
    }

    fn setup_repo(repo: &std::path::Path) {
        std::fs::create_dir_all(repo.join("tests")).unwrap();
        std::fs::write(repo.join("app.py"), "def compute():\n    return 41\n").unwrap();
        std::fs::write(
            repo.join("tests/test_app.py"),
            "from app import compute\n\ndef test_answer():\n    assert compute() == 41\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn submit_run_rejects_unknown_graph() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let supervisor = build_supervisor(repo.path(), data.path()).await;
        let err = supervisor.submit_run("no-such-graph".to_string(), Value::Null).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::UnknownGraph(_))));
    }

    #[tokio::test]
    async fn run_once_drains_a_pending_run_to_succeeded() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        setup_repo(repo.path());
        let supervisor = build_supervisor(repo.path(), data.path()).await;
        let run_id = supervisor.submit_run("git-to-prod-multi".to_string(), Value::Null).await.unwrap();

        supervisor.run_once().await;
        for _ in 0..200 {
            if supervisor.run_store().get(&run_id).await.unwrap().status != RunStatus::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let run = supervisor.run_store().get(&run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn replay_from_reexecutes_only_the_tail() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        setup_repo(repo.path());
        let supervisor = build_supervisor(repo.path(), data.path()).await;
        let parent_id = supervisor.submit_run("git-to-prod-multi".to_string(), Value::Null).await.unwrap();
        scheduler::execute_graph(supervisor.engine(), supervisor.run_store(), &parent_id).await.unwrap();

        let child_id = supervisor.replay_from(&parent_id, "tester").await.unwrap();
        let child = supervisor.run_store().get(&child_id).await.unwrap();
        assert_eq!(child.parent_run.as_ref(), Some(&parent_id));
        assert_eq!(child.status, RunStatus::Succeeded);

        let child_events = supervisor.engine().journal.read(&child_id).await;
        assert!(child_events.iter().any(|e| e.step == "tester" && e.kind == "node_done"));
    }

    #[tokio::test]
    async fn replay_with_absent_from_step_copies_everything_and_reexecutes_nothing() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        setup_repo(repo.path());
        let supervisor = build_supervisor(repo.path(), data.path()).await;
        let parent_id = supervisor.submit_run("git-to-prod-multi".to_string(), Value::Null).await.unwrap();
        scheduler::execute_graph(supervisor.engine(), supervisor.run_store(), &parent_id).await.unwrap();
        let parent_events = supervisor.engine().journal.read(&parent_id).await;

        let child_id = supervisor.replay_from(&parent_id, "no-such-step").await.unwrap();
        let child_events = supervisor.engine().journal.read(&child_id).await;
        assert_eq!(child_events.len(), parent_events.len());
    }
}
