// runos-core/src/executor.rs
// ============================================================================
// Module: Node Executor
// Description: Per-invocation pipeline: assemble context, emit
//              `context_compiled`, dispatch to a node handler, emit
//              handler-specific events, emit a terminal `node_done`.
// Purpose: The only place node bodies run; everything else in the crate
//          treats a node invocation as this function's effects.
// Dependencies: serde_json, tokio (spawn_blocking for the test capability)
// ============================================================================

//! ## Overview
//! Handler bodies are deterministic stand-ins for the real agentic actions a
//! node name describes (`planner`, `py_fixer`, ...); none of them call an
//! LLM. A handler's only fatal failure mode is
//! [`PathEscapeError`], raised by the file capability and propagated with
//! `?`; every other failure (a failed test run, a blocked security scan, an
//! unknown node name) is recorded as a domain event and `node_done` is still
//! emitted.

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use tracing::warn;

use crate::context;
use crate::error::EngineError;
use crate::error::HandlerException;
use crate::error::PathEscapeError;
use crate::error::ValidationError;
use crate::journal::Journal;
use crate::model::Run;
use crate::registry::Registries;
use crate::router;
use crate::tools::FileCapability;
use crate::tools::FileRead;
use crate::tools::SecurityCapability;
use crate::tools::TestCapability;

/// Context profile consulted for every node invocation in this revision. A
/// future revision may let a graph or policy name a profile per node; that
/// isn't wired up yet.
pub const DEFAULT_PROFILE_NAME: &str = "reviewer-default";

/// The three tool capabilities a node handler body may call.
#[derive(Clone)]
pub struct Capabilities {
    /// Sandboxed repo file I/O.
    pub files: Arc<dyn FileCapability>,
    /// External test process invocation.
    pub tests: Arc<dyn TestCapability>,
    /// Substring security scanning.
    pub security: Arc<dyn SecurityCapability>,
}

/// Ties the journal, registries, and tool capabilities together for one
/// node invocation.
///
/// Cloning an [`Engine`] is cheap: every field is itself a handle over
/// shared state, matching how [`Journal`] is threaded through spawned
/// tasks for a parallel fan-out batch.
#[derive(Clone)]
pub struct Engine {
    /// Per-run event log.
    pub journal: Journal,
    /// Process-wide graph/policy/profile/pool registries.
    pub registries: Registries,
    /// Tool capabilities node handlers invoke.
    pub capabilities: Capabilities,
}

impl Engine {
    /// Builds an engine over the given journal, registries, and capabilities.
    #[must_use]
    pub const fn new(journal: Journal, registries: Registries, capabilities: Capabilities) -> Self {
        Self { journal, registries, capabilities }
    }

    /// Executes one node invocation end-to-end.
    ///
    /// Holds the run's node-execution lock for the whole call, so two
    /// fan-out siblings dispatched onto separate tasks never interleave
    /// their own `context_compiled` / domain / `node_done` emissions in the
    /// journal, even though the scheduler runs them concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] only for infrastructural failures: a durable
    /// journal write failure, or a node handler's file operation escaping
    /// the safe root. Domain-level failures (a failed test run, a blocked
    /// security scan, an unknown node name) are recorded as events and do
    /// not surface here.
    pub async fn execute_node(&self, run: &Run, node: &str) -> Result<Value, EngineError> {
        let exec_lock = self.journal.node_execution_lock(&run.id).await?;
        let _contiguity_guard = exec_lock.lock_owned().await;

        let profile = self
            .registries
            .profile(DEFAULT_PROFILE_NAME)
            .await
            .unwrap_or_else(|| crate::model::default_seed().profiles.remove(0));
        let graph = self.registries.graph(&run.graph).await;
        let policy = match graph.as_ref().and_then(|g| g.policy_name.clone()) {
            Some(name) => self.registries.policy(&name).await,
            None => None,
        };
        let pool = self.registries.pool("default").await;

        let ctx = context::assemble(run, &profile, policy.as_ref(), &self.journal, self.capabilities.files.as_ref()).await;
        let model_choice = router::choose_model(ctx.manifest.total_tokens, node, pool.as_ref());

        self.journal
            .emit(
                &run.id,
                node,
                "context_compiled",
                json!({"manifest": ctx.manifest, "model": model_choice}),
            )
            .await?;
        debug!(run_id = %run.id, node, tokens = ctx.manifest.total_tokens, model = %model_choice.model, "context compiled");

        let result = self.dispatch_guarded(run, node).await?;

        self.journal
            .emit(&run.id, node, "node_done", json!({"result": result}))
            .await?;

        Ok(result)
    }

    /// Runs [`Self::dispatch`] on its own task so a handler body panic is
    /// caught rather than unwinding the whole run.
    ///
    /// A panic becomes a [`HandlerException`], recorded as an `error` event;
    /// `node_done` is still emitted by the caller with that error result. A
    /// cancelled task (the runtime shutting down) is the one case that still
    /// propagates as fatal, since there is no result to record.
    async fn dispatch_guarded(&self, run: &Run, node: &str) -> Result<Value, EngineError> {
        let engine = self.clone();
        let run_cloned = run.clone();
        let node_owned = node.to_string();
        match tokio::spawn(async move { engine.dispatch(&run_cloned, &node_owned).await }).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let exception = HandlerException {
                    node: node.to_string(),
                    message: join_err.to_string(),
                };
                warn!(run_id = %run.id, node, error = %exception, "handler panicked");
                let result = json!({"error": exception.to_string()});
                self.journal.emit(&run.id, node, "error", result.clone()).await?;
                Ok(result)
            }
            Err(join_err) => Err(EngineError::JournalWrite(crate::error::JournalWriteError {
                run_id: run.id.to_string(),
                message: join_err.to_string(),
            })),
        }
    }

    /// Dispatches to the handler for `node`, emitting its domain event(s).
    /// Returns the handler's result mapping, which the caller folds into
    /// `node_done`.
    async fn dispatch(&self, run: &Run, node: &str) -> Result<Value, EngineError> {
        match node {
            "planner" => Ok(self.run_planner(run).await?),
            "py_fixer" => Ok(self.run_py_fixer(run).await?),
            "fe_fixer" => Ok(self.run_fe_fixer(run).await?),
            "test_writer" => Ok(self.run_test_writer(run).await?),
            "aggregator" => Ok(self.run_aggregator(run).await?),
            "tester" => Ok(self.run_tester(run).await?),
            "security" => Ok(self.run_security(run).await?),
            "release" => Ok(self.run_release(run).await?),
            other => {
                warn!(run_id = %run.id, node = other, "dispatch to unknown node");
                let result = json!({"error": format!("unknown node: {other}")});
                self.journal.emit(&run.id, node, "error", result.clone()).await?;
                Ok(result)
            }
        }
    }

    async fn run_planner(&self, run: &Run) -> Result<Value, EngineError> {
        let result = json!({
            "target_files": ["app.py", "tests/test_app.py"],
            "hint": "test expects 42, app returns 41",
        });
        self.journal.emit(&run.id, "planner", "plan_ready", result.clone()).await?;
        Ok(result)
    }

    /// Target path `py_fixer` reads and fixes. Honors `run.inputs.target_file`
    /// when present so handler-level file operations remain exercisable by
    /// callers that want to probe safe-root confinement end to end.
    fn target_file(run: &Run) -> String {
        run.inputs
            .get("target_file")
            .and_then(Value::as_str)
            .unwrap_or("app.py")
            .to_string()
    }

    async fn run_py_fixer(&self, run: &Run) -> Result<Value, EngineError> {
        let path = Self::target_file(run);
        let result = match self.capabilities.files.read(&path).map_err(|err| escape(&err))? {
            FileRead::Found { content, .. } => {
                let fixed = content.replace("return 41", "return 42");
                self.capabilities.files.write(&path, &fixed).map_err(|err| escape(&err))?;
                let patch = json!({"file": path, "change": "return 41 -> return 42"});
                self.write_artifact(&run.id, "py_fixer_patch.json", &serde_json::to_string_pretty(&patch).unwrap_or_default())
                    .await;
                json!({"patch": patch, "success": true})
            }
            FileRead::NotFound { .. } => json!({"error": format!("{path} not found")}),
        };
        self.journal.emit(&run.id, "py_fixer", "patch_created", result.clone()).await?;
        Ok(result)
    }

    async fn run_fe_fixer(&self, run: &Run) -> Result<Value, EngineError> {
        let result = json!({"patch": Value::Null, "message": "no frontend changes needed"});
        self.journal.emit(&run.id, "fe_fixer", "patch_created", result.clone()).await?;
        Ok(result)
    }

    async fn run_test_writer(&self, run: &Run) -> Result<Value, EngineError> {
        const TEST_PATH: &str = "tests/test_app.py";
        const MARKER: &str = "assert answer == 42";
        const APPENDED_TEST: &str =
            "\n\ndef test_answer_type():\n    from app import compute\n    assert isinstance(compute(), int)\n";

        let result = match self.capabilities.files.read(TEST_PATH).map_err(|err| escape(&err))? {
            FileRead::Found { content, .. } if !content.contains(MARKER) => {
                let updated = format!("{content}{APPENDED_TEST}");
                self.capabilities.files.write(TEST_PATH, &updated).map_err(|err| escape(&err))?;
                json!({"added": "test_answer_type", "success": true})
            }
            FileRead::Found { .. } => json!({"message": "tests already complete"}),
            FileRead::NotFound { .. } => json!({"error": "test file not found"}),
        };
        self.journal.emit(&run.id, "test_writer", "test_updated", result.clone()).await?;
        Ok(result)
    }

    async fn run_aggregator(&self, run: &Run) -> Result<Value, EngineError> {
        let events = self.journal.read(&run.id).await;
        let selected = events
            .iter()
            .find(|event| {
                event.step == "py_fixer"
                    && event.kind == "patch_created"
                    && event.data.get("success").and_then(Value::as_bool).unwrap_or(false)
            })
            .map(|event| event.data["patch"].clone());
        let result = json!({"selected_patch": selected});
        self.journal.emit(&run.id, "aggregator", "patch_selected", result.clone()).await?;
        Ok(result)
    }

    async fn run_tester(&self, run: &Run) -> Result<Value, EngineError> {
        let tests = self.capabilities.tests.clone();
        let outcome = tokio::task::spawn_blocking(move || tests.run())
            .await
            .map_err(|err| crate::error::JournalWriteError { run_id: run.id.to_string(), message: err.to_string() })?;
        let (passed, output) = match outcome {
            Ok(outcome) => (outcome.passed, outcome.output),
            Err(err) => (false, err.to_string()),
        };
        let result = json!({"passed": passed, "output": output});
        let event_kind = if passed { "tests_passed" } else { "tests_failed" };
        self.journal.emit(&run.id, "tester", event_kind, result.clone()).await?;
        Ok(result)
    }

    async fn run_security(&self, run: &Run) -> Result<Value, EngineError> {
        let security = self.capabilities.security.clone();
        let outcome = tokio::task::spawn_blocking(move || security.scan_repo())
            .await
            .map_err(|err| crate::error::JournalWriteError { run_id: run.id.to_string(), message: err.to_string() })?;
        let result = json!({"ok": outcome.ok, "issues": outcome.issues});
        let event_kind = if outcome.ok { "security_ok" } else { "security_failed" };
        self.journal.emit(&run.id, "security", event_kind, result.clone()).await?;
        Ok(result)
    }

    async fn run_release(&self, run: &Run) -> Result<Value, EngineError> {
        const CHANGELOG: &str = "CHANGELOG.md";
        let existing = match self.capabilities.files.read(CHANGELOG).map_err(|err| escape(&err))? {
            FileRead::Found { content, .. } => content,
            FileRead::NotFound { .. } => "# Changelog\n\n".to_string(),
        };
        let ts = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        let updated = format!("{existing}\n- {ts}: auto-release from run {}\n", run.id);
        self.capabilities.files.write(CHANGELOG, &updated).map_err(|err| escape(&err))?;
        let result = json!({"released": true});
        self.journal.emit(&run.id, "release", "release_complete", result.clone()).await?;
        Ok(result)
    }

    /// Writes a per-run artifact file under `<data_root>/<run_id>/<name>`.
    /// Distinct from the safe-root file capability: artifacts belong to the
    /// engine's own data root, not the repo handlers read and write.
    async fn write_artifact(&self, run_id: &crate::model::RunId, name: &str, content: &str) {
        let dir = self.journal.run_dir(run_id);
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            warn!(run_id = %run_id, name, %err, "failed to create artifact directory");
            return;
        }
        if let Err(err) = tokio::fs::write(dir.join(name), content).await {
            warn!(run_id = %run_id, name, %err, "failed to write artifact");
        }
    }
}

/// Wraps a file-capability failure as the engine-level error, preserving the
/// path-escape classification as the executor's only fatal handler failure.
fn escape(err: &PathEscapeError) -> EngineError {
    EngineError::PathEscape(err.clone())
}

/// Raised when a node name has no handler in [`Engine::dispatch`]'s match
/// arms at graph-registration time, distinct from the runtime `error` event
/// a live dispatch emits for the same condition.
#[must_use]
pub fn validate_node_name(node: &str) -> Result<(), ValidationError> {
    const KNOWN: &[&str] = &[
        "planner", "py_fixer", "fe_fixer", "test_writer", "aggregator", "tester", "security", "release",
    ];
    if KNOWN.contains(&node) {
        Ok(())
    } else {
        Err(ValidationError::UnknownNode(node.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup and assertion clarity.")]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use crate::model::RunId;
    use crate::model::RunStatus;
    use crate::model::default_seed;
    use crate::registry::Registries;
    use crate::tools::ProcessTestCapability;
    use crate::tools::SandboxedFileCapability;
    use crate::tools::SubstringSecurityCapability;

    async fn test_engine(repo_root: &std::path::Path, data_root: &std::path::Path) -> (Engine, Run) {
        let journal = Journal::new(data_root);
        let registries = Registries::new();
        registries.load_seed(default_seed()).await;
        let files = Arc::new(SandboxedFileCapability::open(repo_root).unwrap());
        let security = Arc::new(SubstringSecurityCapability::new(
            SandboxedFileCapability::open(repo_root).unwrap(),
            vec!["eval(".to_string()],
            vec!["app.py".to_string()],
        ));
        let tests = Arc::new(ProcessTestCapability::new(repo_root, "true", Vec::new()));
        let engine = Engine::new(journal, registries, Capabilities { files, tests, security });
        let run = Run {
            id: RunId::new("r1"),
            graph: "git-to-prod-multi".to_string(),
            inputs: Value::Null,
            status: RunStatus::Running,
            created_at: OffsetDateTime::now_utc(),
            parent_run: None,
        };
        engine.journal.ensure_run(&run.id).await.unwrap();
        (engine, run)
    }

    #[tokio::test]
    async fn py_fixer_applies_the_deterministic_patch() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("app.py"), "def compute():\n    return 41\n").unwrap();
        let (engine, run) = test_engine(repo.path(), data.path()).await;
        let result = engine.execute_node(&run, "py_fixer").await.unwrap();
        assert_eq!(result["success"], true);
        let fixed = std::fs::read_to_string(repo.path().join("app.py")).unwrap();
        assert!(fixed.contains("return 42"));
    }

    #[tokio::test]
    async fn aggregator_selects_the_first_successful_py_fixer_patch() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("app.py"), "def compute():\n    return 41\n").unwrap();
        let (engine, run) = test_engine(repo.path(), data.path()).await;
        engine.execute_node(&run, "py_fixer").await.unwrap();
        let result = engine.execute_node(&run, "aggregator").await.unwrap();
        assert_eq!(result["selected_patch"]["file"], "app.py");
    }

    #[tokio::test]
    async fn aggregator_selects_none_when_py_fixer_never_ran() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let (engine, run) = test_engine(repo.path(), data.path()).await;
        let result = engine.execute_node(&run, "aggregator").await.unwrap();
        assert!(result["selected_patch"].is_null());
    }

    #[tokio::test]
    async fn unknown_node_emits_error_and_still_completes() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let (engine, run) = test_engine(repo.path(), data.path()).await;
        let result = engine.execute_node(&run, "not_a_real_node").await.unwrap();
        assert!(result["error"].as_str().unwrap().contains("unknown node"));
        let events = engine.journal.read(&run.id).await;
        assert!(events.iter().any(|e| e.kind == "node_done" && e.step == "not_a_real_node"));
    }

    #[tokio::test]
    async fn path_escape_propagates_as_a_fatal_engine_error() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let (engine, mut run) = test_engine(repo.path(), data.path()).await;
        run.inputs = json!({"target_file": "../../etc/passwd"});
        let err = engine.execute_node(&run, "py_fixer").await.unwrap_err();
        assert!(matches!(err, EngineError::PathEscape(_)));
    }

    #[tokio::test]
    async fn release_appends_a_timestamped_entry_to_the_changelog() {
        let repo = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let (engine, run) = test_engine(repo.path(), data.path()).await;
        engine.execute_node(&run, "release").await.unwrap();
        let changelog = std::fs::read_to_string(repo.path().join("CHANGELOG.md")).unwrap();
        assert!(changelog.contains("auto-release from run r1"));
    }
}
