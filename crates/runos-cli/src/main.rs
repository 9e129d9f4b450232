#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::print_stdout,
        reason = "Test-only output and assertions are permitted."
    )
)]
// Non-test output goes through write_stdout_line/write_stderr_line
// (std::io::Write, not the print!/println! macros) so clippy::print_stdout
// stays denied outside tests.
// runos-cli/src/main.rs
// ============================================================================
// Module: runos CLI Entry Point
// Description: Command dispatcher exercising the run engine without the
//              (out-of-scope) HTTP control plane.
// Purpose: Submit runs, inspect their journals, replay from a step, and
//          drain the pending queue, all against one configured engine.
// Dependencies: clap, runos-config, runos-core, serde_json, thiserror, tokio,
//               tracing, tracing-subscriber.
// ============================================================================

//! ## Overview
//! `runos` is the non-HTTP way to exercise [`runos_core`]'s run engine. Five
//! subcommands cover the engine's external surface: `run` submits a graph
//! and drains it to completion in-process, `status`/`events` inspect a run's
//! durable journal, `replay` spawns a child run from an event prefix, and
//! `serve` runs the pending-queue supervisor forever as a background
//! worker. `status`/`events`/`replay` operate on a fresh process with no
//! memory of a run created by an earlier `run` invocation, so they
//! reconstruct what they need (graph name, coarse status) from the durable
//! event journal rather than from the in-memory run store a long-lived
//! `serve` process would keep.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use runos_config::ConfigError;
use runos_config::RunosConfig;
use runos_core::error::EngineError;
use runos_core::executor::Capabilities;
use runos_core::executor::Engine;
use runos_core::journal::Journal;
use runos_core::model::Event;
use runos_core::model::Run;
use runos_core::model::RunId;
use runos_core::model::RunStatus;
use runos_core::registry::Registries;
use runos_core::registry::RunStore;
use runos_core::supervisor::Supervisor;
use runos_core::tools::ProcessTestCapability;
use runos_core::tools::SandboxedFileCapability;
use runos_core::tools::SubstringSecurityCapability;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "runos", arg_required_else_help = true)]
struct Cli {
    /// Optional config file path (defaults to `runos.toml` or the
    /// `RUNOS_CONFIG` environment variable).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a run and drain it to completion in this process.
    Run(RunCommand),
    /// Print a run's coarse status, reconstructed from its journal.
    Status(RunIdArg),
    /// Print a run's full event history as a JSON array.
    Events(RunIdArg),
    /// Replay a run from a named step.
    Replay(ReplayCommand),
    /// Drain the pending-run queue forever (the background worker).
    Serve,
}

/// Arguments shared by `status` and `events`.
#[derive(Args, Debug)]
struct RunIdArg {
    /// Run id to inspect.
    #[arg(long = "run-id", value_name = "ID")]
    run_id: String,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
struct RunCommand {
    /// Registered graph name to execute.
    #[arg(long, value_name = "NAME")]
    graph: String,
    /// Opaque run inputs as a JSON object.
    #[arg(long, value_name = "JSON", default_value = "{}")]
    inputs: String,
}

/// Arguments for `replay`.
#[derive(Args, Debug)]
struct ReplayCommand {
    /// Parent run id to replay.
    #[arg(long = "run-id", value_name = "ID")]
    run_id: String,
    /// Node name to replay from.
    #[arg(long = "from-step", value_name = "STEP")]
    from_step: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Top-level CLI failure, printed to stderr with a non-zero exit.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The engine reported an infrastructural failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// `--inputs` was not valid JSON.
    #[error("--inputs must be a JSON object: {0}")]
    InvalidInputs(serde_json::Error),
    /// The safe root or data root could not be opened.
    #[error("failed to open {kind} at {path}: {source}")]
    RootUnavailable {
        /// Which root failed to open.
        kind: &'static str,
        /// The path that could not be opened.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The named run was not found in its durable journal.
    #[error("run not found: {0}")]
    RunNotFound(String),
    /// Writing to stdout failed.
    #[error("failed to write output: {0}")]
    Output(std::io::Error),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = write_stderr_line(&format!("failed to start tokio runtime: {err}"));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(code) => code,
        Err(err) => {
            let _ = write_stderr_line(&format!("error: {err}"));
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    let config = RunosConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => cmd_run(&config, args).await,
        Commands::Status(args) => cmd_status(&config, &args.run_id).await,
        Commands::Events(args) => cmd_events(&config, &args.run_id).await,
        Commands::Replay(args) => cmd_replay(&config, args).await,
        Commands::Serve => cmd_serve(&config).await,
    }
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

/// Builds an [`Engine`] plus [`RunStore`] from a loaded config, registering
/// the effective seed.
async fn build_engine(config: &RunosConfig) -> Result<(Engine, RunStore), CliError> {
    let files = SandboxedFileCapability::open(&config.safe_root).map_err(|source| CliError::RootUnavailable {
        kind: "safe root",
        path: config.safe_root.clone(),
        source,
    })?;
    let scan_files = SandboxedFileCapability::open(&config.safe_root).map_err(|source| CliError::RootUnavailable {
        kind: "safe root",
        path: config.safe_root.clone(),
        source,
    })?;

    let registries = Registries::new();
    registries.load_seed(config.effective_seed()).await;
    let block_patterns = registries
        .policy("default")
        .await
        .map(|policy| policy.block_patterns)
        .unwrap_or_else(|| vec!["eval(".to_string()]);
    let security = SubstringSecurityCapability::new(scan_files, block_patterns, vec!["app.py".to_string()]);
    let (test_program, test_args) = config.test_command_parts();
    let tests = ProcessTestCapability::new(&config.safe_root, test_program, test_args.to_vec());

    let journal = Journal::new(&config.data_root);
    let engine = Engine::new(
        journal,
        registries,
        Capabilities {
            files: Arc::new(files),
            tests: Arc::new(tests),
            security: Arc::new(security),
        },
    );
    Ok((engine, RunStore::new()))
}

// ============================================================================
// SECTION: Commands
// ============================================================================

async fn cmd_run(config: &RunosConfig, args: RunCommand) -> Result<ExitCode, CliError> {
    let inputs: Value = serde_json::from_str(&args.inputs).map_err(CliError::InvalidInputs)?;
    let (engine, run_store) = build_engine(config).await?;
    let supervisor = Supervisor::new(engine.clone(), run_store.clone(), config.poll_interval());

    let run_id = supervisor.submit_run(args.graph, inputs).await?;
    loop {
        supervisor.run_once().await;
        let run = run_store.get(&run_id).await.ok_or_else(|| CliError::RunNotFound(run_id.to_string()))?;
        if run.status == RunStatus::Succeeded || run.status == RunStatus::Failed {
            print_run_summary(&engine, &run).await?;
            return Ok(if run.status == RunStatus::Succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE });
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

async fn cmd_status(config: &RunosConfig, run_id: &str) -> Result<ExitCode, CliError> {
    let (engine, _run_store) = build_engine(config).await?;
    let run_id = RunId::new(run_id);
    let events = hydrate_events(&engine.journal, &run_id).await?;
    let run = reconstruct_run(&run_id, &events);
    write_stdout_line(&run_status_json(&run, events.len())).map_err(CliError::Output)?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_events(config: &RunosConfig, run_id: &str) -> Result<ExitCode, CliError> {
    let (engine, _run_store) = build_engine(config).await?;
    let run_id = RunId::new(run_id);
    let events = hydrate_events(&engine.journal, &run_id).await?;
    let rendered: Vec<Value> = events
        .iter()
        .map(|e| json!({"run_id": e.run_id.as_str(), "step": e.step, "type": e.kind, "ts": e.ts.to_string(), "data": e.data}))
        .collect();
    let rendered = serde_json::to_string_pretty(&rendered).unwrap_or_default();
    write_stdout_line(&rendered).map_err(CliError::Output)?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_replay(config: &RunosConfig, args: ReplayCommand) -> Result<ExitCode, CliError> {
    let (engine, run_store) = build_engine(config).await?;
    let parent_id = RunId::new(&args.run_id);
    let events = hydrate_events(&engine.journal, &parent_id).await?;
    let parent = reconstruct_run(&parent_id, &events);
    run_store.put(parent).await;

    let supervisor = Supervisor::new(engine.clone(), run_store.clone(), config.poll_interval());
    let child_id = supervisor.replay_from(&parent_id, &args.from_step).await?;
    let child = run_store.get(&child_id).await.ok_or_else(|| CliError::RunNotFound(child_id.to_string()))?;
    print_run_summary(&engine, &child).await?;
    Ok(if child.status == RunStatus::Succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn cmd_serve(config: &RunosConfig) -> Result<ExitCode, CliError> {
    let (engine, run_store) = build_engine(config).await?;
    let supervisor = Supervisor::new(engine, run_store, config.poll_interval());
    tracing::info!(poll_interval_ms = config.poll_interval_ms, "serve: draining pending runs forever");
    let worker = tokio::spawn(async move { supervisor.run_forever().await });
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            worker.abort();
            write_stdout_line("shutting down").map_err(CliError::Output)?;
            Ok(ExitCode::SUCCESS)
        }
        result = worker => {
            match result {
                Ok(_never) => Ok(ExitCode::SUCCESS),
                Err(_aborted) => Ok(ExitCode::SUCCESS),
            }
        }
    }
}

// ============================================================================
// SECTION: Reconstruction Helpers
// ============================================================================

/// Loads `run_id`'s durable event history into the journal's in-memory
/// index, then returns it.
async fn hydrate_events(journal: &Journal, run_id: &RunId) -> Result<Vec<Event>, CliError> {
    journal.hydrate(run_id).await.map_err(EngineError::from)?;
    let events = journal.read(run_id).await;
    if events.is_empty() && !journal.run_dir(run_id).join("events.jsonl").exists() {
        return Err(CliError::RunNotFound(run_id.to_string()));
    }
    Ok(events)
}

/// Reconstructs a best-effort [`Run`] record from a run's durable events:
/// the graph name (from the `system`/`run_started` event), a coarse status
/// derived from the terminal system event present, and `created_at` from the
/// first event's timestamp. `inputs` and `parent_run` are not recoverable
/// from the journal alone and are left at their defaults.
fn reconstruct_run(run_id: &RunId, events: &[Event]) -> Run {
    let graph = events
        .iter()
        .find(|e| e.step == "system" && e.kind == "run_started")
        .and_then(|e| e.data.get("graph"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let status = if events.iter().any(|e| e.step == "system" && e.kind == "run_completed") {
        RunStatus::Succeeded
    } else if events.iter().any(|e| e.step == "system" && e.kind == "run_failed") {
        RunStatus::Failed
    } else if events.is_empty() {
        RunStatus::Pending
    } else {
        RunStatus::Running
    };
    let created_at = events.first().map_or_else(OffsetDateTime::now_utc, |e| e.ts);
    Run {
        id: run_id.clone(),
        graph,
        inputs: Value::Null,
        status,
        created_at,
        parent_run: None,
    }
}

fn run_status_json(run: &Run, event_count: usize) -> String {
    let value = json!({
        "run_id": run.id.as_str(),
        "graph": run.graph,
        "status": match run.status {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        },
        "event_count": event_count,
    });
    serde_json::to_string_pretty(&value).unwrap_or_default()
}

async fn print_run_summary(engine: &Engine, run: &Run) -> Result<(), CliError> {
    let events = engine.journal.read(&run.id).await;
    write_stdout_line(&run_status_json(run, events.len())).map_err(CliError::Output)
}

/// Writes `line` plus a trailing newline to stdout, flushing immediately.
/// The only sanctioned way non-test code in this crate produces stdout
/// output, so `clippy::print_stdout` stays denied outside tests.
fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()
}

/// Writes `line` plus a trailing newline to stderr, flushing immediately.
fn write_stderr_line(line: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr().lock();
    writeln!(stderr, "{line}")?;
    stderr.flush()
}

/// Validates a node name is known to [`runos_core::scheduler::validate_graph`]'s
/// executor dispatch table; kept alive here only to assert the CLI and
/// `runos-core` agree on the set of handler-backed node names as this crate
/// evolves, since the CLI never dispatches nodes itself.
#[cfg(test)]
fn _assert_known_node_names_are_stable() {
    let graph = runos_core::model::git_to_prod_multi_graph();
    assert!(runos_core::scheduler::validate_graph(&graph).is_ok());
}
