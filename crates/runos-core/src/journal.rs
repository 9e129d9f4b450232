// runos-core/src/journal.rs
// ============================================================================
// Module: Event Journal
// Description: Append-only per-run event log: in-memory index plus a
//              durable line-delimited JSON file.
// Purpose: Source of truth for scheduling decisions and run history.
// Dependencies: serde_json, time, tokio
// ============================================================================

//! ## Overview
//! Emission is serialized per run (a `Mutex` per [`crate::model::RunId`]) but
//! proceeds freely across runs: a single-writer, many-reader log per run. A
//! second, coarser per-run lock (`node_execution_lock`) is held by the
//! executor across one whole node invocation, so concurrent fan-out
//! siblings still append their events one node at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::warn;

use crate::error::JournalWriteError;
use crate::model::Event;
use crate::model::RunId;

/// One run's in-memory event log plus its durable file handle.
struct RunLog {
    /// Ordered, never-mutated event history for this run.
    events: Vec<Event>,
    /// Append-mode handle to `<data_root>/<run_id>/events.jsonl`.
    file: File,
    /// Held by the executor for the full span of one node's
    /// `context_compiled` -> `node_done` sequence, so two fan-out siblings
    /// dispatched onto separate tasks never interleave their own emissions
    /// in the journal.
    exec_lock: Arc<AsyncMutex<()>>,
}

type RunLogHandle = Arc<AsyncMutex<RunLog>>;

/// Append-only per-run event log.
///
/// Cloning a [`Journal`] is cheap: it shares the same underlying run map via
/// [`Arc`], matching how [`crate::executor::Engine`] is threaded through
/// spawned tasks.
#[derive(Clone)]
pub struct Journal {
    data_root: PathBuf,
    runs: Arc<RwLock<HashMap<RunId, RunLogHandle>>>,
}

impl Journal {
    /// Opens (creating if absent) a journal rooted at `data_root`.
    #[must_use]
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the durable path for a run's event log directory.
    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.data_root.join(&run_id.0)
    }

    /// Ensures a run has a journal entry, creating the durable file on first
    /// use, and returns the shared handle for that run's log.
    async fn ensure_handle(&self, run_id: &RunId) -> Result<RunLogHandle, JournalWriteError> {
        if let Some(handle) = self.runs.read().await.get(run_id) {
            return Ok(handle.clone());
        }
        let mut guard = self.runs.write().await;
        if let Some(handle) = guard.get(run_id) {
            return Ok(handle.clone());
        }
        let dir = self.run_dir(run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| JournalWriteError::from_io(run_id.as_str(), &err))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("events.jsonl"))
            .await
            .map_err(|err| JournalWriteError::from_io(run_id.as_str(), &err))?;
        let handle: RunLogHandle = Arc::new(AsyncMutex::new(RunLog {
            events: Vec::new(),
            file,
            exec_lock: Arc::new(AsyncMutex::new(())),
        }));
        guard.insert(run_id.clone(), handle.clone());
        Ok(handle)
    }

    /// Returns the run's node-execution lock, creating its journal entry if
    /// this is the first node seen for the run. Callers acquire it (via
    /// [`Arc::lock_owned`]) for the duration of one node invocation's whole
    /// emission sequence, not just a single `emit` call.
    ///
    /// # Errors
    ///
    /// Returns [`JournalWriteError`] if the run directory or file cannot be
    /// created.
    pub async fn node_execution_lock(&self, run_id: &RunId) -> Result<Arc<AsyncMutex<()>>, JournalWriteError> {
        let handle = self.ensure_handle(run_id).await?;
        let log = handle.lock().await;
        Ok(log.exec_lock.clone())
    }

    /// Ensures a run has a (possibly empty) journal entry. Public so the
    /// supervisor can pre-create a run's log before the first `emit`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalWriteError`] if the run directory or file cannot be
    /// created.
    pub async fn ensure_run(&self, run_id: &RunId) -> Result<(), JournalWriteError> {
        self.ensure_handle(run_id).await.map(|_| ())
    }

    /// Appends one event, stamping a wall-clock timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`JournalWriteError`] only if the durable append fails after
    /// the in-memory append has already succeeded; the engine treats this as
    /// fatal for the run.
    pub async fn emit(
        &self,
        run_id: &RunId,
        step: &str,
        kind: &str,
        data: Value,
    ) -> Result<Event, JournalWriteError> {
        let handle = self.ensure_handle(run_id).await?;
        let mut log = handle.lock().await;
        let event = Event {
            run_id: run_id.clone(),
            step: step.to_string(),
            kind: kind.to_string(),
            ts: OffsetDateTime::now_utc(),
            data,
        };
        log.events.push(event.clone());
        let mut line = serde_json::to_vec(&event).unwrap_or_default();
        line.push(b'\n');
        if let Err(err) = log.file.write_all(&line).await {
            warn!(run_id = %run_id, step, kind, "durable journal append failed");
            return Err(JournalWriteError::from_io(run_id.as_str(), &err));
        }
        debug!(run_id = %run_id, step, kind, "event emitted");
        Ok(event)
    }

    /// Returns the current in-memory sequence for a run. Restartable,
    /// finite, and safe to call from any task. Returns an empty sequence for
    /// a run the journal has never seen.
    pub async fn read(&self, run_id: &RunId) -> Vec<Event> {
        if let Some(handle) = self.runs.read().await.get(run_id) {
            return handle.lock().await.events.clone();
        }
        Vec::new()
    }

    /// Returns events strictly preceding the first event whose `step` equals
    /// `step`. If no such event exists, returns the full sequence. Used by
    /// replay.
    pub async fn prefix_until(&self, run_id: &RunId, step: &str) -> Vec<Event> {
        let events = self.read(run_id).await;
        match events.iter().position(|event| event.step == step) {
            Some(index) => events[..index].to_vec(),
            None => events,
        }
    }

    /// Loads a run's durable journal file into the in-memory index if it is
    /// not already tracked by this process.
    ///
    /// Used by the CLI's one-shot `status`/`events`/`replay` commands, which
    /// run as fresh processes with no in-memory history of a run submitted by
    /// an earlier invocation: the durable `events.jsonl` file, not the
    /// in-memory index, is the actual source of truth across process
    /// restarts.
    ///
    /// A run this process already holds in memory (e.g. one it just
    /// executed) is left untouched — hydration never overwrites live state.
    ///
    /// # Errors
    ///
    /// Returns [`JournalWriteError`] if the durable file cannot be read, or
    /// if opening it for continued appends fails.
    pub async fn hydrate(&self, run_id: &RunId) -> Result<(), JournalWriteError> {
        if self.runs.read().await.contains_key(run_id) {
            return Ok(());
        }
        let path = self.run_dir(run_id).join("events.jsonl");
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(JournalWriteError::from_io(run_id.as_str(), &err)),
        };
        let events: Vec<Event> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        let handle = self.ensure_handle(run_id).await?;
        let mut log = handle.lock().await;
        if log.events.is_empty() {
            log.events = events;
        }
        Ok(())
    }

    /// Seeds a freshly created child run's journal with a copied prefix,
    /// writing each event to the child's durable file in order. Used by
    /// [`crate::supervisor::replay_from`].
    ///
    /// # Errors
    ///
    /// Returns [`JournalWriteError`] if the child's durable file cannot be
    /// created or written.
    pub async fn seed_prefix(
        &self,
        child_run_id: &RunId,
        prefix: Vec<Event>,
    ) -> Result<(), JournalWriteError> {
        let handle = self.ensure_handle(child_run_id).await?;
        let mut log = handle.lock().await;
        for mut event in prefix {
            event.run_id = child_run_id.clone();
            let mut line = serde_json::to_vec(&event).unwrap_or_default();
            line.push(b'\n');
            log.file
                .write_all(&line)
                .await
                .map_err(|err| JournalWriteError::from_io(child_run_id.as_str(), &err))?;
            log.events.push(event);
        }
        Ok(())
    }
}
