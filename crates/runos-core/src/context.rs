// runos-core/src/context.rs
// ============================================================================
// Module: Context Assembler
// Description: Builds a per-invocation context bundle and token-budget
//              manifest from a run's event history, a context profile, and
//              the file capability.
// Purpose: Give every node invocation a bounded, provenance-preserving view
//          of recent history and repo content before it runs.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Token estimation is a fixed heuristic (`⌈serialized_bytes / 4⌉`), never a
//! real tokenizer call, kept deterministic so budget enforcement stays
//! reproducible across replays. Budget
//! enforcement trims, then drops, `repo_snippets` only; `scratchpad` and
//! `policy_docs` are never trimmed, preserving provenance of recent history
//! and policy context even under a starved budget.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::model::ContextProfile;
use crate::model::Event;
use crate::model::Policy;
use crate::model::Run;
use crate::tools::FileCapability;
use crate::tools::FileRead;

/// How many trailing events the scratchpad section projects.
const SCRATCHPAD_DEPTH: usize = 5;

/// One entry of the scratchpad projection: a thin view over a journal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    /// Node name (or `"system"`) that produced the source event.
    pub step: String,
    /// Event type of the source event.
    #[serde(rename = "type")]
    pub kind: String,
    /// Source event's payload, carried through unchanged.
    pub data: Value,
}

/// Policy summary handed to the node, not the full [`Policy`] record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocs {
    /// Human-readable note describing the active policy posture.
    pub note: String,
    /// Substrings the active policy blocks.
    pub patterns_blocked: Vec<String>,
}

/// The data supplied to a node handler prior to execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Projection of up to the last [`SCRATCHPAD_DEPTH`] events.
    pub scratchpad: Vec<ScratchpadEntry>,
    /// Repo-relative file contents named by the profile's mounts. Normally a
    /// JSON object keyed by path; becomes a single truncated string once the
    /// budget policy trims it.
    pub repo_snippets: Value,
    /// Summary of the active policy.
    pub policy_docs: PolicyDocs,
}

/// Per-section token estimate recorded in a [`ContextManifest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionManifest {
    /// Estimated token count for this section after any trimming.
    pub token_estimate: u64,
}

/// Summary of a context bundle's sections, token estimates, and drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextManifest {
    /// Per-section token estimates, keyed by section name.
    pub sections: HashMap<String, SectionManifest>,
    /// Sum of section estimates after budget enforcement.
    pub total_tokens: u64,
    /// Human-readable record of any forced drops, empty if none occurred.
    pub drops: Vec<String>,
}

/// The full result of one context-assembly call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextOutput {
    /// The bundle itself, handed to the node handler.
    pub bundle: ContextBundle,
    /// The manifest describing budget usage.
    pub manifest: ContextManifest,
}

/// Estimates tokens for `value` as the ceiling of its serialized byte length
/// divided by four.
fn estimate_tokens<T: Serialize>(value: &T) -> u64 {
    let serialized = serde_json::to_string(value).unwrap_or_default();
    (serialized.len() as u64).div_ceil(4)
}

/// Keeps the first `max_chars` characters of `text`, respecting UTF-8 char
/// boundaries.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Builds the scratchpad projection: up to the last [`SCRATCHPAD_DEPTH`]
/// events, in original order.
fn build_scratchpad(events: &[Event]) -> Vec<ScratchpadEntry> {
    let start = events.len().saturating_sub(SCRATCHPAD_DEPTH);
    events[start..]
        .iter()
        .map(|event| ScratchpadEntry {
            step: event.step.clone(),
            kind: event.kind.clone(),
            data: event.data.clone(),
        })
        .collect()
}

/// Mount set used when a profile names no `mounts` of its own, matching the
/// distilled system's own hardcoded default (`app.py` and its test file).
const DEFAULT_MOUNTS: &[&str] = &["app.py", "tests/test_app.py"];

/// Builds the repo snippets section from the profile's `mounts`, falling
/// back to [`DEFAULT_MOUNTS`] when the profile names none. A mount that does
/// not exist under the safe root is silently omitted — the assembler
/// reports what it found, not what was asked for.
fn build_repo_snippets(profile: &ContextProfile, files: &dyn FileCapability) -> Value {
    let mut snippets = serde_json::Map::new();
    let mounts: Vec<&str> = if profile.mounts.is_empty() {
        DEFAULT_MOUNTS.to_vec()
    } else {
        profile.mounts.iter().map(String::as_str).collect()
    };
    for mount in mounts {
        if let Ok(FileRead::Found { content, .. }) = files.read(mount) {
            snippets.insert(mount.to_string(), Value::String(content));
        }
    }
    Value::Object(snippets)
}

/// Builds the policy docs section from the graph's active policy, falling
/// back to a default note and an empty blocked-pattern set when no policy
/// is attached.
fn build_policy_docs(policy: Option<&Policy>) -> PolicyDocs {
    match policy {
        Some(policy) => PolicyDocs {
            note: "policy enforcement active".to_string(),
            patterns_blocked: policy.block_patterns.clone(),
        },
        None => PolicyDocs {
            note: "policy enforcement active".to_string(),
            patterns_blocked: vec!["eval(".to_string()],
        },
    }
}

/// Assembles a context bundle and manifest for one node invocation.
///
/// Reads `run`'s event history directly from `journal`, so callers need not
/// pre-fetch it. Enforces `profile.budget_tokens` by trimming, then
/// dropping, `repo_snippets`; `scratchpad` and `policy_docs` are never
/// trimmed.
pub async fn assemble(
    run: &Run,
    profile: &ContextProfile,
    policy: Option<&Policy>,
    journal: &crate::journal::Journal,
    files: &dyn FileCapability,
) -> ContextOutput {
    let events = journal.read(&run.id).await;
    let scratchpad = build_scratchpad(&events);
    let mut repo_snippets = build_repo_snippets(profile, files);
    let policy_docs = build_policy_docs(policy);

    let scratchpad_tokens = estimate_tokens(&scratchpad);
    let mut repo_tokens = estimate_tokens(&repo_snippets);
    let policy_tokens = estimate_tokens(&policy_docs);

    let mut total = scratchpad_tokens + repo_tokens + policy_tokens;
    let mut drops = Vec::new();

    if total > profile.budget_tokens {
        let trim = total - profile.budget_tokens;
        if repo_tokens > trim {
            let new_repo_tokens = repo_tokens - trim;
            let max_chars = (new_repo_tokens * 4) as usize;
            let serialized = serde_json::to_string(&repo_snippets).unwrap_or_default();
            let char_count = serialized.chars().count();
            if char_count > max_chars {
                drops.push(format!("repo_snippets trimmed by {} chars", char_count - max_chars));
                repo_snippets = Value::String(truncate_chars(&serialized, max_chars));
            }
            repo_tokens = new_repo_tokens;
            total = profile.budget_tokens;
        } else {
            drops.push("repo_snippets dropped entirely".to_string());
            repo_snippets = Value::Object(serde_json::Map::new());
            repo_tokens = 0;
            total = scratchpad_tokens + policy_tokens;
        }
    }

    let mut sections = HashMap::new();
    sections.insert("scratchpad".to_string(), SectionManifest { token_estimate: scratchpad_tokens });
    sections.insert("repo_snippets".to_string(), SectionManifest { token_estimate: repo_tokens });
    sections.insert("policy_docs".to_string(), SectionManifest { token_estimate: policy_tokens });

    ContextOutput {
        bundle: ContextBundle {
            scratchpad,
            repo_snippets,
            policy_docs,
        },
        manifest: ContextManifest {
            sections,
            total_tokens: total,
            drops,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup and assertion clarity.")]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use crate::model::RunId;
    use crate::model::RunStatus;
    use crate::tools::SandboxedFileCapability;
    use time::OffsetDateTime;

    fn test_run(id: &str) -> Run {
        Run {
            id: RunId::new(id),
            graph: "git-to-prod-multi".to_string(),
            inputs: Value::Null,
            status: RunStatus::Running,
            created_at: OffsetDateTime::now_utc(),
            parent_run: None,
        }
    }

    #[tokio::test]
    async fn within_budget_needs_no_drops() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("data"));
        let files = SandboxedFileCapability::open(dir.path().join("repo")).unwrap();
        let run = test_run("r1");
        journal.ensure_run(&run.id).await.unwrap();
        let profile = ContextProfile {
            name: "reviewer-default".to_string(),
            budget_tokens: 120_000,
            mounts: Vec::new(),
            selectors: Vec::new(),
            transforms: Vec::new(),
        };
        let out = assemble(&run, &profile, None, &journal, &files).await;
        assert!(out.manifest.drops.is_empty());
        assert!(out.manifest.total_tokens <= profile.budget_tokens);
    }

    #[tokio::test]
    async fn tiny_budget_forces_a_trim_and_caps_total() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("data"));
        let files = SandboxedFileCapability::open(dir.path().join("repo")).unwrap();
        // Large enough that repo_tokens comfortably exceeds the trim amount,
        // landing in the partial-trim branch rather than the drop-entirely
        // branch (whose recomputed total is only bounded by scratchpad +
        // policy_docs, not by the budget — see proptest_context_budget.rs).
        files.write("app.py", &"x".repeat(2_000)).unwrap();
        let run = test_run("r2");
        journal.ensure_run(&run.id).await.unwrap();
        journal
            .emit(&run.id, "planner", "plan_ready", serde_json::json!({"target_files": ["app.py"]}))
            .await
            .unwrap();
        let profile = ContextProfile {
            name: "reviewer-default".to_string(),
            budget_tokens: 100,
            mounts: vec!["app.py".to_string()],
            selectors: Vec::new(),
            transforms: Vec::new(),
        };
        let out = assemble(&run, &profile, None, &journal, &files).await;
        assert!(out.manifest.drops.iter().any(|d| d.contains("trimmed")));
        assert_eq!(out.manifest.total_tokens, profile.budget_tokens);
    }

    #[tokio::test]
    async fn scratchpad_keeps_only_the_last_five_events_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("data"));
        let files = SandboxedFileCapability::open(dir.path().join("repo")).unwrap();
        let run = test_run("r3");
        journal.ensure_run(&run.id).await.unwrap();
        for i in 0..8u32 {
            journal
                .emit(&run.id, "planner", "plan_ready", serde_json::json!({"i": i}))
                .await
                .unwrap();
        }
        let profile = ContextProfile {
            name: "reviewer-default".to_string(),
            budget_tokens: 120_000,
            mounts: Vec::new(),
            selectors: Vec::new(),
            transforms: Vec::new(),
        };
        let out = assemble(&run, &profile, None, &journal, &files).await;
        assert_eq!(out.bundle.scratchpad.len(), SCRATCHPAD_DEPTH);
        assert_eq!(out.bundle.scratchpad.first().unwrap().data["i"], 3);
        assert_eq!(out.bundle.scratchpad.last().unwrap().data["i"], 7);
    }
}
