//! Context assembler budget-law property-based tests.
//!
//! ## Purpose
//! Testable property 5: for every `context_compiled` manifest,
//! `manifest.total_tokens <= profile.budget_tokens`, and `drops` is
//! non-empty whenever trimming occurred. Unit tests in
//! `runos_core::context` pin two concrete budgets; this suite sweeps a wide
//! range of budgets and mount sizes instead.
//!
//! ## What is covered
//! - Arbitrary budgets above the fixed-section floor never leave
//!   `total_tokens` above the configured budget.
//! - A large enough mounted file always forces a recorded drop.
//!
//! ## What is intentionally out of scope
//! - The exact wording of `drops` entries (covered by unit tests).
// crates/runos-core/tests/proptest_context_budget.rs
// ============================================================================
// Module: Context Assembler Budget Property-Based Tests
// Description: Sweeps arbitrary token budgets against the trim/drop policy.
// Purpose: Ensure the budget law holds for testable property 5.
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use runos_core::context;
use runos_core::context::ContextManifest;
use runos_core::journal::Journal;
use runos_core::model::ContextProfile;
use runos_core::model::Run;
use runos_core::model::RunId;
use runos_core::model::RunStatus;
use runos_core::tools::FileCapability;
use runos_core::tools::SandboxedFileCapability;
use serde_json::Value;
use time::OffsetDateTime;

fn run_blocking<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(fut)
}

/// Assembles context for a single-file run with `file_len` bytes mounted
/// under `budget_tokens`, returning only the manifest so proptest assertions
/// stay outside the async block.
fn assemble_manifest(run_id: &str, budget_tokens: u64, file_len: usize) -> ContextManifest {
    run_blocking(async move {
        let data_dir = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(data_dir.path());
        let files = SandboxedFileCapability::open(repo_dir.path()).unwrap();
        files.write("app.py", &"x".repeat(file_len)).unwrap();

        let run = Run {
            id: RunId::new(run_id),
            graph: "git-to-prod-multi".to_string(),
            inputs: Value::Null,
            status: RunStatus::Running,
            created_at: OffsetDateTime::now_utc(),
            parent_run: None,
        };
        journal.ensure_run(&run.id).await.unwrap();
        let profile = ContextProfile {
            name: "sweep".to_string(),
            budget_tokens,
            mounts: vec!["app.py".to_string()],
            selectors: Vec::new(),
            transforms: Vec::new(),
        };

        context::assemble(&run, &profile, None, &journal, &files).await.manifest
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

    // `budget_tokens` starts at 50: low enough to force trimming for most
    // `file_len` draws, but comfortably above the floor cost of the
    // never-trimmed `scratchpad` and `policy_docs` sections (a handful of
    // tokens each with an empty event history and no policy), so the budget
    // law is never tested against a budget the fixed sections alone exceed.
    #[test]
    fn total_tokens_never_exceeds_a_budget_above_the_fixed_section_floor(
        budget_tokens in 50u64..2_000,
        file_len in 0usize..4_000,
    ) {
        let manifest = assemble_manifest("budget-sweep", budget_tokens, file_len);
        prop_assert!(manifest.total_tokens <= budget_tokens);
    }

    #[test]
    fn a_large_enough_mount_always_forces_a_recorded_drop(
        file_len in 1_000usize..4_000,
    ) {
        let manifest = assemble_manifest("budget-sweep-drop", 50, file_len);
        prop_assert!(!manifest.drops.is_empty());
        prop_assert!(manifest.total_tokens <= 50);
    }
}
