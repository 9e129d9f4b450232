// runos-config/src/lib.rs
// ============================================================================
// Module: runos Config Library
// Description: Canonical configuration model and fail-closed validation.
// Purpose: Single source of truth for `runos.toml` semantics.
// Dependencies: runos-core, serde, toml, thiserror
// ============================================================================

//! ## Overview
//! `runos-config` defines the configuration surface the CLI loads at
//! startup: the data root, safe repo root, pending-queue poll cadence,
//! default context budget, and registry seed data. Loading is strict and
//! fail-closed throughout this workspace's config crate.

pub mod config;

pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::DEFAULT_BUDGET_TOKENS;
pub use config::DEFAULT_CONFIG_NAME;
pub use config::DEFAULT_DATA_ROOT;
pub use config::DEFAULT_POLL_INTERVAL_MS;
pub use config::DEFAULT_SAFE_ROOT;
pub use config::MAX_CONFIG_FILE_SIZE;
pub use config::MAX_POLL_INTERVAL_MS;
pub use config::MAX_TOTAL_PATH_LENGTH;
pub use config::MIN_POLL_INTERVAL_MS;
pub use config::RunosConfig;
