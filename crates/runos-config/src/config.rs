// runos-config/src/config.rs
// ============================================================================
// Module: runos Configuration
// Description: TOML-based, fail-closed configuration loading and validation.
// Purpose: Resolve the data root, safe repo root, poll cadence, default
//          context budget, and registry seed data the CLI wires up at
//          startup.
// Dependencies: runos-core, serde, toml, thiserror
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with a strict size limit and
//! `deny_unknown_fields`: a config this crate does not recognize is rejected
//! rather than silently ignored. Every optional field has an explicit
//! default, so the absence of a config file (or an empty one) is itself a
//! valid, fully-specified configuration.

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use runos_core::model::ContextProfile;
use runos_core::model::Policy;
use runos_core::model::RegistrySeed;
use runos_core::model::git_to_prod_multi_graph;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "runos.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "RUNOS_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum total resolved config-path length.
pub const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Minimum accepted `poll_interval_ms`.
pub const MIN_POLL_INTERVAL_MS: u64 = 50;
/// Maximum accepted `poll_interval_ms`.
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
/// Default pending-queue poll cadence, matching
/// `original_source/app.py`'s `background_worker`.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
/// Default context-assembler token budget when no profile overrides it,
/// matching [`ContextProfile::default_budget_tokens`].
pub const DEFAULT_BUDGET_TOKENS: u64 = ContextProfile::default_budget_tokens();
/// Default durable event-journal and artifact root.
pub const DEFAULT_DATA_ROOT: &str = "./data";
/// Default safe repo root node handlers read and write through.
///
/// Relocated from `original_source`'s `examples/sample_repo` to
/// `demos/sample_repo`: this workspace's own `examples/` directory is
/// reserved read-only reference material, not a runtime data directory.
pub const DEFAULT_SAFE_ROOT: &str = "./demos/sample_repo";
/// Default test command the `tester` node's test capability invokes,
/// matching `original_source/tools/tests.py`'s own pytest invocation
/// (`python3 -m pytest -v --tb=short`) run with the safe root as its
/// working directory.
pub const DEFAULT_TEST_COMMAND: &[&str] = &["python3", "-m", "pytest", "-v", "--tb=short"];

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Top-level `runos` configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunosConfig {
    /// Durable root for per-run event journals and artifacts.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Safe root all file-capability operations are confined to.
    #[serde(default = "default_safe_root")]
    pub safe_root: PathBuf,
    /// Pending-queue poll cadence in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Default context-assembler token budget applied to the synthesized
    /// `reviewer-default` profile when the seed declares no profiles of its
    /// own.
    #[serde(default = "default_budget_tokens")]
    pub default_budget_tokens: u64,
    /// Program and arguments the `tester` node's test capability invokes,
    /// run with the safe root as its working directory. First element is
    /// the program name; the rest are its arguments.
    #[serde(default = "default_test_command")]
    pub test_command: Vec<String>,
    /// Process-wide registries to register at startup.
    #[serde(default)]
    pub seed: RegistrySeed,
}

impl Default for RunosConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            safe_root: default_safe_root(),
            poll_interval_ms: default_poll_interval_ms(),
            default_budget_tokens: default_budget_tokens(),
            test_command: default_test_command(),
            seed: RegistrySeed::default(),
        }
    }
}

impl RunosConfig {
    /// Loads configuration from disk using the default resolution rules:
    /// an explicit `path`, else [`CONFIG_ENV_VAR`], else [`DEFAULT_CONFIG_NAME`]
    /// in the current directory. A missing file at the resolved path is not
    /// an error — it yields [`RunosConfig::default`], so the engine still
    /// runs with sane defaults when the operator supplies no config at all.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a config file exists but cannot be read,
    /// exceeds [`MAX_CONFIG_FILE_SIZE`], is not valid UTF-8, fails to parse
    /// as TOML, or fails [`RunosConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        if !resolved.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes).map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates internal consistency: poll cadence bounds and non-empty
    /// root paths.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `poll_interval_ms` is outside
    /// `[MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS]`, or if `data_root` or
    /// `safe_root` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            )));
        }
        if self.data_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_root must be non-empty".to_string()));
        }
        if self.safe_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("safe_root must be non-empty".to_string()));
        }
        if self.test_command.is_empty() {
            return Err(ConfigError::Invalid("test_command must name at least a program".to_string()));
        }
        Ok(())
    }

    /// Returns the test command's program name and its arguments, split for
    /// [`runos_core::tools::ProcessTestCapability::new`]. Falls back to
    /// [`DEFAULT_TEST_COMMAND`] if `test_command` was somehow left empty
    /// (normally rejected by [`RunosConfig::validate`]).
    #[must_use]
    pub fn test_command_parts(&self) -> (&str, &[String]) {
        match self.test_command.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => ("python3", &[]),
        }
    }

    /// Returns the poll cadence as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the effective registry seed: the configured `seed`, with the
    /// built-in default `git-to-prod-multi` graph, `default` policy, and
    /// `reviewer-default` profile filled in for whichever of those three
    /// collections the config left empty. Provider pools have no built-in
    /// default — an empty pool list means the router always falls back to
    /// its own default rule.
    #[must_use]
    pub fn effective_seed(&self) -> RegistrySeed {
        let mut seed = self.seed.clone();
        if seed.graphs.is_empty() {
            seed.graphs.push(git_to_prod_multi_graph());
        }
        if seed.policies.is_empty() {
            seed.policies.push(Policy {
                name: "default".to_string(),
                max_cost_usd: Policy::default_max_cost_usd(),
                block_patterns: vec!["eval(".to_string()],
            });
        }
        if seed.profiles.is_empty() {
            seed.profiles.push(ContextProfile {
                name: "reviewer-default".to_string(),
                budget_tokens: self.default_budget_tokens,
                mounts: Vec::new(),
                selectors: Vec::new(),
                transforms: Vec::new(),
            });
        }
        seed
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading the config file.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn default_data_root() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_ROOT)
}

fn default_safe_root() -> PathBuf {
    PathBuf::from(DEFAULT_SAFE_ROOT)
}

const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

const fn default_budget_tokens() -> u64 {
    DEFAULT_BUDGET_TOKENS
}

fn default_test_command() -> Vec<String> {
    DEFAULT_TEST_COMMAND.iter().map(|part| (*part).to_string()).collect()
}

/// Resolves the config path from an explicit CLI argument, then
/// [`CONFIG_ENV_VAR`], then [`DEFAULT_CONFIG_NAME`] in the current
/// directory.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path's length, rejecting pathological inputs
/// before the file is ever opened.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    Ok(())
}
