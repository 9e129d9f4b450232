// runos-core/src/tools/mod.rs
// ============================================================================
// Module: Tool Capabilities
// Description: Sandboxed file I/O, a test runner, and a security scanner.
// Purpose: The three capability interfaces the core consumes synchronously.
// Dependencies: cap-std (files.rs), tokio::process (tests.rs)
// ============================================================================

//! ## Overview
//! Each capability is a narrow trait. Implementers are free to back them
//! with any transport; the engine only ever calls through the trait object.
//! All three are synchronous from the engine's standpoint — the node
//! executor hands blocking work (the test runner's subprocess) to
//! [`tokio::task::spawn_blocking`] rather than requiring the traits
//! themselves to be `async`.

pub mod files;
pub mod security;
pub mod tests;

pub use files::FileCapability;
pub use files::FileRead;
pub use files::FileWriteOutcome;
pub use files::SandboxedFileCapability;
pub use security::SecurityCapability;
pub use security::SecurityScanOutcome;
pub use security::SubstringSecurityCapability;
pub use tests::ProcessTestCapability;
pub use tests::TestCapability;
pub use tests::TestRunOutcome;
