// runos-core/src/tools/files.rs
// ============================================================================
// Module: File Capability
// Description: Sandboxed file read/write confined to a configured safe root.
// Purpose: The only way node handlers touch the filesystem.
// Dependencies: cap-std
// ============================================================================

//! ## Overview
//! Escape checks happen twice: a fast syntactic rejection of absolute paths
//! and `..` components (covering the literal `../../etc/passwd` case), then
//! [`cap_std::fs::Dir`], which confines even symlink-based escapes to the
//! directory it was opened on. Any I/O failure that is not a plain "file not
//! found" is folded into [`PathEscapeError`] — the capability's contract
//! only distinguishes "missing file" (a read outcome) from "escape or other
//! denial" (a fatal error), so unexpected I/O failures are treated with the
//! same severity as a deliberate escape attempt.

use std::io;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use cap_std::ambient_authority;
use cap_std::fs::Dir;

use crate::error::PathEscapeError;

/// Outcome of a file-capability read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRead {
    /// The file exists and was read in full.
    Found {
        /// File contents.
        content: String,
        /// The path as requested.
        path: String,
    },
    /// The file does not exist under the safe root.
    NotFound {
        /// Human-readable explanation.
        error: String,
    },
}

/// Outcome of a file-capability write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWriteOutcome {
    /// Always `true`; the type exists so call sites read like a
    /// `{ok, path, bytes}` record.
    pub ok: bool,
    /// The path as requested.
    pub path: String,
    /// Number of bytes written.
    pub bytes: usize,
}

/// Sandboxed file read/write, confined to a safe root.
pub trait FileCapability: Send + Sync {
    /// Reads `path`, relative to the safe root.
    ///
    /// # Errors
    ///
    /// Returns [`PathEscapeError`] if `path` resolves outside the safe root.
    fn read(&self, path: &str) -> Result<FileRead, PathEscapeError>;

    /// Writes `content` to `path`, relative to the safe root, creating
    /// parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`PathEscapeError`] if `path` resolves outside the safe root.
    fn write(&self, path: &str, content: &str) -> Result<FileWriteOutcome, PathEscapeError>;
}

/// Rejects absolute paths and any `..` component before the path ever
/// reaches the capability-confined directory handle.
fn reject_escaping_path(path: &str) -> Result<(), PathEscapeError> {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(PathEscapeError(path.to_string()));
    }
    for component in candidate.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathEscapeError(path.to_string()));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

/// [`FileCapability`] backed by a `cap-std` directory handle opened once on
/// the configured safe root.
pub struct SandboxedFileCapability {
    root: Dir,
    safe_root: PathBuf,
}

impl SandboxedFileCapability {
    /// Opens `safe_root`, creating it if it does not yet exist.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `safe_root` cannot be created or opened.
    pub fn open(safe_root: impl Into<PathBuf>) -> io::Result<Self> {
        let safe_root = safe_root.into();
        std::fs::create_dir_all(&safe_root)?;
        let root = Dir::open_ambient_dir(&safe_root, ambient_authority())?;
        Ok(Self { root, safe_root })
    }

    /// Returns the safe root this capability is confined to.
    #[must_use]
    pub fn safe_root(&self) -> &Path {
        &self.safe_root
    }
}

impl FileCapability for SandboxedFileCapability {
    fn read(&self, path: &str) -> Result<FileRead, PathEscapeError> {
        reject_escaping_path(path)?;
        match self.root.read_to_string(path) {
            Ok(content) => Ok(FileRead::Found {
                content,
                path: path.to_string(),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(FileRead::NotFound {
                error: format!("file not found: {path}"),
            }),
            Err(err) => Err(PathEscapeError(format!("{path}: {err}"))),
        }
    }

    fn write(&self, path: &str, content: &str) -> Result<FileWriteOutcome, PathEscapeError> {
        reject_escaping_path(path)?;
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            self.root
                .create_dir_all(parent)
                .map_err(|err| PathEscapeError(format!("{path}: {err}")))?;
        }
        self.root
            .write(path, content.as_bytes())
            .map_err(|err| PathEscapeError(format!("{path}: {err}")))?;
        Ok(FileWriteOutcome {
            ok: true,
            path: path.to_string(),
            bytes: content.len(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup and assertion clarity.")]
mod tests {
    use super::*;

    #[test]
    fn read_missing_file_is_not_found_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cap = SandboxedFileCapability::open(dir.path()).unwrap();
        let outcome = cap.read("nope.txt").unwrap();
        assert!(matches!(outcome, FileRead::NotFound { .. }));
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cap = SandboxedFileCapability::open(dir.path()).unwrap();
        cap.write("nested/app.py", "return 41").unwrap();
        let outcome = cap.read("nested/app.py").unwrap();
        assert!(matches!(outcome, FileRead::Found { content, .. } if content == "return 41"));
    }

    #[test]
    fn dotdot_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cap = SandboxedFileCapability::open(dir.path()).unwrap();
        let result = cap.read("../../etc/passwd");
        assert!(result.is_err());
    }

    #[test]
    fn absolute_path_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cap = SandboxedFileCapability::open(dir.path()).unwrap();
        let result = cap.write("/etc/passwd", "pwned");
        assert!(result.is_err());
    }
}
