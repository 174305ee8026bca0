/// Per-request scratch directory, the only writable filesystem area visible
/// to a sandboxed script. Created fresh for each execution and removed
/// unconditionally on every exit path.
use crate::config::types::{Result, SandboxError};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Guard over a request-scoped scratch directory.
///
/// Cleanup is idempotent and also runs on drop, so timeout and crash paths
/// cannot leak disk.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create the scratch directory at the path chosen by the sandbox config.
    pub fn create(path: &Path) -> Result<Self> {
        fs::create_dir_all(path).map_err(|e| {
            SandboxError::Scratch(format!("failed to create {}: {}", path.display(), e))
        })?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| {
            SandboxError::Scratch(format!("failed to restrict {}: {}", path.display(), e))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a file into the scratch directory and return its full path.
    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let file_path = self.path.join(name);
        fs::write(&file_path, contents).map_err(|e| {
            SandboxError::Scratch(format!("failed to write {}: {}", file_path.display(), e))
        })?;
        Ok(file_path)
    }

    /// Read a file from the scratch directory if it exists.
    pub fn read_file(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.path.join(name)).ok()
    }

    /// Remove the scratch directory tree. Idempotent.
    pub fn cleanup(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_dir_all(&self.path).map_err(|e| {
                SandboxError::Scratch(format!("failed to remove {}: {}", self.path.display(), e))
            })?;
        }
        Ok(())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::warn!("scratch cleanup failed: {}", e);
        }
    }
}
