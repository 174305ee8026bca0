/// Core types and error taxonomy for the scriptbox pipeline
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric resource ceilings enforced on every execution.
///
/// Loaded once at process start as part of the security policy and copied
/// verbatim into each per-request sandbox configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCeilings {
    /// Peak address-space limit in bytes
    pub memory_bytes: u64,
    /// CPU time limit in seconds
    pub cpu_time_secs: u64,
    /// Wall-clock limit in seconds, enforced by the watchdog
    pub wall_time_secs: u64,
    /// Maximum captured stdout bytes; output beyond this is truncated
    pub max_output_bytes: u64,
}

impl Default for ResourceCeilings {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024,
            cpu_time_secs: 10,
            wall_time_secs: 30,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Infrastructure failures of the sandbox itself.
///
/// These are never shown to the submitting user in detail; the pipeline logs
/// them and returns a generic internal error. User-visible failure modes
/// (rejection, timeout, crash, violation) are data, not errors; see
/// [`crate::outcome::ExecutionOutcome`].
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Scratch directory error: {0}")]
    Scratch(String),

    #[error("Failed to spawn sandboxed interpreter: {0}")]
    Spawn(String),

    #[error("Harness error: {0}")]
    Harness(String),

    #[error("Output collection error: {0}")]
    Collection(String),
}

impl From<nix::errno::Errno> for SandboxError {
    fn from(err: nix::errno::Errno) -> Self {
        SandboxError::Spawn(err.to_string())
    }
}

/// Result type alias for scriptbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
