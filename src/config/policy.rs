/// Security policy: the process-wide, immutable description of what a
/// submitted script may do.
///
/// Loaded once at startup and passed explicitly into the validator and the
/// execution engine. Never ambient, never mutated at request time, so the
/// pipeline stays testable with varying policies.
use crate::config::types::{ResourceCeilings, Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Module names a script may not import, matched on the root segment
    pub denied_modules: BTreeSet<String>,
    /// Callable names a script may not invoke, bare (`eval`) or dotted
    /// (`os.system`), matched lexically against the callee expression
    pub denied_calls: BTreeSet<String>,
    /// Name of the required top-level entry point
    pub entry_point: String,
    /// Interpreter the sandbox runs. The library surface available to
    /// scripts is whatever this interpreter image ships; the engine carries
    /// no hardcoded library list.
    pub interpreter: PathBuf,
    /// Resource ceilings applied to every execution
    pub ceilings: ResourceCeilings,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        let denied_modules = ["subprocess", "glob"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let denied_calls = [
            "eval",
            "exec",
            "__import__",
            "open",
            "file",
            "os.system",
            "os.listdir",
            "os.chdir",
            "glob.glob",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            denied_modules,
            denied_calls,
            entry_point: "main".to_string(),
            interpreter: PathBuf::from("/usr/bin/python3"),
            ceilings: ResourceCeilings::default(),
        }
    }
}

impl SecurityPolicy {
    /// Load a policy from a JSON document. Missing fields fall back to the
    /// defaults above.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let policy: SecurityPolicy = serde_json::from_str(raw)
            .map_err(|e| SandboxError::Policy(format!("invalid policy document: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a policy from a JSON file on disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Policy(format!("failed to read policy {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Fail fast on configurations that cannot be enforced.
    pub fn validate(&self) -> Result<()> {
        if self.entry_point.is_empty() {
            return Err(SandboxError::Policy(
                "entry point name must not be empty".to_string(),
            ));
        }
        if self.ceilings.wall_time_secs == 0 {
            return Err(SandboxError::Policy(
                "wall-clock ceiling must be non-zero".to_string(),
            ));
        }
        if self.ceilings.cpu_time_secs == 0 {
            return Err(SandboxError::Policy(
                "CPU-time ceiling must be non-zero".to_string(),
            ));
        }
        if self.ceilings.max_output_bytes == 0 {
            return Err(SandboxError::Policy(
                "output ceiling must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// True when importing `name` (or any submodule of it) is denied.
    pub fn is_denied_module(&self, name: &str) -> bool {
        let root = name.split('.').next().unwrap_or(name);
        self.denied_modules.contains(root) || self.denied_modules.contains(name)
    }

    /// True when calling the lexically resolved callee `name` is denied.
    pub fn is_denied_call(&self, name: &str) -> bool {
        self.denied_calls.contains(name)
    }
}
