/// Per-request sandbox configuration, derived from the security policy.
///
/// Building a config is pure and deterministic except for the scratch
/// directory path, which is unique per request so no file state can leak
/// between submissions. Configs are never cached or shared.
use crate::config::policy::SecurityPolicy;
use crate::config::types::ResourceCeilings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Namespace isolation flags for the primary strategy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceFlags {
    /// Isolate the PID space
    pub pid: bool,
    /// Isolate the mount table
    pub mount: bool,
    /// Isolate the network stack; an empty namespace means no reachability
    pub network: bool,
}

/// Access mode for a mount plan entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountAccess {
    ReadOnly,
    ReadWrite,
}

/// One entry of the filesystem plan applied inside the mount namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountBinding {
    pub target: PathBuf,
    pub access: MountAccess,
}

/// Syscall-level posture carried as policy data. The concrete enforcement
/// (RLIMIT_NPROC, network namespace, read-only remounts) lives in the
/// execution strategies; this records what was asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallPolicy {
    pub deny_process_spawn: bool,
    pub deny_network: bool,
}

/// Concrete isolation and resource configuration for one execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Unique, request-scoped writable directory
    pub scratch_dir: PathBuf,
    /// Interpreter to run, taken from the policy
    pub interpreter: PathBuf,
    /// Required entry-point name, embedded into the harness
    pub entry_point: String,
    /// Denylist re-applied at runtime by the fallback strategy
    pub denied_modules: Vec<String>,
    pub denied_calls: Vec<String>,
    pub namespaces: NamespaceFlags,
    pub mount_plan: Vec<MountBinding>,
    /// The complete environment of the sandboxed process; nothing is
    /// inherited from the host
    pub environment: Vec<(String, String)>,
    /// Numeric ceilings, copied verbatim from the policy
    pub ceilings: ResourceCeilings,
    pub syscall_policy: SyscallPolicy,
}

impl SandboxConfig {
    /// Build a fresh config for one request. Pure apart from reading the
    /// effective UID; no filesystem state is created here.
    pub fn build(policy: &SecurityPolicy) -> Self {
        let scratch_dir = scratch_root().join(Uuid::new_v4().to_string());

        let environment = vec![
            (
                "PATH".to_string(),
                "/usr/local/bin:/usr/bin:/bin".to_string(),
            ),
            ("HOME".to_string(), scratch_dir.display().to_string()),
            ("TMPDIR".to_string(), scratch_dir.display().to_string()),
            ("LC_ALL".to_string(), "C".to_string()),
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
            ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
        ];

        let mount_plan = vec![
            MountBinding {
                target: PathBuf::from("/"),
                access: MountAccess::ReadOnly,
            },
            MountBinding {
                target: scratch_dir.clone(),
                access: MountAccess::ReadWrite,
            },
        ];

        Self {
            scratch_dir,
            interpreter: policy.interpreter.clone(),
            entry_point: policy.entry_point.clone(),
            denied_modules: policy.denied_modules.iter().cloned().collect(),
            denied_calls: policy.denied_calls.iter().cloned().collect(),
            namespaces: NamespaceFlags {
                pid: true,
                mount: true,
                network: true,
            },
            mount_plan,
            environment,
            ceilings: policy.ceilings.clone(),
            syscall_policy: SyscallPolicy {
                deny_process_spawn: true,
                deny_network: true,
            },
        }
    }
}

/// Scratch root scoped by effective UID, so root and non-root runs never
/// collide on a shared temp directory.
fn scratch_root() -> PathBuf {
    let euid = unsafe { libc::geteuid() };
    std::env::temp_dir().join(format!("scriptbox-uid-{}", euid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configs_differ_only_in_scratch_path() {
        let policy = SecurityPolicy::default();
        let a = SandboxConfig::build(&policy);
        let b = SandboxConfig::build(&policy);

        assert_ne!(a.scratch_dir, b.scratch_dir);
        assert_eq!(a.ceilings, b.ceilings);
        assert_eq!(a.namespaces, b.namespaces);
        assert_eq!(a.syscall_policy, b.syscall_policy);
        assert_eq!(a.denied_modules, b.denied_modules);
        assert_eq!(a.entry_point, b.entry_point);
    }

    #[test]
    fn ceilings_are_copied_verbatim() {
        let mut policy = SecurityPolicy::default();
        policy.ceilings.wall_time_secs = 7;
        policy.ceilings.max_output_bytes = 512;
        let config = SandboxConfig::build(&policy);
        assert_eq!(config.ceilings.wall_time_secs, 7);
        assert_eq!(config.ceilings.max_output_bytes, 512);
    }

    #[test]
    fn network_is_always_denied() {
        let config = SandboxConfig::build(&SecurityPolicy::default());
        assert!(config.namespaces.network);
        assert!(config.syscall_policy.deny_network);
    }

    #[test]
    fn environment_is_minimal_and_scratch_scoped() {
        let config = SandboxConfig::build(&SecurityPolicy::default());
        let scratch = config.scratch_dir.display().to_string();
        let env: std::collections::HashMap<_, _> =
            config.environment.iter().cloned().collect();

        assert_eq!(env.get("HOME"), Some(&scratch));
        assert_eq!(env.get("TMPDIR"), Some(&scratch));
        assert!(env.contains_key("PATH"));
        // Nothing inherited from the host process.
        assert!(!env.contains_key("LD_PRELOAD"));
        assert_eq!(config.environment.len(), env.len());
    }

    #[test]
    fn mount_plan_exposes_only_scratch_writable() {
        let config = SandboxConfig::build(&SecurityPolicy::default());
        let writable: Vec<_> = config
            .mount_plan
            .iter()
            .filter(|b| b.access == MountAccess::ReadWrite)
            .collect();
        assert_eq!(writable.len(), 1);
        assert_eq!(writable[0].target, config.scratch_dir);
    }
}
