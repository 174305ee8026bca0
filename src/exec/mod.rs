//! Execution engine
//!
//! Runs a validated script under the per-request sandbox configuration.
//! Two strategies share one outcome contract: the primary strategy uses
//! OS-level isolation (namespaces, read-only mounts, rlimits); the fallback
//! re-applies the denylist at runtime via interpreter call interception.
//! The strategy is probed once at process start and fixed for the process
//! lifetime.

pub mod harness;
pub mod isolated;
pub mod monitor;
pub mod restricted;

use crate::config::types::{Result, SandboxError};
use crate::outcome::ExecutionOutcome;
use crate::sandbox::{SandboxConfig, ScratchDir};
use monitor::{RawOutcome, SuperviseLimits};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Enforcement mechanism, selected once at startup. A tagged choice rather
/// than a hierarchy, so each strategy is testable against the same contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// OS-level isolation: namespaces, mount plan, rlimits
    Isolated,
    /// In-process denylist re-application plus rlimits and the watchdog
    Restricted,
}

impl Strategy {
    /// Probe whether namespace isolation is usable on this host. Decided
    /// once; never re-probed per request.
    pub fn probe() -> Self {
        if !Path::new("/proc/self/ns/pid").exists() {
            log::info!("namespace files absent; selecting restricted strategy");
            return Strategy::Restricted;
        }

        let probe = unsafe {
            Command::new("/bin/true")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .pre_exec(|| {
                    use nix::sched::{unshare, CloneFlags};
                    unshare(
                        CloneFlags::CLONE_NEWPID
                            | CloneFlags::CLONE_NEWNS
                            | CloneFlags::CLONE_NEWNET,
                    )
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
                })
                .status()
        };

        match probe {
            Ok(status) if status.success() => {
                log::info!("namespace isolation available; selecting isolated strategy");
                Strategy::Isolated
            }
            _ => {
                log::info!("namespace isolation unavailable; selecting restricted strategy");
                Strategy::Restricted
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Isolated => "isolated",
            Strategy::Restricted => "restricted",
        }
    }
}

/// Seam between the pipeline and the engine; lets tests substitute an
/// engine and count invocations.
pub trait ScriptExecutor {
    fn execute(&self, script: &str, config: &SandboxConfig) -> Result<ExecutionOutcome>;
}

/// The execution engine. Holds only the fixed strategy; all per-request
/// state lives in the config and the scratch directory.
pub struct ExecutionEngine {
    strategy: Strategy,
}

impl ExecutionEngine {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    /// Engine with the strategy probed from the host.
    pub fn probe() -> Self {
        Self::new(Strategy::probe())
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

impl ScriptExecutor for ExecutionEngine {
    fn execute(&self, script: &str, config: &SandboxConfig) -> Result<ExecutionOutcome> {
        let scratch = ScratchDir::create(&config.scratch_dir)?;

        let outcome = match self.strategy {
            Strategy::Isolated => isolated::run(script, config, &scratch),
            Strategy::Restricted => restricted::run(script, config, &scratch),
        };

        // Release scratch on every exit path; Drop is the backstop.
        if let Err(e) = scratch.cleanup() {
            log::warn!("scratch cleanup failed: {}", e);
        }

        outcome
    }
}

/// Bound on crash diagnostics; adversarial stderr volume never reaches the
/// caller unbounded.
pub(crate) const STDERR_EXCERPT_BYTES: usize = 4096;

/// Interpreter command shared by both strategies: harness on disk, scratch
/// as working directory, fully scrubbed environment, piped streams.
pub(crate) fn base_command(
    config: &SandboxConfig,
    scratch: &ScratchDir,
    harness_text: &str,
) -> Result<Command> {
    let harness_path = scratch.write_file("harness.py", harness_text)?;

    let mut cmd = Command::new(&config.interpreter);
    cmd.arg("-B").arg("-I").arg(&harness_path);
    cmd.current_dir(scratch.path());
    cmd.env_clear();
    for (key, value) in &config.environment {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    Ok(cmd)
}

pub(crate) fn supervise_limits(config: &SandboxConfig) -> SuperviseLimits {
    SuperviseLimits {
        wall: Duration::from_secs(config.ceilings.wall_time_secs),
        stdout_limit: config.ceilings.max_output_bytes as usize,
        stderr_limit: STDERR_EXCERPT_BYTES,
    }
}

pub(crate) fn spawn_and_classify(
    mut cmd: Command,
    config: &SandboxConfig,
    scratch: &ScratchDir,
) -> Result<ExecutionOutcome> {
    let mut child: Child = cmd
        .spawn()
        .map_err(|e| SandboxError::Spawn(format!("{}: {}", config.interpreter.display(), e)))?;
    let raw = monitor::supervise(&mut child, &supervise_limits(config))?;
    Ok(classify(raw, scratch))
}

/// Map raw termination facts onto the outcome taxonomy.
fn classify(raw: RawOutcome, scratch: &ScratchDir) -> ExecutionOutcome {
    if raw.timed_out {
        return ExecutionOutcome::Timeout;
    }

    if let Some(signal) = raw.signal {
        if signal == libc::SIGXCPU {
            // Kernel CPU ceiling; a time limit like any other.
            return ExecutionOutcome::Timeout;
        }
        if signal == libc::SIGSYS {
            return ExecutionOutcome::PolicyViolation {
                reason: "terminated by the syscall filter".to_string(),
            };
        }
        return ExecutionOutcome::Crashed {
            exit_code: None,
            stderr_excerpt: format!("terminated by signal {}", signal),
        };
    }

    if raw.exit_code == Some(harness::DENIED_EXIT_CODE) {
        let excerpt = stderr_excerpt(&raw.stderr);
        // The reserved code alone is not enough; a script can exit with any
        // status. Only the interception layer also writes the marker.
        if excerpt.contains(harness::DENIED_MARKER) {
            return ExecutionOutcome::PolicyViolation { reason: excerpt };
        }
        return ExecutionOutcome::Crashed {
            exit_code: raw.exit_code,
            stderr_excerpt: excerpt,
        };
    }

    if raw.exit_code == Some(0) {
        return match scratch
            .read_file(harness::RESULT_FILE)
            .and_then(|text| serde_json::from_str(&text).ok())
        {
            Some(return_value) => ExecutionOutcome::Success {
                return_value,
                stdout: raw.stdout,
                stdout_truncated: raw.stdout_truncated,
            },
            None => ExecutionOutcome::Crashed {
                exit_code: Some(0),
                stderr_excerpt: "script exited cleanly but produced no result".to_string(),
            },
        };
    }

    ExecutionOutcome::Crashed {
        exit_code: raw.exit_code,
        stderr_excerpt: stderr_excerpt(&raw.stderr),
    }
}

/// Resource ceilings applied inside the child between fork and exec.
/// Runs in pre_exec context, so only async-signal-safe calls.
pub(crate) fn apply_rlimits(
    memory_bytes: u64,
    cpu_time_secs: u64,
    process_limit: Option<u64>,
) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    let errno = |e: nix::errno::Errno| std::io::Error::from_raw_os_error(e as i32);
    setrlimit(Resource::RLIMIT_AS, memory_bytes, memory_bytes).map_err(errno)?;
    setrlimit(Resource::RLIMIT_CPU, cpu_time_secs, cpu_time_secs).map_err(errno)?;
    setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(errno)?;
    setrlimit(Resource::RLIMIT_NOFILE, 64, 64).map_err(errno)?;
    if let Some(limit) = process_limit {
        setrlimit(Resource::RLIMIT_NPROC, limit, limit).map_err(errno)?;
    }
    Ok(())
}

/// Refuse privilege escalation through setuid binaries for the child and
/// everything it execs.
pub(crate) fn set_no_new_privs() -> std::io::Result<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let end = stderr.len().min(STDERR_EXCERPT_BYTES);
    String::from_utf8_lossy(&stderr[..end]).trim().to_string()
}
