/// Fallback execution strategy for hosts where namespace isolation is
/// unavailable (unprivileged processes, restricted containers).
///
/// Defense in depth rather than a weaker substitute: the same denylist is
/// re-applied at the call-interception level inside the interpreter, the
/// same numeric ceilings are applied through rlimits where available, and
/// the wall-clock watchdog still terminates overruns. Only the isolation
/// mechanism differs from the primary strategy.
use crate::config::types::Result;
use crate::outcome::ExecutionOutcome;
use crate::sandbox::{SandboxConfig, ScratchDir};
use std::os::unix::process::CommandExt;

use super::harness;

pub fn run(script: &str, config: &SandboxConfig, scratch: &ScratchDir) -> Result<ExecutionOutcome> {
    let result_path = scratch.path().join(harness::RESULT_FILE);
    let harness_text = harness::restricted_harness(script, config, &result_path);
    let mut cmd = super::base_command(config, scratch, &harness_text)?;

    let memory_bytes = config.ceilings.memory_bytes;
    let cpu_time_secs = config.ceilings.cpu_time_secs;

    unsafe {
        cmd.pre_exec(move || {
            // RLIMIT_NPROC counts processes per UID, which is shared here,
            // so spawn denial is left to the interception hook on this path.
            super::apply_rlimits(memory_bytes, cpu_time_secs, None)?;
            super::set_no_new_privs()?;
            Ok(())
        });
    }

    super::spawn_and_classify(cmd, config, scratch)
}
