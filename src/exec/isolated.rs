/// Primary execution strategy: OS-level isolation.
///
/// The interpreter is launched into fresh pid, mount, and network
/// namespaces with the mount plan applied (read-only root, writable
/// scratch), a scrubbed environment, hard rlimits, and no-new-privileges.
/// An empty network namespace means the script has no network reachability
/// at all.
use crate::config::types::Result;
use crate::outcome::ExecutionOutcome;
use crate::sandbox::{MountAccess, SandboxConfig, ScratchDir};
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};

use super::harness;

pub fn run(script: &str, config: &SandboxConfig, scratch: &ScratchDir) -> Result<ExecutionOutcome> {
    let result_path = scratch.path().join(harness::RESULT_FILE);
    let harness_text = harness::isolated_harness(script, config, &result_path);
    let mut cmd = super::base_command(config, scratch, &harness_text)?;

    let clone_flags = clone_flags(config);
    let writable: Vec<PathBuf> = config
        .mount_plan
        .iter()
        .filter(|b| b.access == MountAccess::ReadWrite)
        .map(|b| b.target.clone())
        .collect();
    let memory_bytes = config.ceilings.memory_bytes;
    let cpu_time_secs = config.ceilings.cpu_time_secs;
    let process_limit = if config.syscall_policy.deny_process_spawn {
        Some(1)
    } else {
        None
    };
    let apply_mounts = config.namespaces.mount;
    // Read before fork; pre_exec must only issue syscalls.
    let submounts = if apply_mounts {
        submount_targets(&mount_targets()?, &writable)
    } else {
        Vec::new()
    };

    unsafe {
        cmd.pre_exec(move || {
            let errno = |e: nix::errno::Errno| std::io::Error::from_raw_os_error(e as i32);

            // The pid namespace takes effect for the interpreter's own
            // children; direct spawn containment comes from RLIMIT_NPROC.
            unshare(clone_flags).map_err(errno)?;

            if apply_mounts {
                // Keep mount changes private to this namespace.
                mount(
                    None::<&str>,
                    "/",
                    None::<&str>,
                    MsFlags::MS_REC | MsFlags::MS_PRIVATE,
                    None::<&str>,
                )
                .map_err(errno)?;
                // Writable bind mounts first, so the read-only remount of
                // the root does not cover them.
                for target in &writable {
                    mount(
                        Some(target),
                        target,
                        None::<&str>,
                        MsFlags::MS_BIND,
                        None::<&str>,
                    )
                    .map_err(errno)?;
                }
                mount(
                    None::<&str>,
                    "/",
                    None::<&str>,
                    MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
                    None::<&str>,
                )
                .map_err(errno)?;
                // The root remount is per-mountpoint, not recursive; each
                // submount (/tmp, /run, ...) keeps its own write flag and
                // must be remounted individually. The scratch bind created
                // above is a separate mountpoint and stays writable.
                for target in &submounts {
                    match mount(
                        None::<&str>,
                        target,
                        None::<&str>,
                        MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
                        None::<&str>,
                    ) {
                        Ok(()) | Err(nix::errno::Errno::ENOENT) => {}
                        Err(e) => return Err(errno(e)),
                    }
                }
            }

            super::apply_rlimits(memory_bytes, cpu_time_secs, process_limit)?;
            super::set_no_new_privs()?;
            Ok(())
        });
    }

    super::spawn_and_classify(cmd, config, scratch)
}

/// Mount points currently visible to this process.
fn mount_targets() -> Result<Vec<PathBuf>> {
    let table = std::fs::read_to_string("/proc/self/mounts")?;
    Ok(parse_mount_targets(&table))
}

/// Second field of each mounts(5) line, with octal escapes decoded.
fn parse_mount_targets(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_mount_path)
        .map(PathBuf::from)
        .collect()
}

/// mounts(5) escapes space, tab, newline, and backslash as `\ooo`.
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = &bytes[i + 1..i + 4];
            if octal.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = (octal[0] - b'0') * 64 + (octal[1] - b'0') * 8 + (octal[2] - b'0');
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mounts that need their own read-only remount: everything except the root
/// (already handled) and anything at or below a writable binding.
fn submount_targets(targets: &[PathBuf], writable: &[PathBuf]) -> Vec<PathBuf> {
    targets
        .iter()
        .filter(|t| t.as_path() != Path::new("/"))
        .filter(|t| !writable.iter().any(|w| t.starts_with(w)))
        .cloned()
        .collect()
}

fn clone_flags(config: &SandboxConfig) -> CloneFlags {
    let mut flags = CloneFlags::empty();
    if config.namespaces.pid {
        flags |= CloneFlags::CLONE_NEWPID;
    }
    if config.namespaces.mount {
        flags |= CloneFlags::CLONE_NEWNS;
    }
    if config.namespaces.network {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::policy::SecurityPolicy;

    #[test]
    fn clone_flags_follow_namespace_config() {
        let mut config = SandboxConfig::build(&SecurityPolicy::default());
        assert_eq!(
            clone_flags(&config),
            CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWNET
        );

        config.namespaces.network = false;
        assert_eq!(
            clone_flags(&config),
            CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS
        );
    }

    #[test]
    fn mount_table_paths_are_parsed_and_decoded() {
        let table = "/dev/sda1 / ext4 rw 0 0\n\
                     tmpfs /tmp tmpfs rw 0 0\n\
                     proc /proc proc rw 0 0\n\
                     tmpfs /mnt/with\\040space tmpfs rw 0 0\n";
        let targets = parse_mount_targets(table);
        assert!(targets.contains(&PathBuf::from("/")));
        assert!(targets.contains(&PathBuf::from("/tmp")));
        assert!(targets.contains(&PathBuf::from("/mnt/with space")));
    }

    #[test]
    fn submounts_keep_writable_parents_readonly() {
        // A tmpfs /tmp must itself be remounted read-only even though the
        // scratch directory lives beneath it; only the scratch binding and
        // its descendants are exempt.
        let scratch = PathBuf::from("/tmp/scriptbox-uid-0/abc");
        let targets = vec![
            PathBuf::from("/"),
            PathBuf::from("/tmp"),
            PathBuf::from("/run"),
            scratch.clone(),
            PathBuf::from("/tmp/scriptbox-uid-0/abc/nested"),
        ];
        let subs = submount_targets(&targets, &[scratch.clone()]);
        assert!(subs.contains(&PathBuf::from("/tmp")));
        assert!(subs.contains(&PathBuf::from("/run")));
        assert!(!subs.contains(&PathBuf::from("/")));
        assert!(!subs.contains(&scratch));
        assert!(!subs.contains(&PathBuf::from("/tmp/scriptbox-uid-0/abc/nested")));
    }
}
