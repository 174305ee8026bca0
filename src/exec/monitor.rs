/// Child supervision: bounded output collection and the wall-clock watchdog.
///
/// The watchdog is independent of CPU-time limiting; a child blocked on a
/// CPU-free wait is still killed at the wall bound. Output is collected on
/// dedicated threads with hard byte limits so adversarial output volume
/// cannot exhaust memory.
use crate::config::types::{Result, SandboxError};
use std::io::{BufReader, Read};
use std::process::Child;
use std::sync::mpsc::{channel, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Bounds applied while supervising one child.
#[derive(Debug, Clone)]
pub struct SuperviseLimits {
    /// Wall-clock ceiling
    pub wall: Duration,
    /// Max captured stdout bytes
    pub stdout_limit: usize,
    /// Max captured stderr bytes (diagnostic excerpt bound)
    pub stderr_limit: usize,
}

/// Raw facts about one terminated child, before outcome classification.
#[derive(Debug)]
pub struct RawOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// True when the watchdog forcibly terminated the child
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr: Vec<u8>,
    pub wall_elapsed: Duration,
}

/// Wait for the child under the wall-clock watchdog, collecting bounded
/// output. The child is always reaped before this returns.
pub fn supervise(child: &mut Child, limits: &SuperviseLimits) -> Result<RawOutcome> {
    let (stdout_tx, stdout_rx) = channel();
    let (stderr_tx, stderr_rx) = channel();

    let stdout_handle = child.stdout.take().map(|stream| {
        let limit = limits.stdout_limit;
        thread::spawn(move || collect_stream(stream, limit, stdout_tx))
    });
    let stderr_handle = child.stderr.take().map(|stream| {
        let limit = limits.stderr_limit;
        thread::spawn(move || collect_stream(stream, limit, stderr_tx))
    });

    let started = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if started.elapsed() >= limits.wall {
                    timed_out = true;
                    if let Err(e) = child.kill() {
                        log::warn!("watchdog kill failed: {}", e);
                    }
                    break child
                        .wait()
                        .map_err(|e| SandboxError::Collection(e.to_string()))?;
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(SandboxError::Collection(e.to_string())),
        }
    };
    let wall_elapsed = started.elapsed();

    let (stdout, stdout_truncated) = recv_collected(stdout_handle.is_some(), &stdout_rx);
    let (stderr, _) = recv_collected(stderr_handle.is_some(), &stderr_rx);
    if let Some(handle) = stdout_handle {
        let _ = handle.join();
    }
    if let Some(handle) = stderr_handle {
        let _ = handle.join();
    }

    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };

    Ok(RawOutcome {
        exit_code: status.code(),
        signal,
        timed_out,
        stdout,
        stdout_truncated,
        stderr,
        wall_elapsed,
    })
}

fn recv_collected(
    spawned: bool,
    rx: &std::sync::mpsc::Receiver<(Vec<u8>, bool)>,
) -> (Vec<u8>, bool) {
    if !spawned {
        return (Vec::new(), false);
    }
    // The child is dead, so the pipe closes promptly; the timeout guards
    // against a wedged collector thread.
    rx.recv_timeout(Duration::from_secs(5))
        .unwrap_or((Vec::new(), false))
}

/// Read a stream to EOF or the byte limit, whichever comes first.
fn collect_stream<R: Read + Send + 'static>(stream: R, limit: usize, tx: Sender<(Vec<u8>, bool)>) {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut truncated = false;

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if buffer.len() + n > limit {
                    let remaining = limit - buffer.len();
                    buffer.extend_from_slice(&chunk[..remaining]);
                    truncated = true;
                    // Keep draining so the child never blocks on a full pipe.
                    let mut sink = [0u8; 4096];
                    while matches!(reader.read(&mut sink), Ok(n) if n > 0) {}
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
            Err(_) => break,
        }
    }

    let _ = tx.send((buffer, truncated));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn limits(wall_ms: u64) -> SuperviseLimits {
        SuperviseLimits {
            wall: Duration::from_millis(wall_ms),
            stdout_limit: 64,
            stderr_limit: 64,
        }
    }

    fn spawn_sh(script: &str) -> Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn /bin/sh")
    }

    #[test]
    fn collects_output_and_exit_code() {
        let mut child = spawn_sh("printf hello; exit 3");
        let raw = supervise(&mut child, &limits(5_000)).unwrap();
        assert_eq!(raw.exit_code, Some(3));
        assert_eq!(raw.stdout, b"hello");
        assert!(!raw.timed_out);
        assert!(!raw.stdout_truncated);
    }

    #[test]
    fn truncates_output_at_limit() {
        let mut child = spawn_sh("i=0; while [ $i -lt 100 ]; do printf 0123456789; i=$((i+1)); done");
        let raw = supervise(&mut child, &limits(5_000)).unwrap();
        assert_eq!(raw.stdout.len(), 64);
        assert!(raw.stdout_truncated);
    }

    #[test]
    fn watchdog_kills_sleeping_child() {
        // A sleeping child uses no CPU; only the wall watchdog can stop it.
        let mut child = spawn_sh("sleep 30");
        let started = Instant::now();
        let raw = supervise(&mut child, &limits(200)).unwrap();
        assert!(raw.timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(raw.exit_code, None);
    }

    #[test]
    fn fast_child_is_not_timed_out() {
        let mut child = spawn_sh("exit 0");
        let raw = supervise(&mut child, &limits(5_000)).unwrap();
        assert!(!raw.timed_out);
        assert_eq!(raw.exit_code, Some(0));
    }
}
