//! Supervised execution of native copy utilities.
//!
//! Every child runs in its own process group (Unix) so the whole tree can be
//! terminated. The supervising loop polls for exit, the cancellation flag and
//! the timeout; output is drained on helper threads so a chatty utility cannot
//! block on a full pipe.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("terminated after cancellation")]
    Cancelled,

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("failed waiting for process: {0}")]
    Wait(#[source] io::Error),
}

/// Limits applied while a child runs.
pub struct Supervision<'a> {
    pub timeout: Option<Duration>,
    /// Polled every tick; `true` terminates the child
    pub cancelled: &'a (dyn Fn() -> bool + Sync),
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<&'a [u8]>,
}

/// Run `cmd` to completion under `supervision`.
pub fn run_supervised(mut cmd: Command, supervision: Supervision<'_>) -> Result<ProcessOutput, ProcessError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if supervision.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    isolate_process_group(&mut cmd);

    debug!(command = ?cmd, "spawning copy utility");
    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    if let (Some(input), Some(mut stdin)) = (supervision.stdin, child.stdin.take()) {
        // A utility that exits without reading its stdin is not an error here.
        let _ = stdin.write_all(input);
    }

    let stdout_handle = drain(child.stdout.take());
    let stderr_handle = drain(child.stderr.take());

    let started = Instant::now();
    let mut abort_reason: Option<ProcessError> = None;
    loop {
        if abort_reason.is_none() {
            if (supervision.cancelled)() {
                warn!(program = %program, "cancelling running copy utility");
                kill_process_tree(&mut child);
                abort_reason = Some(ProcessError::Cancelled);
            } else if let Some(limit) = supervision.timeout.filter(|t| started.elapsed() >= *t) {
                warn!(program = %program, timeout = ?limit, "copy utility timed out");
                kill_process_tree(&mut child);
                abort_reason = Some(ProcessError::TimedOut(limit));
            }
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let stdout = join_output(stdout_handle);
                let stderr = join_output(stderr_handle);
                if let Some(reason) = abort_reason {
                    return Err(reason);
                }
                return Ok(ProcessOutput { status, stdout, stderr });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill_process_tree(&mut child);
                let _ = join_output(stdout_handle);
                let _ = join_output(stderr_handle);
                return Err(ProcessError::Wait(e));
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<thread::JoinHandle<String>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = stream.read_to_end(&mut bytes);
            String::from_utf8_lossy(&bytes).into_owned()
        })
    })
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: signalling the process group created for this child at spawn.
        unsafe {
            libc::killpg(pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(windows)]
fn kill_process_tree(child: &mut Child) {
    let pid = child.id().to_string();
    let _ = Command::new("taskkill")
        .args(["/PID", &pid, "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(any(unix, windows)))]
fn kill_process_tree(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
