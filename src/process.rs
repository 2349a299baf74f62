//! Subprocess execution with a wall-clock limit.
//!
//! The tested program runs through the platform shell so that command lines
//! assembled from argument files keep their quoting. A run lasts until the
//! child has exited and every holder of its output pipes has closed them.
//! On timeout the whole process tree is terminated; the run then gets a
//! short grace period to reap the child, and keeps whatever output arrived.

use crate::platform::Platform;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a killed process gets to exit and release its pipes.
pub const KILL_GRACE: Duration = Duration::from_millis(100);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Capability to stop a child together with everything it spawned.
pub trait ProcessTerminator: Send + Sync + std::fmt::Debug {
    /// Adjust the command before spawning (e.g. to start a new process group).
    fn prepare(&self, cmd: &mut Command);

    /// Forcefully terminate `child` and its descendants.
    fn terminate(&self, child: &mut Child) -> io::Result<()>;
}

/// Places the child in its own process group and kills the group.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroupTerminator;

impl ProcessTerminator for ProcessGroupTerminator {
    fn prepare(&self, cmd: &mut Command) {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        #[cfg(not(unix))]
        let _ = cmd;
    }

    #[cfg(unix)]
    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        let pgid = child.id() as libc::pid_t;
        // SAFETY: kill(2) with a negative pid only signals that process group.
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc == 0 {
            Ok(())
        } else {
            let err = io::Error::last_os_error();
            // The group may already be gone; make sure the leader is.
            child.kill().or(Err(err))
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        child.kill()
    }
}

/// Kills only the direct child.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectTerminator;

impl ProcessTerminator for DirectTerminator {
    fn prepare(&self, _cmd: &mut Command) {}

    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        child.kill()
    }
}

/// Pick the termination strategy for the host platform.
pub fn terminator_for(platform: &Platform) -> Box<dyn ProcessTerminator> {
    if platform.supports_process_groups() {
        Box::new(ProcessGroupTerminator)
    } else {
        Box::new(DirectTerminator)
    }
}

/// One execution of the program under test.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Full command line, interpreted by the platform shell.
    pub command_line: String,
    pub work_dir: PathBuf,
    pub stdin: String,
    /// Added to the inherited environment.
    pub env: HashMap<String, String>,
}

/// What came back from a run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code if the process exited normally.
    pub exit_code: Option<i32>,
    /// Signal number if the process was terminated by a signal (Unix only).
    pub signal: Option<i32>,
    pub timed_out: bool,
    /// The process (or a descendant holding its pipes) did not go away after
    /// being killed; output may be missing.
    pub stuck: bool,
    pub duration: Duration,
}

impl RunOutput {
    /// Whether the program reported failure through its exit status.
    pub fn failed(&self) -> bool {
        self.exit_code != Some(0)
    }

    /// Exit status as a single number: the exit code, or the negated signal
    /// number for a killed process.
    pub fn status_code(&self) -> Option<i32> {
        self.exit_code.or(self.signal.map(|s| -s))
    }
}

fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command_line);
        c
    }
}

/// Output of one pipe, read on a background thread.
///
/// Bytes are appended as they arrive so a run cut short still keeps what the
/// program wrote before it was killed.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    eof: Receiver<()>,
    closed: bool,
}

impl Capture {
    fn spawn<R: Read + Send + 'static>(mut source: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, eof) = mpsc::channel();
        let sink = Arc::clone(&buf);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match source.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut b) = sink.lock() {
                            b.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
            let _ = tx.send(());
        });
        Self {
            buf,
            eof,
            closed: false,
        }
    }

    /// Wait for the writing end to close. Returns whether it did.
    fn wait_closed(&mut self, deadline: Instant) -> bool {
        if !self.closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.closed = !matches!(
                self.eof.recv_timeout(remaining),
                Err(RecvTimeoutError::Timeout)
            );
        }
        self.closed
    }

    fn take(&self) -> Vec<u8> {
        self.buf
            .lock()
            .map(|mut b| std::mem::take(&mut *b))
            .unwrap_or_default()
    }
}

fn all_closed(captures: &mut [&mut Option<Capture>], deadline: Instant) -> bool {
    captures
        .iter_mut()
        .all(|c| c.as_mut().is_none_or(|c| c.wait_closed(deadline)))
}

fn signal_of(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run `invocation`, enforcing `timeout`.
///
/// Returns within `timeout` plus [`KILL_GRACE`] (and polling slack) no
/// matter how the child behaves. Only failures to start the program are
/// reported as `Err`.
pub fn run(
    invocation: &Invocation,
    timeout: Duration,
    terminator: &dyn ProcessTerminator,
) -> io::Result<RunOutput> {
    let mut cmd = shell_command(&invocation.command_line);
    cmd.current_dir(&invocation.work_dir).envs(&invocation.env);
    debug!(
        work_dir = %invocation.work_dir.display(),
        command = %invocation.command_line,
        "spawning"
    );
    run_command(cmd, &invocation.stdin, timeout, terminator)
}

/// Run a prepared command under the same limits as [`run`], feeding it
/// `stdin`.
pub fn run_command(
    mut cmd: Command,
    stdin: &str,
    timeout: Duration,
    terminator: &dyn ProcessTerminator,
) -> io::Result<RunOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    terminator.prepare(&mut cmd);
    let description = format!("{cmd:?}");

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    if let Some(mut pipe) = child.stdin.take() {
        let data = stdin.as_bytes().to_vec();
        // A program that never reads stdin must not block the run.
        thread::spawn(move || {
            let _ = pipe.write_all(&data);
        });
    }
    let mut stdout = child.stdout.take().map(Capture::spawn);
    let mut stderr = child.stderr.take().map(Capture::spawn);

    // The run ends when the child has exited and its pipes are closed;
    // descendants inheriting the pipes count as part of the run.
    let deadline = start + timeout;
    let mut status = wait_until(&mut child, deadline)?;
    let timed_out = status.is_none() || !all_closed(&mut [&mut stdout, &mut stderr], deadline);

    let mut closed = true;
    if timed_out {
        warn!(
            timeout_secs = timeout.as_secs_f64(),
            command = %description,
            "timeout expired, killing process"
        );
        if let Err(e) = terminator.terminate(&mut child) {
            warn!(error = %e, "failed to kill process");
        }
        let grace = Instant::now() + KILL_GRACE;
        if status.is_none() {
            status = wait_until(&mut child, grace)?;
        }
        closed = all_closed(&mut [&mut stdout, &mut stderr], grace);
    }

    let stuck = status.is_none() || !closed;
    if stuck {
        warn!(command = %description, "OOPS: process got stuck");
    }

    Ok(RunOutput {
        stdout: stdout.as_ref().map(Capture::take).unwrap_or_default(),
        stderr: stderr.as_ref().map(Capture::take).unwrap_or_default(),
        exit_code: status.as_ref().and_then(ExitStatus::code),
        signal: status.as_ref().and_then(signal_of),
        timed_out,
        stuck,
        duration: start.elapsed(),
    })
}
