//! Helpers for running child processes with timeouts and bounded output.

use std::io::{BufRead, BufReader, Read, Write};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Which pipe a streamed chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Receives output lines as the child produces them.
pub type OutputSink = Arc<dyn Fn(StreamKind, &str) + Send + Sync>;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        let mut out = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            out.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        out
    }

    pub fn stderr_lossy(&self) -> String {
        let mut out = String::from_utf8_lossy(&self.stderr).into_owned();
        if self.stderr_truncated > 0 {
            out.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        out
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
pub fn run_command_with_timeout(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    run_command_with_stream(cmd, stdin, timeout, output_limit_bytes, None)
}

/// Run a command with a timeout, delivering each stdout/stderr line to `sink` as it arrives.
///
/// The child runs in its own process group; on timeout the whole group is killed. Once the
/// child is gone, readers get a short grace period to finish. Pipes still held open by background
/// descendants after that are abandoned and the output captured so far is returned.
///
/// The full (bounded) output is still returned in `CommandOutput`; the sink sees every line,
/// including those past the limit.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes, streaming = sink.is_some()))]
pub fn run_command_with_stream(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    sink: Option<OutputSink>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = SharedCapture::default();
    let stderr_capture = SharedCapture::default();
    spawn_reader(
        stdout,
        output_limit_bytes,
        StreamKind::Stdout,
        sink.clone(),
        stdout_capture.clone(),
        done_tx.clone(),
    );
    spawn_reader(
        stderr,
        output_limit_bytes,
        StreamKind::Stderr,
        sink,
        stderr_capture.clone(),
        done_tx,
    );

    // Readers are running, so a chatty child cannot block us while we feed stdin.
    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
        // Dropping closes the pipe so the child sees EOF.
        drop(child_stdin);
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            kill_process_group(child.id());
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    if !wait_for_readers(&done_rx, 2, DRAIN_GRACE)? {
        warn!("output pipes held open by background processes, returning captured output");
    }
    let (stdout, stdout_truncated) = stdout_capture.take()?;
    let (stderr, stderr_truncated) = stderr_capture.take()?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// How long readers may keep draining after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// Output buffer shared with a reader thread, readable even if the thread never finishes.
#[derive(Clone, Default)]
struct SharedCapture(Arc<Mutex<Captured>>);

impl SharedCapture {
    fn append(&self, line: &[u8], limit: usize) -> Result<()> {
        let mut captured = self
            .0
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        let remaining = limit.saturating_sub(captured.bytes.len());
        let keep = line.len().min(remaining);
        captured.bytes.extend_from_slice(&line[..keep]);
        captured.truncated += line.len() - keep;
        Ok(())
    }

    fn take(&self) -> Result<(Vec<u8>, usize)> {
        let mut captured = self
            .0
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        let captured = std::mem::take(&mut *captured);
        Ok((captured.bytes, captured.truncated))
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    kind: StreamKind,
    sink: Option<OutputSink>,
    capture: SharedCapture,
    done: mpsc::Sender<Result<()>>,
) {
    thread::spawn(move || {
        let result = read_lines_limited(reader, limit, kind, sink, &capture);
        // The receiver is gone once the caller stopped waiting.
        let _ = done.send(result);
    });
}

/// Wait until `expected` readers report or `grace` elapses. Returns `false` on expiry.
fn wait_for_readers(
    done: &mpsc::Receiver<Result<()>>,
    expected: usize,
    grace: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + grace;
    for _ in 0..expected {
        let left = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(left) {
            Ok(result) => result.context("read command output")?,
            Err(mpsc::RecvTimeoutError::Timeout) => return Ok(false),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
    }
    Ok(true)
}

/// SIGKILL every process in the group led by `pgid`.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("kill -9 -{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(pgid, exit_code = ?status.code(), "kill process group failed"),
        Err(err) => warn!(pgid, err = %err, "kill process group failed"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Read a stream line by line into `capture`, forwarding each line to `sink`.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    kind: StreamKind,
    sink: Option<OutputSink>,
    capture: &SharedCapture,
) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(sink) = &sink {
            sink(kind, &String::from_utf8_lossy(&line));
        }
        capture.append(&line, limit)?;
    }
    Ok(())
}
