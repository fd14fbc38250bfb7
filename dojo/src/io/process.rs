//! Child processes with a wall-clock timeout and bounded captured output.
//!
//! Used for both solution scripts and the generation agent. A timeout is an
//! outcome, not an error: the child is killed and the partial output kept.
//!
//! On unix the child leads its own process group. The whole group is killed
//! on timeout, and stragglers are killed once the child exits, so worker
//! processes can neither outlive the limit nor hold the output pipes open.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output stream plus a count of what was discarded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapturedStream {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl CapturedStream {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    fn drain<R: Read>(mut reader: R, limit: usize) -> Result<Self> {
        let mut captured = Self::default();
        let mut chunk = [0u8; 8192];
        loop {
            let read = reader.read(&mut chunk).context("read child output")?;
            if read == 0 {
                return Ok(captured);
            }
            let keep = read.min(limit.saturating_sub(captured.bytes.len()));
            captured.bytes.extend_from_slice(&chunk[..keep]);
            captured.dropped += read - keep;
        }
    }
}

/// How a bounded child process ended.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Stdout then stderr, each followed by a note when bytes were dropped,
    /// and a final note when the child was killed.
    pub fn render_log(&self, label: &str) -> String {
        let mut log = String::new();
        for (name, stream) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            log.push_str(&format!("=== {name} ===\n"));
            log.push_str(&stream.text());
            if stream.dropped > 0 {
                log.push_str(&format!(
                    "\n[{label} {name}: {} more bytes not captured]",
                    stream.dropped
                ));
            }
            log.push('\n');
        }
        if self.timed_out {
            log.push_str(&format!(
                "[{label} killed: timed out after {:.1}s]\n",
                self.elapsed.as_secs_f64()
            ));
        }
        log
    }
}

type StreamHandle = JoinHandle<Result<CapturedStream>>;

/// Run `cmd` for at most `timeout`, optionally writing `stdin`, and keep up to
/// `output_limit_bytes` of each output stream.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    own_process_group(&mut cmd);

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;
    let (stdout, stderr) = spawn_drains(&mut child, output_limit_bytes)?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("child stdin not piped"))?;
        if let Err(err) = pipe.write_all(input) {
            warn!(err = %err, "child closed stdin before reading all input");
        }
    }

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!("child exceeded timeout, killing its process group");
            kill_tree(&mut child)?;
            (child.wait().context("reap killed child")?, true)
        }
    };
    if !timed_out {
        kill_stragglers(&child);
    }
    let elapsed = started.elapsed();

    let stdout = join_stream(stdout).context("collect stdout")?;
    let stderr = join_stream(stderr).context("collect stderr")?;
    debug!(
        exit_code = ?status.code(),
        timed_out,
        elapsed_ms = elapsed.as_millis() as u64,
        stdout_dropped = stdout.dropped,
        stderr_dropped = stderr.dropped,
        "child finished"
    );
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
        elapsed,
    })
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill the child and everything in its process group.
fn kill_tree(child: &mut Child) -> Result<()> {
    if let Err(err) = signal_group(child) {
        warn!(err = %err, "killing process group failed, killing child only");
    }
    match child.kill() {
        Ok(()) => Ok(()),
        // Already reaped.
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err).context("kill child"),
    }
}

/// Kill background processes left behind by a child that already exited.
fn kill_stragglers(child: &Child) {
    if let Err(err) = signal_group(child) {
        debug!(err = %err, "could not signal leftover process group");
    }
}

#[cfg(unix)]
fn signal_group(child: &Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(anyhow!("signal process group {pgid}: {err}")),
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child) -> Result<()> {
    Ok(())
}

/// Drain both pipes on helper threads so a chatty child never blocks.
fn spawn_drains(child: &mut Child, limit: usize) -> Result<(StreamHandle, StreamHandle)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("child stdout not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("child stderr not piped"))?;
    Ok((
        thread::spawn(move || CapturedStream::drain(stdout, limit)),
        thread::spawn(move || CapturedStream::drain(stderr, limit)),
    ))
}

fn join_stream(handle: StreamHandle) -> Result<CapturedStream> {
    handle
        .join()
        .map_err(|_| anyhow!("output drain thread panicked"))?
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn keeps_streams_apart_and_reports_status() {
        let out = run_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert!(!out.success());
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout.text(), "out\n");
        assert!(out.render_log("exec").contains("=== stderr ===\nerr"));
    }

    #[test]
    fn writes_stdin_to_child() {
        let out = run_with_timeout(sh("cat"), Some(b"hello".as_slice()), Duration::from_secs(5), 1024)
            .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout.bytes, b"hello");
    }

    #[test]
    fn timeout_kills_child_without_error() {
        let out = run_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(100), 1024)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.render_log("exec").contains("killed: timed out"));
    }

    #[test]
    fn output_beyond_limit_is_counted() {
        let out = run_with_timeout(sh("printf 'abcdefghij'"), None, Duration::from_secs(5), 4)
            .expect("run");
        assert_eq!(out.stdout.bytes, b"abcd");
        assert_eq!(out.stdout.dropped, 6);
        assert!(out.render_log("exec").contains("6 more bytes not captured"));
    }

    #[test]
    fn timeout_kills_background_workers() {
        let started = Instant::now();
        let out = run_with_timeout(
            sh("sleep 30 & sleep 30"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn exited_child_does_not_wait_for_leftover_workers() {
        let started = Instant::now();
        let out = run_with_timeout(sh("sleep 30 & echo done"), None, Duration::from_secs(20), 1024)
            .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout.text(), "done\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
