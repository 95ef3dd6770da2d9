//! Bounded child-process execution for command collaborators.
//!
//! A collaborator gets its request on stdin and answers on stdout. Each call
//! runs under a wall-clock limit and keeps at most a fixed number of bytes per
//! output stream.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Per-call limits taken from `[collaborator]`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

/// One output stream, cut at the byte limit.
#[derive(Debug, Default)]
pub struct CappedStream {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit and thrown away.
    pub dropped: u64,
}

impl CappedStream {
    pub fn overflowed(&self) -> bool {
        self.dropped > 0
    }

    /// Trimmed lossy text, cut to `max_chars` with a trailing `...`.
    pub fn excerpt(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        let trimmed = text.trim();
        match trimmed.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", &trimmed[..cut]),
            None => trimmed.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ChildOutcome {
    pub status: ExitStatus,
    pub stdout: CappedStream,
    pub stderr: CappedStream,
    /// The child was killed at the time limit.
    pub timed_out: bool,
}

/// Spawn `cmd`, hand it `input` on stdin and wait at most `limits.timeout`.
///
/// Both output pipes are drained on their own threads while we wait.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), max_output_bytes = limits.max_output_bytes))]
pub fn run_bounded(mut cmd: Command, input: &[u8], limits: ProcessLimits) -> Result<ChildOutcome> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "collaborator did not start");
        anyhow!(err).context("spawn collaborator")
    })?;
    debug!(pid = child.id(), bytes = input.len(), "collaborator started");

    let feeder = feed_stdin(&mut child, input)?;
    let stdout = capture(child.stdout.take(), limits.max_output_bytes, "stdout")?;
    let stderr = capture(child.stderr.take(), limits.max_output_bytes, "stderr")?;

    let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for collaborator")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = limits.timeout.as_secs(), "collaborator over time; killing it");
            child.kill().context("kill collaborator")?;
            (child.wait().context("reap collaborator")?, true)
        }
    };

    finish(feeder, "stdin")?;
    let stdout = finish(stdout, "stdout")?;
    let stderr = finish(stderr, "stderr")?;
    if stdout.overflowed() || stderr.overflowed() {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "collaborator output cut at limit"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "collaborator finished");
    Ok(ChildOutcome {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn feed_stdin(child: &mut Child, input: &[u8]) -> Result<JoinHandle<Result<()>>> {
    let mut pipe = child.stdin.take().ok_or_else(|| anyhow!("collaborator stdin is not piped"))?;
    let input = input.to_vec();
    Ok(thread::spawn(move || match pipe.write_all(&input) {
        // A child may answer without reading its request.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other.context("write collaborator stdin"),
    }))
}

fn capture<R: Read + Send + 'static>(
    pipe: Option<R>,
    limit: usize,
    name: &'static str,
) -> Result<JoinHandle<Result<CappedStream>>> {
    let mut pipe = pipe.ok_or_else(|| anyhow!("collaborator {name} is not piped"))?;
    Ok(thread::spawn(move || {
        let mut stream = CappedStream::default();
        (&mut pipe)
            .take(limit as u64)
            .read_to_end(&mut stream.bytes)
            .with_context(|| format!("read collaborator {name}"))?;
        stream.dropped = io::copy(&mut pipe, &mut io::sink())
            .with_context(|| format!("drain collaborator {name}"))?;
        Ok(stream)
    }))
}

fn finish<T>(handle: JoinHandle<Result<T>>, name: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("collaborator {name} thread panicked"))?
}
